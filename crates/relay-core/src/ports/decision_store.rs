//! DecisionStore port - 承認期限切れ reconciliation 用

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::{DecisionId, NewEnvelope, PendingDecision, RelayError};

#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Pending decisions with `requested_at < cutoff`, oldest first, at most `limit`.
    async fn find_past_deadline(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PendingDecision>, RelayError>;

    /// Conditional transition to `Expired`, enqueueing `event` in the same commit.
    async fn expire(
        &self,
        id: DecisionId,
        now: DateTime<Utc>,
        deadline: TimeDelta,
        event: Option<NewEnvelope>,
    ) -> Result<bool, RelayError>;
}
