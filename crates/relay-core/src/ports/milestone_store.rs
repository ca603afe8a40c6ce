//! MilestoneStore port - マイルストーン期限切れ reconciliation 用

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Milestone, MilestoneId, NewEnvelope, RelayError};

#[async_trait]
pub trait MilestoneStore: Send + Sync {
    /// `due_date < now AND status IN (Pending, InProgress)`, oldest due first.
    async fn find_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Milestone>, RelayError>;

    /// Conditional transition to `Missed`, enqueueing `event` in the same commit.
    /// Returns false (and enqueues nothing) if the milestone is no longer overdue.
    async fn mark_missed(
        &self,
        id: MilestoneId,
        now: DateTime<Utc>,
        event: Option<NewEnvelope>,
    ) -> Result<bool, RelayError>;
}
