//! QuotaStore port - AI quota 有効化 reconciliation 用
//!
//! 有効化は「組織の現在 Active な quota」を条件にした compare-and-swap です。
//! 並行するパスが先に切り替えた場合は `Conflict` を返し、呼び出し側が読み直します。

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::{AiQuota, NewEnvelope, OrganizationId, QuotaId, RelayError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaActivation {
    pub quota_id: QuotaId,
    /// Active quota the caller observed; must still be the active one.
    pub expected_active: Option<QuotaId>,
    pub now: DateTime<Utc>,
    pub period_length: TimeDelta,
    pub event: Option<NewEnvelope>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    Activated { deactivated: Option<QuotaId> },
    /// The organization's active quota is no longer `expected_active`.
    Conflict { current_active: Option<QuotaId> },
    /// The quota is no longer `Scheduled` (another pass handled it).
    NotScheduled,
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Scheduled quotas with `effective_date <= now`, newest effective first.
    async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<AiQuota>, RelayError>;

    async fn find_active(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<AiQuota>, RelayError>;

    /// Deactivates `expected_active` (if any) and activates `quota_id` in one commit.
    async fn activate(&self, request: QuotaActivation) -> Result<ActivationOutcome, RelayError>;

    /// Marks a still-scheduled quota as superseded. Returns false if it was not scheduled.
    async fn supersede(&self, quota_id: QuotaId, now: DateTime<Utc>) -> Result<bool, RelayError>;
}
