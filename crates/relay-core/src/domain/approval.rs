//! PendingDecision - 承認待ちの意思決定
//!
//! # 状態遷移
//! - Pending → Approved / Rejected（ユーザー操作、ここでは扱わない）
//! - Pending → Expired（requested_at + deadline 超過、reconciliation loop が駆動）

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DecisionId, ProjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDecision {
    pub id: DecisionId,
    pub project_id: ProjectId,
    pub subject: String,
    pub requested_at: DateTime<Utc>,
    pub status: DecisionStatus,
    pub expired_at: Option<DateTime<Utc>>,
}

impl PendingDecision {
    pub fn new(
        id: DecisionId,
        project_id: ProjectId,
        subject: impl Into<String>,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            project_id,
            subject: subject.into(),
            requested_at,
            status: DecisionStatus::Pending,
            expired_at: None,
        }
    }

    /// `requested_at < cutoff`（cutoff = now - deadline）
    pub fn is_past_deadline(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == DecisionStatus::Pending && self.requested_at < cutoff
    }

    pub fn expire(&mut self, now: DateTime<Utc>, deadline: TimeDelta) -> bool {
        let cutoff = now.checked_sub_signed(deadline).unwrap_or(DateTime::<Utc>::MIN_UTC);
        if !self.is_past_deadline(cutoff) {
            return false;
        }
        self.status = DecisionStatus::Expired;
        self.expired_at = Some(now);
        true
    }
}
