//! Milestone - 期日付きのマイルストーン
//!
//! # 状態遷移
//! - Pending / InProgress → Missed（期日超過、reconciliation loop が駆動）
//! - Pending / InProgress → Completed（ユーザー操作のみ、ここでは扱わない）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{MilestoneId, ProjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
    Missed,
}

impl MilestoneStatus {
    /// 時間起因の遷移がまだ起こり得る状態か
    pub fn is_pre_terminal(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub project_id: ProjectId,
    pub name: String,
    pub due_date: DateTime<Utc>,
    pub status: MilestoneStatus,
    pub missed_at: Option<DateTime<Utc>>,
}

impl Milestone {
    pub fn new(
        id: MilestoneId,
        project_id: ProjectId,
        name: impl Into<String>,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            project_id,
            name: name.into(),
            due_date,
            status: MilestoneStatus::Pending,
            missed_at: None,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.due_date < now && self.status.is_pre_terminal()
    }

    /// Missed に遷移。すでに終端なら false（再実行しても無害）
    pub fn mark_missed(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_overdue(now) {
            return false;
        }
        self.status = MilestoneStatus::Missed;
        self.missed_at = Some(now);
        true
    }
}
