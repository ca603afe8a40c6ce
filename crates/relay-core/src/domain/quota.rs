//! AiQuota - 組織ごとの AI 利用枠
//!
//! # 不変条件
//! - 1 つの組織について、Active な quota は常に高々 1 つ
//!
//! # 状態遷移
//! - Scheduled → Active（effective_date 到来、reconciliation loop が駆動）
//! - Active → Superseded（後続の quota が有効化されたとき、同一コミット内）
//! - Scheduled → Superseded（より新しい quota がすでに Active のとき）
//!
//! Superseded は終端。一度非活性になった quota が再び Active になることはありません。

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{OrganizationId, QuotaId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuotaStatus {
    Scheduled,
    Active,
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiQuota {
    pub id: QuotaId,
    pub organization_id: OrganizationId,
    pub monthly_token_limit: u64,
    pub effective_date: DateTime<Utc>,
    pub status: QuotaStatus,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl AiQuota {
    pub fn scheduled(
        id: QuotaId,
        organization_id: OrganizationId,
        monthly_token_limit: u64,
        effective_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            organization_id,
            monthly_token_limit,
            effective_date,
            status: QuotaStatus::Scheduled,
            period_start: None,
            period_end: None,
            activated_at: None,
            deactivated_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == QuotaStatus::Active
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QuotaStatus::Scheduled && self.effective_date <= now
    }

    /// `[effective_date, effective_date + period_length)`
    pub fn period_window(&self, period_length: TimeDelta) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self
            .effective_date
            .checked_add_signed(period_length)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (self.effective_date, end)
    }

    /// 有効化して新しい期間を設定
    pub fn activate(&mut self, now: DateTime<Utc>, period_length: TimeDelta) -> bool {
        if self.status != QuotaStatus::Scheduled {
            return false;
        }
        let (start, end) = self.period_window(period_length);
        self.status = QuotaStatus::Active;
        self.period_start = Some(start);
        self.period_end = Some(end);
        self.activated_at = Some(now);
        true
    }

    pub fn supersede(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == QuotaStatus::Superseded {
            return false;
        }
        self.status = QuotaStatus::Superseded;
        self.deactivated_at = Some(now);
        true
    }
}
