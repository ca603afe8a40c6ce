//! Reconciliation loops - 時間起因の状態遷移
//!
//! 共通の骨格:
//! 1. 期限到来かつ未終端のエンティティを問い合わせ
//! 2. 唯一許される遷移を適用
//! 3. 必要ならドメインイベントを同一コミットで enqueue
//! 4. 永続化
//!
//! どのパスも冪等です（同じ遷移の再実行は no-op）。

pub mod decision_expiry;
pub mod milestone_expiry;
pub mod quota_activation;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::poll::PollTask;
use crate::domain::RelayError;
use crate::ports::Clock;

pub use self::decision_expiry::DecisionExpiry;
pub use self::milestone_expiry::MilestoneExpiry;
pub use self::quota_activation::QuotaActivationReconciler;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub transitioned: usize,
    /// Already handled by a concurrent pass, or given up after conflicts.
    pub skipped: usize,
    pub events_enqueued: usize,
}

/// 1 種類のエンティティに対する 1 パス分の処理
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn name(&self) -> &'static str;

    fn poll_interval(&self) -> Duration;

    async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport, RelayError>;
}

/// Reconciler を固定間隔で回すループ
pub struct ReconciliationLoop<R> {
    reconciler: R,
    clock: Arc<dyn Clock>,
}

impl<R: Reconciler> ReconciliationLoop<R> {
    pub fn new(reconciler: R, clock: Arc<dyn Clock>) -> Self {
        Self { reconciler, clock }
    }

    pub async fn run_once(&self) -> Result<ReconcileReport, RelayError> {
        self.reconciler.reconcile(self.clock.now()).await
    }
}

#[async_trait]
impl<R: Reconciler> PollTask for ReconciliationLoop<R> {
    fn name(&self) -> &'static str {
        self.reconciler.name()
    }

    fn poll_interval(&self) -> Duration {
        self.reconciler.poll_interval()
    }

    async fn tick(&self) -> Result<(), RelayError> {
        let report = self.run_once().await?;
        if report.transitioned > 0 {
            info!(
                loop_name = self.name(),
                examined = report.examined,
                transitioned = report.transitioned,
                skipped = report.skipped,
                events_enqueued = report.events_enqueued,
                "reconciliation pass applied transitions"
            );
        } else {
            debug!(loop_name = self.name(), examined = report.examined, "nothing to reconcile");
        }
        Ok(())
    }
}
