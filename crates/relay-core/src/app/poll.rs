//! PollTask - 固定間隔の協調ポーリング
//!
//! # 学習ポイント
//! - watch channel による shutdown 通知
//! - tokio::select! で sleep と shutdown を競合させる
//!
//! shutdown はイテレーションの間でのみ観測します。実行中のバッチは中断しません。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::domain::RelayError;

/// 1 つのループが繰り返す処理
#[async_trait]
pub trait PollTask: Send + Sync {
    fn name(&self) -> &'static str;

    fn poll_interval(&self) -> Duration;

    /// One iteration. An error abandons this iteration only; the next one
    /// runs on schedule.
    async fn tick(&self) -> Result<(), RelayError>;
}

fn saturating_millis(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

pub async fn run_until_shutdown(task: Arc<dyn PollTask>, mut shutdown_rx: watch::Receiver<bool>) {
    let interval = task.poll_interval();
    info!(
        loop_name = task.name(),
        interval_ms = saturating_millis(interval),
        "loop started"
    );

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        if let Err(err) = task.tick().await {
            warn!(
                loop_name = task.name(),
                error = %err,
                kind = ?err.kind(),
                "iteration abandoned"
            );
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender が drop されたら止める
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!(loop_name = task.name(), "loop stopped");
}
