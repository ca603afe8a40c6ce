//! LoopGroup - 全ループの起動と停止
//!
//! # 学習ポイント
//! - 1 つの watch::Sender を全ループで共有
//! - `shutdown_and_join` で実行中のイテレーションの完了を待つ

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

use super::poll::{PollTask, run_until_shutdown};

/// Loop group handle.
/// - `request_shutdown` で全ループに停止を通知（実行中の処理は強制キャンセルしない）
/// - drop すると sender も drop されるので、ループは次の待機で止まる
pub struct LoopGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<(&'static str, JoinHandle<()>)>,
}

impl LoopGroup {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Vec::new(),
        }
    }

    pub fn spawn(&mut self, task: Arc<dyn PollTask>) {
        let name = task.name();
        let rx = self.shutdown_tx.subscribe();
        let join = tokio::spawn(run_until_shutdown(task, rx));
        self.joins.push((name, join));
    }

    pub fn loop_names(&self) -> Vec<&'static str> {
        self.joins.iter().map(|(name, _)| *name).collect()
    }

    pub fn request_shutdown(&self) {
        // send_replace: receiver がいなくても値は更新される
        self.shutdown_tx.send_replace(true);
    }

    /// Shutdown and wait for every loop.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for (name, join) in self.joins {
            if let Err(err) = join.await {
                error!(loop_name = name, error = %err, "loop task panicked or was cancelled");
            }
        }
    }
}

impl Default for LoopGroup {
    fn default() -> Self {
        Self::new()
    }
}
