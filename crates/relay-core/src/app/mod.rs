//! App - アプリケーション層
//!
//! ports を組み合わせてループを実装します。
//!
//! # 主要コンポーネント
//! - **RelayBuilder**: handler 登録とワイヤリング（Fail-fast 検証）
//! - **OutboxDispatchLoop**: outbox → handler の配送、リトライ、dead-letter
//! - **reconcile**: マイルストーン期限切れ / quota 有効化 / 承認期限切れ
//! - **LoopGroup**: 全ループの起動と graceful shutdown
//! - **RelayStatus**: 運用者向けのスナップショット

pub mod builder;
pub mod dispatch_loop;
pub mod group;
pub mod poll;
pub mod reconcile;
pub mod status;

pub use self::builder::{BuildError, Relay, RelayBuilder, RelayDeps};
pub use self::dispatch_loop::{DispatchReport, OutboxDispatchLoop};
pub use self::group::LoopGroup;
pub use self::poll::PollTask;
pub use self::reconcile::{ReconcileReport, Reconciler, ReconciliationLoop};
pub use self::status::{DeadLetterSummary, RelayStatus};
