//! relay-core
//!
//! Transactional outbox と時間起因の reconciliation loop。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope, dead_letter, retry, events, milestone, quota, approval, errors）
//! - **ports**: 抽象化レイヤー（OutboxStore, DeadLetterStore, 各 reconciliation store, Clock, IdGenerator）
//! - **app**: ループ本体（dispatch_loop, reconcile, group, builder, status）
//! - **typed**: 型付き Event API（Event trait, EventHandler trait, EventRegistry, PayloadCodec）
//! - **impls**: 実装（InMemoryStore）
//! - **config**: RelayConfig（デフォルト値、検証、環境変数）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

#[cfg(test)]
pub(crate) mod testing;

pub use self::app::{LoopGroup, Relay, RelayBuilder, RelayDeps, RelayStatus};
pub use self::config::RelayConfig;
pub use self::domain::{ErrorKind, RelayError};
