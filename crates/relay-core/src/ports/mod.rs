//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は永続化ストアへのインターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - RDB が source of truth（正本）
//! - 状態遷移と outbox への追加は同一トランザクション
//! - 分散ロックは持たない（複数レプリカの正しさは冪等性に依存）

pub mod clock;
pub mod dead_letter_store;
pub mod decision_store;
pub mod id_generator;
pub mod milestone_store;
pub mod outbox_store;
pub mod quota_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dead_letter_store::DeadLetterStore;
pub use self::decision_store::DecisionStore;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::milestone_store::MilestoneStore;
pub use self::outbox_store::{OutboxCounts, OutboxStore, OutboxWriter};
pub use self::quota_store::{ActivationOutcome, QuotaActivation, QuotaStore};
