//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryStore**: outbox・dead-letter・reconciliation 対象をまとめて持つ開発用ストア
//!
//! # 本番用実装
//! RDB 実装は別クレートに配置する想定です（このクレートはストレージエンジンを持ちません）。

mod inmem_outbox;
mod inmem_reconcile;
pub mod inmem_store;

pub use self::inmem_store::{InMemoryStore, Transaction};
