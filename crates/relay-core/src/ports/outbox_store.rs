//! OutboxStore port - outbox テーブルの正本
//!
//! # 設計原則
//! - enqueue は状態変更と同一トランザクション内（`OutboxWriter`）
//! - 更新は Dispatch Loop のみ
//! - すべての更新は条件付き（別インスタンスと競合しても行を壊さない）
//!
//! # 実装
//! - `InMemoryStore`（開発・テスト用）
//! - 本番の RDB 実装は別クレートで `SELECT ... FOR UPDATE SKIP LOCKED` 等の claim を追加する想定

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DeadLetterRecord, EnvelopeId, NewEnvelope, OutboxEnvelope, RelayError};
use crate::typed::event::Event;

/// Producer contract.
///
/// Implemented by a store's transaction handle: envelopes written through it
/// become durable together with the rest of that transaction, or not at all.
pub trait OutboxWriter {
    fn enqueue(
        &mut self,
        event_type: &str,
        payload: String,
        idempotency_key: Option<String>,
    ) -> Result<EnvelopeId, RelayError>;

    fn enqueue_envelope(&mut self, envelope: NewEnvelope) -> Result<EnvelopeId, RelayError> {
        self.enqueue(
            &envelope.event_type,
            envelope.payload,
            envelope.idempotency_key,
        )
    }

    fn enqueue_event<E: Event>(
        &mut self,
        event: &E,
        idempotency_key: Option<String>,
    ) -> Result<EnvelopeId, RelayError>
    where
        Self: Sized,
    {
        let envelope = NewEnvelope::from_event(event)?;
        self.enqueue(E::TYPE, envelope.payload, idempotency_key)
    }
}

/// Row counts by lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxCounts {
    /// Never attempted, or due for retry now.
    pub pending: usize,
    /// Failed at least once and waiting for `next_retry_at`.
    pub retry_scheduled: usize,
    pub processed: usize,
}

/// Dispatch-side operations on the outbox table.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Up to `batch_size` dispatchable envelopes, oldest `created_at` first.
    async fn fetch_dispatch_candidates(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxEnvelope>, RelayError>;

    /// Unprocessed envelopes whose `retry_count` already reached `max_attempts`
    /// (left behind when the budget was lowered between runs), oldest first.
    async fn fetch_exhausted(
        &self,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<OutboxEnvelope>, RelayError>;

    /// Has another envelope with this key already been processed?
    async fn is_idempotency_key_processed(
        &self,
        key: &str,
        excluding: EnvelopeId,
    ) -> Result<bool, RelayError>;

    /// Sets `processed_at` if still null. Returns false when it was already set
    /// (or the row is gone).
    async fn mark_processed(&self, id: EnvelopeId, now: DateTime<Utc>) -> Result<bool, RelayError>;

    /// Increments `retry_count` and records the error, only if the row is
    /// unprocessed and `retry_count` still equals `expected_retry_count`.
    async fn record_failure(
        &self,
        id: EnvelopeId,
        expected_retry_count: u32,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<bool, RelayError>;

    /// Atomically inserts the dead-letter record and deletes the envelope.
    /// Returns `None` if the row was already processed, moved, or changed
    /// concurrently (`retry_count != expected_retry_count`).
    async fn move_to_dead_letter(
        &self,
        id: EnvelopeId,
        expected_retry_count: u32,
        final_error: &str,
        moved_at: DateTime<Utc>,
    ) -> Result<Option<DeadLetterRecord>, RelayError>;

    async fn get(&self, id: EnvelopeId) -> Result<Option<OutboxEnvelope>, RelayError>;

    async fn counts(&self, now: DateTime<Utc>) -> Result<OutboxCounts, RelayError>;
}
