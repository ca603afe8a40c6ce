//! OutboxEnvelope - 信頼配送の 1 単位
//!
//! # ライフサイクル
//! - 作成: ビジネストランザクション内で `OutboxWriter::enqueue`（状態変更と同一コミット）
//! - 更新: Dispatch Loop のみ
//! - 終了: 成功（processed_at が立つ）または dead-letter への移送（行ごと削除）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::EnvelopeId;
use crate::typed::codec::{CodecError, PayloadCodec};
use crate::typed::event::Event;

/// Producer 側の入力（id と時刻はストアが付与する）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnvelope {
    pub event_type: String,
    pub payload: String,
    pub idempotency_key: Option<String>,
}

impl NewEnvelope {
    pub fn new(event_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
            idempotency_key: None,
        }
    }

    pub fn from_event<E: Event>(event: &E) -> Result<Self, CodecError> {
        Ok(Self::new(E::TYPE, PayloadCodec::encode(event)?))
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Persisted outbox row.
///
/// Invariants:
/// - `processed_at` is set at most once and never cleared.
/// - `retry_count` never decreases.
/// - While the row exists, `retry_count < max_attempts`; reaching the limit
///   moves it to the dead-letter table instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEnvelope {
    pub id: EnvelopeId,
    pub event_type: String,
    pub payload: String,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Every recorded error, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_history: Vec<String>,
}

impl OutboxEnvelope {
    pub fn new(id: EnvelopeId, new: NewEnvelope, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            event_type: new.event_type,
            payload: new.payload,
            idempotency_key: new.idempotency_key,
            created_at,
            processed_at: None,
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
            failure_history: Vec::new(),
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// `processed_at is null AND retry_count < max AND (next_retry_at is null OR next_retry_at <= now)`
    pub fn is_dispatchable(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        !self.is_processed()
            && self.retry_count < max_attempts
            && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// 成功を記録。すでに processed なら何もしない（false を返す）
    pub fn mark_processed(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_processed() {
            return false;
        }
        self.processed_at = Some(now);
        true
    }

    /// 失敗を記録して次回リトライ時刻を設定
    pub fn record_failure(&mut self, error: impl Into<String>, next_retry_at: DateTime<Utc>) {
        let error = error.into();
        self.retry_count += 1;
        self.next_retry_at = Some(next_retry_at);
        self.failure_history.push(error.clone());
        self.last_error = Some(error);
    }
}
