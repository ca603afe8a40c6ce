//! DeadLetterRecord - リトライ予算を使い切った envelope の不変スナップショット
//!
//! 移送ステップでのみ作られ、このサブシステムでは更新も自動再処理もしません。
//! 手動 replay は外部の運用ツールの責務です。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::OutboxEnvelope;
use super::ids::{DeadLetterId, EnvelopeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: DeadLetterId,
    pub original_envelope_id: EnvelopeId,
    pub event_type: String,
    pub payload: String,
    pub idempotency_key: Option<String>,
    /// One entry per failed dispatch attempt, oldest first.
    pub failure_history: Vec<String>,
    pub original_created_at: DateTime<Utc>,
    pub moved_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    /// envelope の履歴に最後のエラーを足して dead-letter を作る
    pub fn from_envelope(
        id: DeadLetterId,
        envelope: OutboxEnvelope,
        final_error: impl Into<String>,
        moved_at: DateTime<Utc>,
    ) -> Self {
        let mut failure_history = envelope.failure_history;
        failure_history.push(final_error.into());
        Self {
            id,
            original_envelope_id: envelope.id,
            event_type: envelope.event_type,
            payload: envelope.payload,
            idempotency_key: envelope.idempotency_key,
            failure_history,
            original_created_at: envelope.created_at,
            moved_at,
        }
    }

    pub fn attempts(&self) -> usize {
        self.failure_history.len()
    }
}
