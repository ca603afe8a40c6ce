//! Status - 運用者向けのスナップショット
//!
//! 件数と直近の dead-letter を JSON で出せる形にまとめます。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{DeadLetterId, DeadLetterRecord, EnvelopeId, RelayError};
use crate::ports::{DeadLetterStore, OutboxCounts, OutboxStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetterSummary {
    pub id: DeadLetterId,
    pub original_envelope_id: EnvelopeId,
    pub event_type: String,
    pub attempts: usize,
    pub last_error: Option<String>,
    pub moved_at: DateTime<Utc>,
}

impl From<&DeadLetterRecord> for DeadLetterSummary {
    fn from(record: &DeadLetterRecord) -> Self {
        Self {
            id: record.id,
            original_envelope_id: record.original_envelope_id,
            event_type: record.event_type.clone(),
            attempts: record.attempts(),
            last_error: record.failure_history.last().cloned(),
            moved_at: record.moved_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub collected_at: DateTime<Utc>,
    pub outbox: OutboxCounts,
    pub dead_letters: usize,
    /// Most recent first.
    pub recent_dead_letters: Vec<DeadLetterSummary>,
}

impl RelayStatus {
    pub async fn collect(
        outbox: &dyn OutboxStore,
        dead_letters: &dyn DeadLetterStore,
        now: DateTime<Utc>,
        recent_limit: usize,
    ) -> Result<Self, RelayError> {
        let counts = outbox.counts(now).await?;
        let total = dead_letters.count().await?;
        let recent = dead_letters.list(recent_limit).await?;
        Ok(Self {
            collected_at: now,
            outbox: counts,
            dead_letters: total,
            recent_dead_letters: recent.iter().map(DeadLetterSummary::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::NewEnvelope;
    use crate::impls::InMemoryStore;
    use crate::ports::{FixedClock, OutboxWriter};
    use crate::testing::t0;

    #[tokio::test]
    async fn collects_counts_and_recent_dead_letters() {
        let store = InMemoryStore::new(Arc::new(FixedClock::new(t0())));
        let (done, dead, _pending) = store
            .transaction(|tx| {
                Ok((
                    tx.enqueue_envelope(NewEnvelope::new("a.v1", "{}"))?,
                    tx.enqueue_envelope(NewEnvelope::new("b.v1", "{}"))?,
                    tx.enqueue_envelope(NewEnvelope::new("c.v1", "{}"))?,
                ))
            })
            .await
            .unwrap();
        store.mark_processed(done, t0()).await.unwrap();
        store.move_to_dead_letter(dead, 0, "gave up", t0()).await.unwrap();

        let status = RelayStatus::collect(&store, &store, t0(), 5).await.unwrap();

        assert_eq!(status.outbox.processed, 1);
        assert_eq!(status.outbox.pending, 1);
        assert_eq!(status.dead_letters, 1);
        assert_eq!(status.recent_dead_letters[0].event_type, "b.v1");
        assert_eq!(status.recent_dead_letters[0].last_error.as_deref(), Some("gave up"));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["outbox"]["processed"], 1);
        assert_eq!(json["dead_letters"], 1);
    }
}
