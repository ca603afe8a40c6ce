//! InMemoryStore の配送側 port 実装（OutboxStore / DeadLetterStore）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::inmem_store::{InMemoryStore, OutboxRow};
use crate::domain::{DeadLetterId, DeadLetterRecord, EnvelopeId, OutboxEnvelope, RelayError};
use crate::ports::{DeadLetterStore, OutboxCounts, OutboxStore};

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn fetch_dispatch_candidates(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxEnvelope>, RelayError> {
        self.ensure_available()?;
        let state = self.state.lock().await;

        let mut rows: Vec<&OutboxRow> = state
            .outbox
            .values()
            .filter(|row| row.envelope.is_dispatchable(now, max_attempts))
            .collect();
        rows.sort_by_key(|row| (row.envelope.created_at, row.seq));

        Ok(rows
            .into_iter()
            .take(batch_size)
            .map(|row| row.envelope.clone())
            .collect())
    }

    async fn fetch_exhausted(
        &self,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<OutboxEnvelope>, RelayError> {
        self.ensure_available()?;
        let state = self.state.lock().await;

        let mut rows: Vec<&OutboxRow> = state
            .outbox
            .values()
            .filter(|row| !row.envelope.is_processed() && row.envelope.retry_count >= max_attempts)
            .collect();
        rows.sort_by_key(|row| (row.envelope.created_at, row.seq));

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|row| row.envelope.clone())
            .collect())
    }

    async fn is_idempotency_key_processed(
        &self,
        key: &str,
        excluding: EnvelopeId,
    ) -> Result<bool, RelayError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state.outbox.values().any(|row| {
            row.envelope.id != excluding
                && row.envelope.is_processed()
                && row.envelope.idempotency_key.as_deref() == Some(key)
        }))
    }

    async fn mark_processed(&self, id: EnvelopeId, now: DateTime<Utc>) -> Result<bool, RelayError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        Ok(state
            .outbox
            .get_mut(&id)
            .is_some_and(|row| row.envelope.mark_processed(now)))
    }

    async fn record_failure(
        &self,
        id: EnvelopeId,
        expected_retry_count: u32,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<bool, RelayError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let Some(row) = state.outbox.get_mut(&id) else {
            return Ok(false);
        };
        if row.envelope.is_processed() || row.envelope.retry_count != expected_retry_count {
            return Ok(false);
        }
        row.envelope.record_failure(error, next_retry_at);
        Ok(true)
    }

    async fn move_to_dead_letter(
        &self,
        id: EnvelopeId,
        expected_retry_count: u32,
        final_error: &str,
        moved_at: DateTime<Utc>,
    ) -> Result<Option<DeadLetterRecord>, RelayError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        let unchanged = state.outbox.get(&id).is_some_and(|row| {
            !row.envelope.is_processed() && row.envelope.retry_count == expected_retry_count
        });
        if !unchanged {
            return Ok(None);
        }
        let Some(row) = state.outbox.remove(&id) else {
            return Ok(None);
        };

        // 挿入と削除は同じロック区間内 = 1 コミット
        let record = DeadLetterRecord::from_envelope(
            self.ids.generate_dead_letter_id(),
            row.envelope,
            final_error,
            moved_at,
        );
        state.dead_letters.push(record.clone());
        Ok(Some(record))
    }

    async fn get(&self, id: EnvelopeId) -> Result<Option<OutboxEnvelope>, RelayError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state.outbox.get(&id).map(|row| row.envelope.clone()))
    }

    async fn counts(&self, now: DateTime<Utc>) -> Result<OutboxCounts, RelayError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        let mut counts = OutboxCounts::default();
        for row in state.outbox.values() {
            let envelope = &row.envelope;
            if envelope.is_processed() {
                counts.processed += 1;
            } else if envelope.next_retry_at.is_some_and(|at| at > now) {
                counts.retry_scheduled += 1;
            } else {
                counts.pending += 1;
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryStore {
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, RelayError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state.dead_letters.iter().rev().take(limit).cloned().collect())
    }

    async fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterRecord>, RelayError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state.dead_letters.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_envelope(
        &self,
        envelope_id: EnvelopeId,
    ) -> Result<Option<DeadLetterRecord>, RelayError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state
            .dead_letters
            .iter()
            .find(|r| r.original_envelope_id == envelope_id)
            .cloned())
    }

    async fn count(&self) -> Result<usize, RelayError> {
        self.ensure_available()?;
        Ok(self.state.lock().await.dead_letters.len())
    }
}
