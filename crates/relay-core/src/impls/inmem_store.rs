//! InMemoryStore - 開発・テスト用のストア
//!
//! # 学習ポイント
//! - tokio::sync::Mutex で状態全体を保護（ロックを跨いで handler を await しない）
//! - clone-and-swap によるトランザクション（closure が Err なら何も残らない）
//! - 1 つの状態に outbox・dead-letter・業務エンティティを同居させ、同一コミットを再現
//!
//! port 実装は `inmem_outbox`（配送側）と `inmem_reconcile`（reconciliation 側）にあります。
//!
//! `transaction` はコミットごとに状態全体（outbox・dead-letter・全エンティティ）を複製します。
//! 件数に比例したコストがかかるので、開発・テスト規模のデータ量を前提にしています。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    AiQuota, DeadLetterRecord, DecisionId, EnvelopeId, Milestone, MilestoneId, NewEnvelope,
    OrganizationId, OutboxEnvelope, PendingDecision, QuotaId, RelayError,
};
use crate::ports::{Clock, IdGenerator, OutboxWriter, UlidGenerator};

/// Outbox row plus its insertion sequence (tie-break for equal `created_at`).
#[derive(Debug, Clone)]
pub(super) struct OutboxRow {
    pub(super) seq: u64,
    pub(super) envelope: OutboxEnvelope,
}

#[derive(Debug, Clone, Default)]
pub(super) struct StoreState {
    pub(super) outbox: HashMap<EnvelopeId, OutboxRow>,
    /// Moved order (oldest first).
    pub(super) dead_letters: Vec<DeadLetterRecord>,
    pub(super) milestones: HashMap<MilestoneId, Milestone>,
    pub(super) quotas: HashMap<QuotaId, AiQuota>,
    pub(super) decisions: HashMap<DecisionId, PendingDecision>,
    next_seq: u64,
}

impl StoreState {
    pub(super) fn active_quota(&self, organization_id: OrganizationId) -> Option<&AiQuota> {
        self.quotas
            .values()
            .find(|q| q.organization_id == organization_id && q.is_active())
    }

    pub(super) fn insert_envelope(
        &mut self,
        id: EnvelopeId,
        new: NewEnvelope,
        created_at: DateTime<Utc>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.outbox.insert(
            id,
            OutboxRow {
                seq,
                envelope: OutboxEnvelope::new(id, new, created_at),
            },
        );
    }
}

/// InMemoryStore は全 port を実装する開発用ストア
///
/// # 使用例
/// ```ignore
/// let store = Arc::new(InMemoryStore::new(Arc::new(SystemClock)));
///
/// // ビジネストランザクション: 状態変更と envelope は一緒にコミットされる
/// store.transaction(|tx| {
///     tx.upsert_milestone(milestone);
///     tx.enqueue_event(&event, Some(key))
/// }).await?;
/// ```
pub struct InMemoryStore {
    pub(super) state: Mutex<StoreState>,
    pub(super) ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::with_id_generator(clock, ids)
    }

    pub fn with_id_generator(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            ids,
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// false にすると全操作が `RelayError::Store` を返す（接続断の再現）
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub(super) fn ensure_available(&self) -> Result<(), RelayError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RelayError::store("in-memory store is offline"))
        }
    }

    /// Runs `f` against a working copy of the state and commits it only when
    /// `f` returns `Ok`.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T, RelayError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, RelayError> + Send,
        T: Send,
    {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let mut working = state.clone();
        let mut tx = Transaction {
            state: &mut working,
            ids: self.ids.as_ref(),
            now,
        };
        let value = f(&mut tx)?;

        *state = working;
        Ok(value)
    }

    /// Every envelope still in the outbox, in insertion order.
    pub async fn envelopes(&self) -> Vec<OutboxEnvelope> {
        let state = self.state.lock().await;
        let mut rows: Vec<&OutboxRow> = state.outbox.values().collect();
        rows.sort_by_key(|row| row.seq);
        rows.into_iter().map(|row| row.envelope.clone()).collect()
    }

    pub async fn milestone(&self, id: MilestoneId) -> Option<Milestone> {
        self.state.lock().await.milestones.get(&id).cloned()
    }

    pub async fn quota(&self, id: QuotaId) -> Option<AiQuota> {
        self.state.lock().await.quotas.get(&id).cloned()
    }

    pub async fn quotas(&self) -> Vec<AiQuota> {
        self.state.lock().await.quotas.values().cloned().collect()
    }

    pub async fn decision(&self, id: DecisionId) -> Option<PendingDecision> {
        self.state.lock().await.decisions.get(&id).cloned()
    }
}

/// ビジネストランザクションのハンドル
///
/// `OutboxWriter` を実装しているので、状態変更と同じ closure 内で envelope を積めます。
pub struct Transaction<'a> {
    pub(super) state: &'a mut StoreState,
    ids: &'a dyn IdGenerator,
    now: DateTime<Utc>,
}

impl Transaction<'_> {
    /// Commit timestamp (used as `created_at` for enqueued envelopes).
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn upsert_milestone(&mut self, milestone: Milestone) {
        self.state.milestones.insert(milestone.id, milestone);
    }

    pub fn milestone_mut(&mut self, id: MilestoneId) -> Option<&mut Milestone> {
        self.state.milestones.get_mut(&id)
    }

    pub fn upsert_quota(&mut self, quota: AiQuota) {
        self.state.quotas.insert(quota.id, quota);
    }

    pub fn quota_mut(&mut self, id: QuotaId) -> Option<&mut AiQuota> {
        self.state.quotas.get_mut(&id)
    }

    pub fn upsert_decision(&mut self, decision: PendingDecision) {
        self.state.decisions.insert(decision.id, decision);
    }

    pub fn decision_mut(&mut self, id: DecisionId) -> Option<&mut PendingDecision> {
        self.state.decisions.get_mut(&id)
    }
}

impl OutboxWriter for Transaction<'_> {
    fn enqueue(
        &mut self,
        event_type: &str,
        payload: String,
        idempotency_key: Option<String>,
    ) -> Result<EnvelopeId, RelayError> {
        let id = self.ids.generate_envelope_id();
        let new = NewEnvelope {
            event_type: event_type.to_string(),
            payload,
            idempotency_key,
        };
        self.state.insert_envelope(id, new, self.now);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProjectId;
    use crate::ports::FixedClock;
    use crate::testing::{t0, test_event};
    use chrono::TimeDelta;

    fn store() -> InMemoryStore {
        InMemoryStore::new(Arc::new(FixedClock::new(t0())))
    }

    #[tokio::test]
    async fn committed_transaction_persists_state_and_envelope_together() {
        let store = store();
        let milestone = Milestone::new(
            MilestoneId::random(),
            ProjectId::random(),
            "beta",
            t0() + TimeDelta::days(7),
        );
        let milestone_id = milestone.id;

        let envelope_id = store
            .transaction(|tx| {
                tx.upsert_milestone(milestone);
                tx.enqueue_event(&test_event(1), Some("k-1".to_string()))
            })
            .await
            .unwrap();

        assert!(store.milestone(milestone_id).await.is_some());
        let envelopes = store.envelopes().await;
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].id, envelope_id);
        assert_eq!(envelopes[0].created_at, t0());
        assert_eq!(envelopes[0].idempotency_key.as_deref(), Some("k-1"));
    }

    #[tokio::test]
    async fn failed_transaction_leaves_no_trace() {
        let store = store();
        let milestone = Milestone::new(MilestoneId::random(), ProjectId::random(), "beta", t0());
        let milestone_id = milestone.id;

        let result: Result<(), _> = store
            .transaction(|tx| {
                tx.upsert_milestone(milestone);
                tx.enqueue_event(&test_event(1), None)?;
                Err(RelayError::handler("business rule rejected the change"))
            })
            .await;

        assert!(result.is_err());
        assert!(store.milestone(milestone_id).await.is_none());
        assert!(store.envelopes().await.is_empty());
    }

    #[tokio::test]
    async fn offline_store_rejects_transactions() {
        let store = store();
        store.set_available(false);

        let err = store.transaction(|_tx| Ok(())).await.unwrap_err();
        assert!(matches!(err, RelayError::Store(_)));

        store.set_available(true);
        assert!(store.transaction(|_tx| Ok(())).await.is_ok());
    }
}
