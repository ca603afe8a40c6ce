//! InMemoryStore の reconciliation 側 port 実装
//!
//! 遷移と event の enqueue は同じ `transaction` 内（どちらか片方だけが残ることはない）。

use std::cmp::Reverse;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use super::inmem_store::InMemoryStore;
use crate::domain::{
    AiQuota, DecisionId, Milestone, MilestoneId, NewEnvelope, OrganizationId, PendingDecision,
    QuotaId, QuotaStatus, RelayError,
};
use crate::ports::{
    ActivationOutcome, DecisionStore, MilestoneStore, OutboxWriter, QuotaActivation, QuotaStore,
};

#[async_trait]
impl MilestoneStore for InMemoryStore {
    async fn find_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Milestone>, RelayError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        let mut overdue: Vec<Milestone> = state
            .milestones
            .values()
            .filter(|m| m.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|m| (m.due_date, m.id));
        overdue.truncate(limit);
        Ok(overdue)
    }

    async fn mark_missed(
        &self,
        id: MilestoneId,
        now: DateTime<Utc>,
        event: Option<NewEnvelope>,
    ) -> Result<bool, RelayError> {
        self.transaction(|tx| {
            let transitioned = tx.milestone_mut(id).is_some_and(|m| m.mark_missed(now));
            if transitioned && let Some(event) = event {
                tx.enqueue_envelope(event)?;
            }
            Ok(transitioned)
        })
        .await
    }
}

#[async_trait]
impl QuotaStore for InMemoryStore {
    async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<AiQuota>, RelayError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        let mut due: Vec<AiQuota> = state
            .quotas
            .values()
            .filter(|q| q.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|q| (Reverse(q.effective_date), q.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn find_active(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<AiQuota>, RelayError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state.active_quota(organization_id).cloned())
    }

    async fn activate(&self, request: QuotaActivation) -> Result<ActivationOutcome, RelayError> {
        let QuotaActivation {
            quota_id,
            expected_active,
            now,
            period_length,
            event,
        } = request;

        self.transaction(|tx| {
            let Some(organization_id) = tx
                .state
                .quotas
                .get(&quota_id)
                .filter(|q| q.status == QuotaStatus::Scheduled)
                .map(|q| q.organization_id)
            else {
                return Ok(ActivationOutcome::NotScheduled);
            };

            // compare-and-swap: 観測した Active quota がまだ Active か
            let current_active = tx.state.active_quota(organization_id).map(|q| q.id);
            if current_active != expected_active {
                return Ok(ActivationOutcome::Conflict { current_active });
            }

            if let Some(previous) = current_active.and_then(|id| tx.quota_mut(id)) {
                previous.supersede(now);
            }
            if let Some(quota) = tx.quota_mut(quota_id) {
                quota.activate(now, period_length);
            }
            if let Some(event) = event {
                tx.enqueue_envelope(event)?;
            }
            Ok(ActivationOutcome::Activated {
                deactivated: current_active,
            })
        })
        .await
    }

    async fn supersede(&self, quota_id: QuotaId, now: DateTime<Utc>) -> Result<bool, RelayError> {
        self.transaction(|tx| {
            Ok(tx
                .quota_mut(quota_id)
                .filter(|q| q.status == QuotaStatus::Scheduled)
                .is_some_and(|q| q.supersede(now)))
        })
        .await
    }
}

#[async_trait]
impl DecisionStore for InMemoryStore {
    async fn find_past_deadline(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PendingDecision>, RelayError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        let mut expired: Vec<PendingDecision> = state
            .decisions
            .values()
            .filter(|d| d.is_past_deadline(cutoff))
            .cloned()
            .collect();
        expired.sort_by_key(|d| (d.requested_at, d.id));
        expired.truncate(limit);
        Ok(expired)
    }

    async fn expire(
        &self,
        id: DecisionId,
        now: DateTime<Utc>,
        deadline: TimeDelta,
        event: Option<NewEnvelope>,
    ) -> Result<bool, RelayError> {
        self.transaction(|tx| {
            let transitioned = tx.decision_mut(id).is_some_and(|d| d.expire(now, deadline));
            if transitioned && let Some(event) = event {
                tx.enqueue_envelope(event)?;
            }
            Ok(transitioned)
        })
        .await
    }
}
