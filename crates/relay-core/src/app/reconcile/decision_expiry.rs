//! DecisionExpiry - 期限（デフォルト 48h）を過ぎた承認待ちを Expired にする

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use super::{ReconcileReport, Reconciler};
use crate::config::DecisionExpiryConfig;
use crate::domain::{DecisionExpired, DecisionId, NewEnvelope, PendingDecision, RelayError};
use crate::ports::{DecisionStore, IdGenerator};

pub fn expired_idempotency_key(id: DecisionId) -> String {
    format!("decision-expired:{id}")
}

pub struct DecisionExpiry {
    store: Arc<dyn DecisionStore>,
    ids: Arc<dyn IdGenerator>,
    config: DecisionExpiryConfig,
}

impl DecisionExpiry {
    pub fn new(
        store: Arc<dyn DecisionStore>,
        ids: Arc<dyn IdGenerator>,
        config: DecisionExpiryConfig,
    ) -> Self {
        Self { store, ids, config }
    }

    fn expired_event(
        &self,
        decision: &PendingDecision,
        now: DateTime<Utc>,
    ) -> Result<Option<NewEnvelope>, RelayError> {
        if !self.config.emit_events {
            return Ok(None);
        }
        let event = DecisionExpired {
            id: self.ids.generate_event_id(),
            occurred_on: now,
            decision_id: decision.id,
            project_id: decision.project_id,
            requested_at: decision.requested_at,
        };
        let envelope = NewEnvelope::from_event(&event)?
            .with_idempotency_key(expired_idempotency_key(decision.id));
        Ok(Some(envelope))
    }
}

#[async_trait]
impl Reconciler for DecisionExpiry {
    fn name(&self) -> &'static str {
        "decision-expiry"
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport, RelayError> {
        let deadline = self.config.deadline;
        let cutoff = now
            .checked_sub_signed(deadline)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let expired = self
            .store
            .find_past_deadline(cutoff, self.config.batch_size)
            .await?;
        let mut report = ReconcileReport {
            examined: expired.len(),
            ..ReconcileReport::default()
        };

        for decision in &expired {
            let event = self.expired_event(decision, now)?;
            let emitted = event.is_some();
            if self.store.expire(decision.id, now, deadline, event).await? {
                report.transitioned += 1;
                report.events_enqueued += usize::from(emitted);
                info!(
                    decision_id = %decision.id,
                    project_id = %decision.project_id,
                    requested_at = %decision.requested_at,
                    "decision expired"
                );
            } else {
                report.skipped += 1;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::reconcile::ReconciliationLoop;
    use crate::domain::{DecisionStatus, ProjectId};
    use crate::impls::InMemoryStore;
    use crate::ports::{Clock, FixedClock, UlidGenerator};
    use crate::testing::t0;
    use crate::typed::{Event, PayloadCodec};
    use chrono::TimeDelta;
    use rstest::rstest;

    fn setup() -> (Arc<InMemoryStore>, ReconciliationLoop<DecisionExpiry>) {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(t0()));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let reconciler = DecisionExpiry::new(
            store.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            DecisionExpiryConfig::default(),
        );
        (store, ReconciliationLoop::new(reconciler, clock))
    }

    #[rstest]
    #[case(TimeDelta::hours(72), DecisionStatus::Expired)]
    #[case(TimeDelta::hours(49), DecisionStatus::Expired)]
    #[case(TimeDelta::hours(48), DecisionStatus::Pending)]
    #[case(TimeDelta::hours(1), DecisionStatus::Pending)]
    #[tokio::test]
    async fn default_deadline_is_48_hours(#[case] age: TimeDelta, #[case] expected: DecisionStatus) {
        let (store, pass) = setup();
        let decision = PendingDecision::new(
            DecisionId::random(),
            ProjectId::random(),
            "adopt new vendor",
            t0() - age,
        );
        let id = decision.id;
        store
            .transaction(|tx| {
                tx.upsert_decision(decision);
                Ok(())
            })
            .await
            .unwrap();

        pass.run_once().await.unwrap();

        assert_eq!(store.decision(id).await.unwrap().status, expected);
    }

    #[tokio::test]
    async fn expiry_enqueues_one_event_per_decision() {
        let (store, pass) = setup();
        let mut approved = PendingDecision::new(
            DecisionId::random(),
            ProjectId::random(),
            "already approved",
            t0() - TimeDelta::days(5),
        );
        approved.status = DecisionStatus::Approved;
        let stale = PendingDecision::new(
            DecisionId::random(),
            ProjectId::random(),
            "stale",
            t0() - TimeDelta::days(5),
        );
        let stale_id = stale.id;
        store
            .transaction(|tx| {
                tx.upsert_decision(approved);
                tx.upsert_decision(stale);
                Ok(())
            })
            .await
            .unwrap();

        let report = pass.run_once().await.unwrap();
        assert_eq!(report.transitioned, 1);
        assert_eq!(pass.run_once().await.unwrap().transitioned, 0);

        let envelopes = store.envelopes().await;
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].event_type, DecisionExpired::TYPE);
        let event: DecisionExpired = PayloadCodec::decode(&envelopes[0].payload).unwrap();
        assert_eq!(event.decision_id, stale_id);
        assert_eq!(event.occurred_on, t0());
    }
}
