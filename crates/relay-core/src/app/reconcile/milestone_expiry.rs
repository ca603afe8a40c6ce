//! MilestoneExpiry - 期日を過ぎたマイルストーンを Missed にする
//!
//! `Completed` は絶対に付与しません（ユーザー操作のみ）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use super::{ReconcileReport, Reconciler};
use crate::config::MilestoneExpiryConfig;
use crate::domain::{Milestone, MilestoneId, MilestoneMissed, NewEnvelope, RelayError};
use crate::ports::{IdGenerator, MilestoneStore};

pub fn missed_idempotency_key(id: MilestoneId) -> String {
    format!("milestone-missed:{id}")
}

pub struct MilestoneExpiry {
    store: Arc<dyn MilestoneStore>,
    ids: Arc<dyn IdGenerator>,
    config: MilestoneExpiryConfig,
}

impl MilestoneExpiry {
    pub fn new(
        store: Arc<dyn MilestoneStore>,
        ids: Arc<dyn IdGenerator>,
        config: MilestoneExpiryConfig,
    ) -> Self {
        Self { store, ids, config }
    }

    fn missed_event(
        &self,
        milestone: &Milestone,
        now: DateTime<Utc>,
    ) -> Result<Option<NewEnvelope>, RelayError> {
        if !self.config.emit_events {
            return Ok(None);
        }
        let event = MilestoneMissed {
            id: self.ids.generate_event_id(),
            occurred_on: now,
            milestone_id: milestone.id,
            project_id: milestone.project_id,
            name: milestone.name.clone(),
            due_date: milestone.due_date,
        };
        let envelope = NewEnvelope::from_event(&event)?
            .with_idempotency_key(missed_idempotency_key(milestone.id));
        Ok(Some(envelope))
    }
}

#[async_trait]
impl Reconciler for MilestoneExpiry {
    fn name(&self) -> &'static str {
        "milestone-expiry"
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport, RelayError> {
        let overdue = self.store.find_overdue(now, self.config.batch_size).await?;
        let mut report = ReconcileReport {
            examined: overdue.len(),
            ..ReconcileReport::default()
        };

        for milestone in &overdue {
            let event = self.missed_event(milestone, now)?;
            let emitted = event.is_some();
            if self.store.mark_missed(milestone.id, now, event).await? {
                report.transitioned += 1;
                report.events_enqueued += usize::from(emitted);
                info!(
                    milestone_id = %milestone.id,
                    project_id = %milestone.project_id,
                    due_date = %milestone.due_date,
                    "milestone missed"
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
    use crate::domain::{MilestoneStatus, ProjectId};
    use crate::impls::InMemoryStore;
    use crate::ports::{Clock, FixedClock, UlidGenerator};
    use crate::testing::t0;
    use crate::typed::{Event, PayloadCodec};
    use chrono::TimeDelta;

    fn setup(config: MilestoneExpiryConfig) -> (Arc<InMemoryStore>, ReconciliationLoop<MilestoneExpiry>) {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(t0()));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let reconciler = MilestoneExpiry::new(
            store.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            config,
        );
        (store, ReconciliationLoop::new(reconciler, clock))
    }

    async fn seed(store: &InMemoryStore, milestone: Milestone) {
        store
            .transaction(|tx| {
                tx.upsert_milestone(milestone);
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn overdue_pending_milestone_becomes_missed_with_event() {
        let (store, pass) = setup(MilestoneExpiryConfig::default());
        let milestone = Milestone::new(
            MilestoneId::random(),
            ProjectId::random(),
            "public beta",
            t0() - TimeDelta::days(1),
        );
        let id = milestone.id;
        seed(&store, milestone).await;

        let report = pass.run_once().await.unwrap();

        assert_eq!(report.transitioned, 1);
        assert_eq!(report.events_enqueued, 1);
        let stored = store.milestone(id).await.unwrap();
        assert_eq!(stored.status, MilestoneStatus::Missed);
        assert_eq!(stored.missed_at, Some(t0()));

        let envelopes = store.envelopes().await;
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].event_type, MilestoneMissed::TYPE);
        assert_eq!(
            envelopes[0].idempotency_key,
            Some(missed_idempotency_key(id))
        );
        let event: MilestoneMissed = PayloadCodec::decode(&envelopes[0].payload).unwrap();
        assert_eq!(event.milestone_id, id);
        assert_eq!(event.name, "public beta");
    }

    #[tokio::test]
    async fn rerunning_the_pass_is_a_no_op() {
        let (store, pass) = setup(MilestoneExpiryConfig::default());
        let mut in_progress = Milestone::new(
            MilestoneId::random(),
            ProjectId::random(),
            "launch",
            t0() - TimeDelta::hours(2),
        );
        in_progress.status = MilestoneStatus::InProgress;
        seed(&store, in_progress).await;

        assert_eq!(pass.run_once().await.unwrap().transitioned, 1);
        let second = pass.run_once().await.unwrap();
        assert_eq!(second, ReconcileReport::default());
        assert_eq!(store.envelopes().await.len(), 1);
    }

    #[tokio::test]
    async fn completed_and_future_milestones_are_left_alone() {
        let (store, pass) = setup(MilestoneExpiryConfig::default());
        let mut completed = Milestone::new(
            MilestoneId::random(),
            ProjectId::random(),
            "done",
            t0() - TimeDelta::days(3),
        );
        completed.status = MilestoneStatus::Completed;
        let future = Milestone::new(
            MilestoneId::random(),
            ProjectId::random(),
            "later",
            t0() + TimeDelta::days(3),
        );
        let (completed_id, future_id) = (completed.id, future.id);
        seed(&store, completed).await;
        seed(&store, future).await;

        assert_eq!(pass.run_once().await.unwrap().examined, 0);
        assert_eq!(
            store.milestone(completed_id).await.unwrap().status,
            MilestoneStatus::Completed
        );
        assert_eq!(
            store.milestone(future_id).await.unwrap().status,
            MilestoneStatus::Pending
        );
    }

    #[tokio::test]
    async fn events_can_be_disabled_and_batch_is_bounded() {
        let config = MilestoneExpiryConfig {
            batch_size: 2,
            emit_events: false,
            ..MilestoneExpiryConfig::default()
        };
        let (store, pass) = setup(config);
        let project = ProjectId::random();
        for days in 1..=3 {
            let milestone = Milestone::new(
                MilestoneId::random(),
                project,
                format!("m{days}"),
                t0() - TimeDelta::days(days),
            );
            seed(&store, milestone).await;
        }

        let first = pass.run_once().await.unwrap();
        assert_eq!(first.transitioned, 2);
        assert_eq!(first.events_enqueued, 0);
        assert_eq!(pass.run_once().await.unwrap().transitioned, 1);
        assert!(store.envelopes().await.is_empty());
    }
}
