//! QuotaActivationReconciler - effective_date を迎えた AI quota を有効化する
//!
//! # 不変条件
//! 1 組織につき Active な quota は高々 1 つ。
//!
//! # 並行パス
//! 有効化は「観測した Active quota」を条件にした compare-and-swap です。
//! 別のパスが先に切り替えていたら読み直し、`max_conflict_retries` 回まで再試行します。
//! 同じ quota をすでに別のパスが有効化していた場合は `NotScheduled` で何もしません。
//!
//! 1 パスで同じ組織の quota が複数到来していたら、最新のものだけを有効化し、
//! 古いものはイベントを出さずに `Superseded` にします。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{ReconcileReport, Reconciler};
use crate::config::QuotaActivationConfig;
use crate::domain::{AiQuota, NewEnvelope, OrganizationId, QuotaActivated, QuotaId, RelayError};
use crate::ports::{ActivationOutcome, IdGenerator, QuotaActivation, QuotaStore};

pub fn activated_idempotency_key(id: QuotaId) -> String {
    format!("quota-activated:{id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Activated { emitted: bool },
    /// A newer quota is already active; this one will never be.
    Superseded,
    /// Another pass handled it.
    AlreadyHandled,
    GaveUp,
}

pub struct QuotaActivationReconciler {
    store: Arc<dyn QuotaStore>,
    ids: Arc<dyn IdGenerator>,
    config: QuotaActivationConfig,
}

impl QuotaActivationReconciler {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        ids: Arc<dyn IdGenerator>,
        config: QuotaActivationConfig,
    ) -> Self {
        Self { store, ids, config }
    }

    fn activated_event(
        &self,
        quota: &AiQuota,
        previous: Option<QuotaId>,
        now: DateTime<Utc>,
    ) -> Result<Option<NewEnvelope>, RelayError> {
        if !self.config.emit_events {
            return Ok(None);
        }
        let (period_start, period_end) = quota.period_window(self.config.period_length);
        let event = QuotaActivated {
            id: self.ids.generate_event_id(),
            occurred_on: now,
            organization_id: quota.organization_id,
            quota_id: quota.id,
            previous_quota_id: previous,
            period_start,
            period_end,
        };
        let envelope = NewEnvelope::from_event(&event)?
            .with_idempotency_key(activated_idempotency_key(quota.id));
        Ok(Some(envelope))
    }

    async fn supersede_stale(
        &self,
        quota: &AiQuota,
        reason: &'static str,
        now: DateTime<Utc>,
    ) -> Result<Step, RelayError> {
        if !self.store.supersede(quota.id, now).await? {
            return Ok(Step::AlreadyHandled);
        }
        info!(
            quota_id = %quota.id,
            organization_id = %quota.organization_id,
            reason,
            "scheduled quota superseded without activation"
        );
        Ok(Step::Superseded)
    }

    async fn activate_one(&self, quota: &AiQuota, now: DateTime<Utc>) -> Result<Step, RelayError> {
        let mut conflicts = 0;
        loop {
            let active = self.store.find_active(quota.organization_id).await?;
            if let Some(active) = &active
                && active.effective_date > quota.effective_date
            {
                return self.supersede_stale(quota, "older than the active quota", now).await;
            }

            let expected_active = active.as_ref().map(|q| q.id);
            let event = self.activated_event(quota, expected_active, now)?;
            let emitted = event.is_some();
            let outcome = self
                .store
                .activate(QuotaActivation {
                    quota_id: quota.id,
                    expected_active,
                    now,
                    period_length: self.config.period_length,
                    event,
                })
                .await?;

            match outcome {
                ActivationOutcome::Activated { deactivated } => {
                    info!(
                        quota_id = %quota.id,
                        organization_id = %quota.organization_id,
                        deactivated = ?deactivated.map(|id| id.to_string()),
                        "quota activated"
                    );
                    return Ok(Step::Activated { emitted });
                }
                ActivationOutcome::NotScheduled => return Ok(Step::AlreadyHandled),
                ActivationOutcome::Conflict { current_active } => {
                    conflicts += 1;
                    if conflicts > self.config.max_conflict_retries {
                        warn!(
                            quota_id = %quota.id,
                            organization_id = %quota.organization_id,
                            conflicts,
                            "active quota kept changing; leaving activation to the next pass"
                        );
                        return Ok(Step::GaveUp);
                    }
                    debug!(
                        quota_id = %quota.id,
                        current_active = ?current_active.map(|id| id.to_string()),
                        "active quota changed concurrently; re-reading"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl Reconciler for QuotaActivationReconciler {
    fn name(&self) -> &'static str {
        "quota-activation"
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport, RelayError> {
        let due = self.store.find_due(now, self.config.batch_size).await?;
        let mut report = ReconcileReport {
            examined: due.len(),
            ..ReconcileReport::default()
        };

        // 同じ組織で期日到来済みの quota が複数あれば、有効化するのは最新の 1 件だけ
        let mut newest_due: HashMap<OrganizationId, DateTime<Utc>> = HashMap::new();
        for quota in &due {
            newest_due
                .entry(quota.organization_id)
                .and_modify(|latest| *latest = (*latest).max(quota.effective_date))
                .or_insert(quota.effective_date);
        }

        for quota in &due {
            let overtaken = newest_due
                .get(&quota.organization_id)
                .is_some_and(|latest| *latest > quota.effective_date);
            let step = if overtaken {
                self.supersede_stale(quota, "a newer quota is also due", now)
                    .await?
            } else {
                self.activate_one(quota, now).await?
            };
            match step {
                Step::Activated { emitted } => {
                    report.transitioned += 1;
                    report.events_enqueued += usize::from(emitted);
                }
                Step::Superseded => report.transitioned += 1,
                Step::AlreadyHandled | Step::GaveUp => report.skipped += 1,
            }
        }
        Ok(report)
    }
}
