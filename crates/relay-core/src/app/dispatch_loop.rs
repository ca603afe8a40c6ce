//! OutboxDispatchLoop - outbox の envelope を handler に配送
//!
//! # フロー（1 イテレーション）
//! 1. `fetch_dispatch_candidates` で最大 batch_size 件を取得（created_at 昇順）
//! 2. 1 件ずつ順番に処理
//!    - idempotency key が処理済みなら dispatch せずに processed
//!    - それ以外は registry で dispatch → 成功 / 失敗（リトライ or dead-letter）を記録
//!
//! ストアの障害はイテレーションごと中断します（書き込み前に失敗するので何も壊れない）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::poll::PollTask;
use crate::config::DispatchConfig;
use crate::domain::{OutboxEnvelope, RelayError};
use crate::ports::{Clock, OutboxStore};
use crate::typed::EventRegistry;

/// Result of one iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub fetched: usize,
    pub processed: usize,
    /// Marked processed through an already-processed idempotency key.
    pub suppressed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// The row changed under us (another instance got there first).
    pub skipped: usize,
}

impl DispatchReport {
    fn record(&mut self, step: Step) {
        match step {
            Step::Processed => self.processed += 1,
            Step::Suppressed => self.suppressed += 1,
            Step::Retried => self.retried += 1,
            Step::DeadLettered => self.dead_lettered += 1,
            Step::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Processed,
    Suppressed,
    Retried,
    DeadLettered,
    Skipped,
}

pub struct OutboxDispatchLoop {
    store: Arc<dyn OutboxStore>,
    registry: Arc<EventRegistry>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl OutboxDispatchLoop {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        registry: Arc<EventRegistry>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// One poll iteration.
    pub async fn run_once(&self) -> Result<DispatchReport, RelayError> {
        let mut report = DispatchReport::default();
        for envelope in self
            .store
            .fetch_exhausted(self.config.retry.max_attempts, self.config.batch_size)
            .await?
        {
            let step = self.retire_exhausted(&envelope).await?;
            report.record(step);
        }

        let candidates = self
            .store
            .fetch_dispatch_candidates(
                self.clock.now(),
                self.config.batch_size,
                self.config.retry.max_attempts,
            )
            .await?;

        report.fetched = candidates.len();
        for envelope in &candidates {
            let step = self.process(envelope).await?;
            report.record(step);
        }
        Ok(report)
    }

    /// `max_attempts` が下げられて予算を超えたまま残った行を dispatch せずに dead-letter へ
    async fn retire_exhausted(&self, envelope: &OutboxEnvelope) -> Result<Step, RelayError> {
        let max_attempts = self.config.retry.max_attempts;
        let message = format!(
            "retry budget exhausted: {} failures recorded, max_attempts={max_attempts}",
            envelope.retry_count
        );
        let moved = self
            .store
            .move_to_dead_letter(envelope.id, envelope.retry_count, &message, self.clock.now())
            .await?;
        Ok(match moved {
            Some(record) => {
                error!(
                    envelope_id = %envelope.id,
                    event_type = %envelope.event_type,
                    dead_letter_id = %record.id,
                    retry_count = envelope.retry_count,
                    max_attempts,
                    "envelope over retry budget; moved to dead letter"
                );
                Step::DeadLettered
            }
            None => Step::Skipped,
        })
    }

    async fn process(&self, envelope: &OutboxEnvelope) -> Result<Step, RelayError> {
        if let Some(key) = envelope.idempotency_key.as_deref()
            && self
                .store
                .is_idempotency_key_processed(key, envelope.id)
                .await?
        {
            let marked = self.store.mark_processed(envelope.id, self.clock.now()).await?;
            debug!(
                envelope_id = %envelope.id,
                event_type = %envelope.event_type,
                idempotency_key = key,
                "duplicate suppressed"
            );
            return Ok(if marked { Step::Suppressed } else { Step::Skipped });
        }

        match self.dispatch(envelope).await {
            Ok(handlers) => {
                if self.store.mark_processed(envelope.id, self.clock.now()).await? {
                    debug!(
                        envelope_id = %envelope.id,
                        event_type = %envelope.event_type,
                        handlers,
                        "dispatched"
                    );
                    Ok(Step::Processed)
                } else {
                    debug!(envelope_id = %envelope.id, "already processed elsewhere");
                    Ok(Step::Skipped)
                }
            }
            Err(err) => self.record_failure(envelope, &err).await,
        }
    }

    async fn dispatch(&self, envelope: &OutboxEnvelope) -> Result<usize, RelayError> {
        match self.config.dispatch_timeout {
            Some(limit) => tokio::time::timeout(limit, self.registry.dispatch(envelope))
                .await
                .unwrap_or_else(|_| Err(RelayError::Timeout(limit))),
            None => self.registry.dispatch(envelope).await,
        }
    }

    async fn record_failure(
        &self,
        envelope: &OutboxEnvelope,
        err: &RelayError,
    ) -> Result<Step, RelayError> {
        let policy = &self.config.retry;
        let failures = envelope.retry_count + 1;
        let message = err.to_string();
        let now = self.clock.now();

        if policy.is_exhausted(failures) {
            let moved = self
                .store
                .move_to_dead_letter(envelope.id, envelope.retry_count, &message, now)
                .await?;
            return Ok(match moved {
                Some(record) => {
                    error!(
                        envelope_id = %envelope.id,
                        event_type = %envelope.event_type,
                        dead_letter_id = %record.id,
                        attempts = record.attempts(),
                        kind = ?err.kind(),
                        error = %message,
                        "retry budget exhausted; moved to dead letter"
                    );
                    Step::DeadLettered
                }
                None => {
                    debug!(envelope_id = %envelope.id, "row changed concurrently; dead letter skipped");
                    Step::Skipped
                }
            });
        }

        let next_retry_at = policy.next_retry_at(now, failures);
        let recorded = self
            .store
            .record_failure(envelope.id, envelope.retry_count, &message, next_retry_at)
            .await?;
        if !recorded {
            debug!(envelope_id = %envelope.id, "row changed concurrently; failure not recorded");
            return Ok(Step::Skipped);
        }
        warn!(
            envelope_id = %envelope.id,
            event_type = %envelope.event_type,
            retry_count = failures,
            next_retry_at = %next_retry_at,
            kind = ?err.kind(),
            error = %message,
            "dispatch failed; retry scheduled"
        );
        Ok(Step::Retried)
    }
}

#[async_trait]
impl PollTask for OutboxDispatchLoop {
    fn name(&self) -> &'static str {
        "outbox-dispatch"
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    async fn tick(&self) -> Result<(), RelayError> {
        let report = self.run_once().await?;
        if report.fetched > 0 {
            debug!(
                loop_name = self.name(),
                fetched = report.fetched,
                processed = report.processed,
                suppressed = report.suppressed,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                skipped = report.skipped,
                "iteration finished"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::domain::{EnvelopeId, ErrorKind, NewEnvelope, RetryPolicy};
    use crate::impls::InMemoryStore;
    use crate::ports::{DeadLetterStore, FixedClock, OutboxWriter};
    use crate::testing::{
        FailingHandler, FlakyHandler, HangingHandler, RecordingHandler, SharedLog, TestEvent, t0,
        test_event,
    };
    use crate::typed::Event;
    use chrono::TimeDelta;

    struct Harness {
        store: Arc<InMemoryStore>,
        clock: FixedClock,
    }

    impl Harness {
        fn new() -> Self {
            let clock = FixedClock::new(t0());
            let store = Arc::new(InMemoryStore::new(Arc::new(clock.clone())));
            Self { store, clock }
        }

        fn dispatcher(&self, registry: EventRegistry, config: DispatchConfig) -> OutboxDispatchLoop {
            OutboxDispatchLoop::new(
                self.store.clone(),
                Arc::new(registry),
                Arc::new(self.clock.clone()),
                config,
            )
        }

        async fn enqueue(&self, value: u32, key: Option<&str>) -> EnvelopeId {
            let event = test_event(value);
            let key = key.map(str::to_string);
            self.store
                .transaction(|tx| tx.enqueue_event(&event, key))
                .await
                .unwrap()
        }

        async fn envelope(&self, id: EnvelopeId) -> Option<OutboxEnvelope> {
            OutboxStore::get(self.store.as_ref(), id).await.unwrap()
        }
    }

    fn recording_registry(log: &SharedLog) -> EventRegistry {
        let mut registry = EventRegistry::new();
        registry
            .register::<TestEvent, _>(RecordingHandler::named("projection", log.clone()))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn successful_handler_marks_envelope_processed_in_one_cycle() {
        let h = Harness::new();
        let log = RecordingHandler::shared_log();
        let dispatcher = h.dispatcher(recording_registry(&log), DispatchConfig::default());
        let id = h.enqueue(1, None).await;

        let report = dispatcher.run_once().await.unwrap();

        assert_eq!(report.fetched, 1);
        assert_eq!(report.processed, 1);
        let envelope = h.envelope(id).await.unwrap();
        assert_eq!(envelope.processed_at, Some(t0()));
        assert_eq!(envelope.retry_count, 0);
        assert_eq!(*log.lock().unwrap(), vec!["projection:1"]);

        // 処理済みは二度と取られない
        assert_eq!(dispatcher.run_once().await.unwrap().fetched, 0);
    }

    #[tokio::test]
    async fn always_failing_handler_is_dead_lettered_after_max_attempts() {
        let h = Harness::new();
        let failing = FailingHandler::new("downstream unavailable");
        let calls = failing.calls.clone();
        let mut registry = EventRegistry::new();
        registry.register::<TestEvent, _>(failing).unwrap();
        let dispatcher = h.dispatcher(registry, DispatchConfig::default());
        let id = h.enqueue(1, Some("order-1")).await;

        assert_eq!(dispatcher.run_once().await.unwrap().retried, 1);
        // backoff 中は取られない
        assert_eq!(dispatcher.run_once().await.unwrap().fetched, 0);

        h.clock.advance(TimeDelta::seconds(2));
        assert_eq!(dispatcher.run_once().await.unwrap().retried, 1);
        assert_eq!(h.envelope(id).await.unwrap().retry_count, 2);

        h.clock.advance(TimeDelta::seconds(4));
        let report = dispatcher.run_once().await.unwrap();
        assert_eq!(report.dead_lettered, 1);

        assert!(h.envelope(id).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let record = h.store.find_by_envelope(id).await.unwrap().unwrap();
        assert_eq!(record.attempts(), 3);
        assert_eq!(record.event_type, TestEvent::TYPE);
        assert_eq!(record.idempotency_key.as_deref(), Some("order-1"));
        assert_eq!(record.original_created_at, t0());
        assert_eq!(record.moved_at, t0() + TimeDelta::seconds(6));
        assert!(record.failure_history.iter().all(|e| e.contains("downstream unavailable")));
        assert_eq!(h.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_suppressed_without_running_handlers() {
        let h = Harness::new();
        let log = RecordingHandler::shared_log();
        let dispatcher = h.dispatcher(recording_registry(&log), DispatchConfig::default());
        let first = h.enqueue(1, Some("invoice-42")).await;
        let second = h.enqueue(2, Some("invoice-42")).await;

        let report = dispatcher.run_once().await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.suppressed, 1);
        assert!(h.envelope(first).await.unwrap().is_processed());
        assert!(h.envelope(second).await.unwrap().is_processed());
        assert_eq!(*log.lock().unwrap(), vec!["projection:1"]);
    }

    #[tokio::test]
    async fn retry_reinvokes_handlers_that_already_succeeded() {
        let h = Harness::new();
        let log = RecordingHandler::shared_log();
        let flaky = FlakyHandler::failing_first(1);
        let flaky_calls = flaky.calls.clone();
        let mut registry = EventRegistry::new();
        registry
            .register::<TestEvent, _>(RecordingHandler::named("first", log.clone()))
            .unwrap();
        registry.register::<TestEvent, _>(flaky).unwrap();
        let dispatcher = h.dispatcher(registry, DispatchConfig::default());
        let id = h.enqueue(7, None).await;

        assert_eq!(dispatcher.run_once().await.unwrap().retried, 1);
        h.clock.advance(TimeDelta::seconds(2));
        assert_eq!(dispatcher.run_once().await.unwrap().processed, 1);

        // handler 単位の進捗は持たないので、成功済みの "first" も再実行される
        assert_eq!(*log.lock().unwrap(), vec!["first:7", "first:7"]);
        assert_eq!(flaky_calls.load(Ordering::SeqCst), 2);
        let envelope = h.envelope(id).await.unwrap();
        assert!(envelope.is_processed());
        assert_eq!(envelope.retry_count, 1);
    }

    #[tokio::test]
    async fn lowered_retry_budget_dead_letters_rows_already_over_it() {
        let h = Harness::new();
        let failing = FailingHandler::new("ledger locked");
        let calls = failing.calls.clone();
        let mut registry = EventRegistry::new();
        registry.register::<TestEvent, _>(failing).unwrap();
        let registry = Arc::new(registry);
        let generous = DispatchConfig {
            retry: RetryPolicy {
                max_attempts: 5,
                ..RetryPolicy::default()
            },
            ..DispatchConfig::default()
        };
        let before = OutboxDispatchLoop::new(
            h.store.clone(),
            registry.clone(),
            Arc::new(h.clock.clone()),
            generous,
        );
        let id = h.enqueue(1, None).await;
        before.run_once().await.unwrap();
        h.clock.advance(TimeDelta::seconds(2));
        before.run_once().await.unwrap();
        assert_eq!(h.envelope(id).await.unwrap().retry_count, 2);

        // 再起動後、max_attempts=2 で動かす
        h.clock.advance(TimeDelta::seconds(4));
        let after = OutboxDispatchLoop::new(
            h.store.clone(),
            registry,
            Arc::new(h.clock.clone()),
            DispatchConfig {
                retry: RetryPolicy {
                    max_attempts: 2,
                    ..RetryPolicy::default()
                },
                ..DispatchConfig::default()
            },
        );
        let report = after.run_once().await.unwrap();

        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.fetched, 0);
        assert!(h.envelope(id).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let record = h.store.find_by_envelope(id).await.unwrap().unwrap();
        assert_eq!(record.attempts(), 3);
        assert!(record.failure_history[2].contains("max_attempts=2"));
    }

    #[tokio::test]
    async fn batch_is_processed_oldest_created_first() {
        let h = Harness::new();
        let log = RecordingHandler::shared_log();
        let dispatcher = h.dispatcher(recording_registry(&log), DispatchConfig::default());

        h.clock.set(t0() + TimeDelta::seconds(20));
        h.enqueue(3, None).await;
        h.clock.set(t0());
        h.enqueue(1, None).await;
        h.clock.set(t0() + TimeDelta::seconds(10));
        h.enqueue(2, None).await;
        h.clock.set(t0() + TimeDelta::seconds(30));

        dispatcher.run_once().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["projection:1", "projection:2", "projection:3"]
        );
    }

    #[tokio::test]
    async fn batch_size_bounds_one_iteration() {
        let h = Harness::new();
        let log = RecordingHandler::shared_log();
        let config = DispatchConfig {
            batch_size: 2,
            ..DispatchConfig::default()
        };
        let dispatcher = h.dispatcher(recording_registry(&log), config);
        for value in 0..5 {
            h.enqueue(value, None).await;
        }

        assert_eq!(dispatcher.run_once().await.unwrap().processed, 2);
        assert_eq!(dispatcher.run_once().await.unwrap().processed, 2);
        assert_eq!(dispatcher.run_once().await.unwrap().processed, 1);
    }

    #[tokio::test]
    async fn next_retry_at_strictly_increases_across_failures() {
        let h = Harness::new();
        let mut registry = EventRegistry::new();
        registry.register::<TestEvent, _>(FailingHandler::new("nope")).unwrap();
        let config = DispatchConfig {
            retry: RetryPolicy {
                max_attempts: 5,
                ..RetryPolicy::default()
            },
            ..DispatchConfig::default()
        };
        let dispatcher = h.dispatcher(registry, config);
        let id = h.enqueue(1, None).await;

        let mut schedule = Vec::new();
        for _ in 0..4 {
            dispatcher.run_once().await.unwrap();
            let envelope = h.envelope(id).await.unwrap();
            let next = envelope.next_retry_at.unwrap();
            schedule.push(next);
            h.clock.set(next);
        }

        assert!(schedule.windows(2).all(|w| w[0] < w[1]));
        let gaps: Vec<_> = schedule.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![TimeDelta::seconds(4), TimeDelta::seconds(8), TimeDelta::seconds(16)]
        );
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_retry() {
        let h = Harness::new();
        let flaky = FlakyHandler::failing_first(1);
        let calls = flaky.calls.clone();
        let mut registry = EventRegistry::new();
        registry.register::<TestEvent, _>(flaky).unwrap();
        let dispatcher = h.dispatcher(registry, DispatchConfig::default());
        let id = h.enqueue(1, None).await;

        assert_eq!(dispatcher.run_once().await.unwrap().retried, 1);
        h.clock.advance(TimeDelta::seconds(2));
        assert_eq!(dispatcher.run_once().await.unwrap().processed, 1);

        let envelope = h.envelope(id).await.unwrap();
        assert!(envelope.is_processed());
        assert_eq!(envelope.retry_count, 1);
        assert!(envelope.last_error.unwrap().contains("flaky failure 1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_event_type_is_retried_then_dead_lettered() {
        let h = Harness::new();
        let dispatcher = h.dispatcher(EventRegistry::new(), DispatchConfig::default());
        let id = h
            .store
            .transaction(|tx| tx.enqueue_envelope(NewEnvelope::new("nobody.listens.v1", "{}")))
            .await
            .unwrap();

        for delay in [0, 2, 4] {
            h.clock.advance(TimeDelta::seconds(delay));
            dispatcher.run_once().await.unwrap();
        }

        let record = h.store.find_by_envelope(id).await.unwrap().unwrap();
        assert_eq!(record.attempts(), 3);
        assert!(record.failure_history[0].contains("nobody.listens.v1"));
    }

    #[tokio::test]
    async fn hung_handler_counts_as_a_failure_after_timeout() {
        let h = Harness::new();
        let mut registry = EventRegistry::new();
        registry
            .register::<TestEvent, _>(HangingHandler {
                delay: Duration::from_secs(30),
            })
            .unwrap();
        let config = DispatchConfig {
            dispatch_timeout: Some(Duration::from_millis(20)),
            ..DispatchConfig::default()
        };
        let dispatcher = h.dispatcher(registry, config);
        let id = h.enqueue(1, None).await;

        let report = dispatcher.run_once().await.unwrap();

        assert_eq!(report.retried, 1);
        let envelope = h.envelope(id).await.unwrap();
        assert_eq!(envelope.retry_count, 1);
        assert!(envelope.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn store_outage_abandons_iteration_without_writes() {
        let h = Harness::new();
        let log = RecordingHandler::shared_log();
        let dispatcher = h.dispatcher(recording_registry(&log), DispatchConfig::default());
        let id = h.enqueue(1, None).await;

        h.store.set_available(false);
        let err = dispatcher.run_once().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(log.lock().unwrap().is_empty());

        h.store.set_available(true);
        let envelope = h.envelope(id).await.unwrap();
        assert_eq!(envelope.retry_count, 0);
        assert!(!envelope.is_processed());

        assert_eq!(dispatcher.run_once().await.unwrap().processed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_instances_never_corrupt_counters() {
        let h = Harness::new();
        let log = RecordingHandler::shared_log();
        let registry = Arc::new(recording_registry(&log));
        let make = || {
            OutboxDispatchLoop::new(
                h.store.clone(),
                registry.clone(),
                Arc::new(h.clock.clone()),
                DispatchConfig::default(),
            )
        };
        let (a, b) = (make(), make());
        let mut ids = Vec::new();
        for value in 0..10 {
            ids.push(h.enqueue(value, None).await);
        }

        let (ra, rb) = tokio::join!(a.run_once(), b.run_once());
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        // 重複配送はあり得るが、processed は各 envelope で 1 回だけ立つ
        assert_eq!(ra.processed + rb.processed, 10);
        for id in ids {
            let envelope = h.envelope(id).await.unwrap();
            assert!(envelope.is_processed());
            assert_eq!(envelope.retry_count, 0);
        }
        assert!(log.lock().unwrap().len() >= 10);
    }
}
