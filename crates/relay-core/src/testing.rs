//! テスト用の event と handler

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{EventId, RelayError};
use crate::typed::{Event, EventHandler};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEvent {
    pub id: EventId,
    pub occurred_on: DateTime<Utc>,
    pub value: u32,
}

impl Event for TestEvent {
    const TYPE: &'static str = "test.thing.happened.v1";

    fn event_id(&self) -> EventId {
        self.id
    }

    fn occurred_on(&self) -> DateTime<Utc> {
        self.occurred_on
    }
}

pub fn test_event(value: u32) -> TestEvent {
    TestEvent {
        id: EventId::random(),
        occurred_on: t0(),
        value,
    }
}

pub type SharedLog = Arc<Mutex<Vec<String>>>;

/// 呼ばれるたびに `"{name}:{value}"` を記録する
pub struct RecordingHandler {
    name: String,
    log: SharedLog,
}

impl RecordingHandler {
    pub fn shared_log() -> SharedLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn named(name: &str, log: SharedLog) -> Self {
        Self {
            name: name.to_string(),
            log,
        }
    }
}

#[async_trait]
impl EventHandler<TestEvent> for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &TestEvent) -> Result<(), RelayError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, event.value));
        Ok(())
    }
}

/// 常に失敗する
pub struct FailingHandler {
    message: String,
    pub calls: Arc<AtomicU32>,
}

impl FailingHandler {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl EventHandler<TestEvent> for FailingHandler {
    async fn handle(&self, _event: &TestEvent) -> Result<(), RelayError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(RelayError::handler(format!("{} (call {n})", self.message)))
    }
}

/// 最初の `failures` 回だけ失敗する
pub struct FlakyHandler {
    failures: u32,
    pub calls: Arc<AtomicU32>,
}

impl FlakyHandler {
    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl EventHandler<TestEvent> for FlakyHandler {
    async fn handle(&self, _event: &TestEvent) -> Result<(), RelayError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            return Err(RelayError::handler(format!("flaky failure {n}")));
        }
        Ok(())
    }
}

/// 応答しない下流を模す
pub struct HangingHandler {
    pub delay: Duration,
}

#[async_trait]
impl EventHandler<TestEvent> for HangingHandler {
    async fn handle(&self, _event: &TestEvent) -> Result<(), RelayError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
