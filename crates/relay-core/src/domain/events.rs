//! Events - ドメインイベント
//!
//! 各イベントは consumer（projection, notification）が必要とする事実だけを持ちます。
//! Dispatcher は `event_type` タグ以外は中身を見ません。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::NewEnvelope;
use super::ids::{
    DecisionId, EventId, MilestoneId, OrganizationId, ProjectId, QuotaId, SprintId, TaskId,
};
use crate::typed::codec::{CodecError, PayloadCodec};
use crate::typed::event::Event;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCreated {
    pub id: EventId,
    pub occurred_on: DateTime<Utc>,
    pub project_id: ProjectId,
    pub task_id: TaskId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUpdated {
    pub id: EventId,
    pub occurred_on: DateTime<Utc>,
    pub project_id: ProjectId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SprintCompleted {
    pub id: EventId,
    pub occurred_on: DateTime<Utc>,
    pub project_id: ProjectId,
    pub sprint_id: SprintId,
    pub completed_tasks: u32,
    pub remaining_tasks: u32,
}

/// Emitted by the milestone expiry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneMissed {
    pub id: EventId,
    pub occurred_on: DateTime<Utc>,
    pub milestone_id: MilestoneId,
    pub project_id: ProjectId,
    pub name: String,
    pub due_date: DateTime<Utc>,
}

/// Emitted by the quota activation loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaActivated {
    pub id: EventId,
    pub occurred_on: DateTime<Utc>,
    pub organization_id: OrganizationId,
    pub quota_id: QuotaId,
    pub previous_quota_id: Option<QuotaId>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Emitted by the decision expiry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionExpired {
    pub id: EventId,
    pub occurred_on: DateTime<Utc>,
    pub decision_id: DecisionId,
    pub project_id: ProjectId,
    pub requested_at: DateTime<Utc>,
}

macro_rules! impl_event {
    ($ty:ty, $tag:literal) => {
        impl Event for $ty {
            const TYPE: &'static str = $tag;

            fn event_id(&self) -> EventId {
                self.id
            }

            fn occurred_on(&self) -> DateTime<Utc> {
                self.occurred_on
            }
        }
    };
}

impl_event!(TaskCreated, "project.task.created.v1");
impl_event!(ProjectUpdated, "project.project.updated.v1");
impl_event!(SprintCompleted, "project.sprint.completed.v1");
impl_event!(MilestoneMissed, "project.milestone.missed.v1");
impl_event!(QuotaActivated, "billing.quota.activated.v1");
impl_event!(DecisionExpired, "approval.decision.expired.v1");

/// DomainEvent は閉じた（が拡張可能な）イベント集合
///
/// producer 側で「どのイベントを積むか」を 1 つの型で扱うためのもの。
/// consumer 側は `EventRegistry` が個別の型に decode します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    TaskCreated(TaskCreated),
    ProjectUpdated(ProjectUpdated),
    SprintCompleted(SprintCompleted),
    MilestoneMissed(MilestoneMissed),
    QuotaActivated(QuotaActivated),
    DecisionExpired(DecisionExpired),
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskCreated(_) => TaskCreated::TYPE,
            Self::ProjectUpdated(_) => ProjectUpdated::TYPE,
            Self::SprintCompleted(_) => SprintCompleted::TYPE,
            Self::MilestoneMissed(_) => MilestoneMissed::TYPE,
            Self::QuotaActivated(_) => QuotaActivated::TYPE,
            Self::DecisionExpired(_) => DecisionExpired::TYPE,
        }
    }

    pub fn id(&self) -> EventId {
        match self {
            Self::TaskCreated(e) => e.id,
            Self::ProjectUpdated(e) => e.id,
            Self::SprintCompleted(e) => e.id,
            Self::MilestoneMissed(e) => e.id,
            Self::QuotaActivated(e) => e.id,
            Self::DecisionExpired(e) => e.id,
        }
    }

    /// payload（outbox に保存する文字列）へ encode
    pub fn encode(&self) -> Result<String, CodecError> {
        match self {
            Self::TaskCreated(e) => PayloadCodec::encode(e),
            Self::ProjectUpdated(e) => PayloadCodec::encode(e),
            Self::SprintCompleted(e) => PayloadCodec::encode(e),
            Self::MilestoneMissed(e) => PayloadCodec::encode(e),
            Self::QuotaActivated(e) => PayloadCodec::encode(e),
            Self::DecisionExpired(e) => PayloadCodec::encode(e),
        }
    }

    /// outbox に積む形へ変換
    pub fn to_envelope(&self) -> Result<NewEnvelope, CodecError> {
        Ok(NewEnvelope::new(self.event_type(), self.encode()?))
    }

    /// 登録済みの全タグ（起動時検証 `expect_events` 用）
    pub fn all_types() -> [&'static str; 6] {
        [
            TaskCreated::TYPE,
            ProjectUpdated::TYPE,
            SprintCompleted::TYPE,
            MilestoneMissed::TYPE,
            QuotaActivated::TYPE,
            DecisionExpired::TYPE,
        ]
    }
}

macro_rules! impl_from_variant {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for DomainEvent {
                fn from(event: $variant) -> Self {
                    Self::$variant(event)
                }
            }
        )*
    };
}

impl_from_variant!(
    TaskCreated,
    ProjectUpdated,
    SprintCompleted,
    MilestoneMissed,
    QuotaActivated,
    DecisionExpired,
);
