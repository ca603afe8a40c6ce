//! Domain model (IDs, envelopes, events, reconciliation targets, errors).

pub mod approval;
pub mod dead_letter;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;
pub mod milestone;
pub mod quota;
pub mod retry;

pub use self::approval::{DecisionStatus, PendingDecision};
pub use self::dead_letter::DeadLetterRecord;
pub use self::envelope::{NewEnvelope, OutboxEnvelope};
pub use self::errors::{ErrorKind, RelayError};
pub use self::events::{
    DecisionExpired, DomainEvent, MilestoneMissed, ProjectUpdated, QuotaActivated,
    SprintCompleted, TaskCreated,
};
pub use self::ids::{
    DeadLetterId, DecisionId, EnvelopeId, EventId, MilestoneId, OrganizationId, ProjectId,
    QuotaId, SprintId, TaskId,
};
pub use self::milestone::{Milestone, MilestoneStatus};
pub use self::quota::{AiQuota, QuotaStatus};
pub use self::retry::RetryPolicy;
