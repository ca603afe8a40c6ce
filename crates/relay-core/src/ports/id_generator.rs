//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（Clock の時刻を timestamp 部に使う）

use crate::domain::ids::{DeadLetterId, EnvelopeId, EventId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator はパイプラインが採番する ID を生成
///
/// ビジネスエンティティ（Milestone など）の ID は外部の正本が採番するので含めません。
pub trait IdGenerator: Send + Sync {
    fn generate_envelope_id(&self) -> EnvelopeId;

    fn generate_dead_letter_id(&self) -> DeadLetterId;

    fn generate_event_id(&self) -> EventId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// FixedClock を使うと timestamp 部分が決定的になります（ランダム部分は異なる）。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_envelope_id(&self) -> EnvelopeId {
        EnvelopeId::from(self.next_ulid())
    }

    fn generate_dead_letter_id(&self) -> DeadLetterId {
        DeadLetterId::from(self.next_ulid())
    }

    fn generate_event_id(&self) -> EventId {
        EventId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_envelope_id();
        let id2 = id_gen.generate_envelope_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_has_deterministic_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_event_id();
        let id2 = id_gen.generate_event_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn different_id_types_use_their_prefix() {
        let id_gen = UlidGenerator::new(SystemClock);

        assert!(id_gen.generate_envelope_id().to_string().starts_with("obx-"));
        assert!(id_gen.generate_dead_letter_id().to_string().starts_with("dlq-"));
        assert!(id_gen.generate_event_id().to_string().starts_with("evt-"));
    }
}
