//! 型付き ID
//!
//! outbox・dead-letter・イベント・業務エンティティの ID はすべて `Id<T>`（ULID + マーカー型）です。
//! ULID は先頭が timestamp なので、採番順 ≒ 時刻順になります。
//!
//! `EnvelopeId` と `DeadLetterId` を取り違えるとコンパイルエラーになります。
//! 表示は "obx-01H..." のようにプレフィックス付き、JSON 上は素の ULID 文字列です。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"obx-", "dlq-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// JSON 上は素の ULID 文字列になります（プレフィックスは Display のみ）。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// 新しいランダム ID（seed データやテスト用）
    pub fn random() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

macro_rules! id_marker {
    ($(#[$meta:meta])* $marker:ident, $alias:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $marker {}

        impl IdMarker for $marker {
            fn prefix() -> &'static str {
                $prefix
            }
        }

        $(#[$meta])*
        pub type $alias = Id<$marker>;
    };
}

// ========================================
// Outbox パイプライン
// ========================================

id_marker!(
    /// Identifier of an outbox envelope.
    Envelope, EnvelopeId, "obx-"
);
id_marker!(
    /// Identifier of a dead-letter record.
    DeadLetter, DeadLetterId, "dlq-"
);
id_marker!(
    /// Identifier carried by every domain event.
    Event, EventId, "evt-"
);

// ========================================
// ビジネスドメイン（外部の正本が採番する）
// ========================================

id_marker!(Project, ProjectId, "prj-");
id_marker!(Task, TaskId, "task-");
id_marker!(Sprint, SprintId, "sprint-");
id_marker!(Milestone, MilestoneId, "ms-");
id_marker!(Organization, OrganizationId, "org-");
id_marker!(Quota, QuotaId, "quota-");
id_marker!(Decision, DecisionId, "dec-");
