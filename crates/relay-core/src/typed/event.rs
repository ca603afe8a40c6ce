//! Event trait - 型付きドメインイベントの定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`) で event_type タグと Rust 型を対応付ける
//! - 実行時の型名解決は使わない（タグはバージョンをまたいで安定）

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::ids::EventId;

/// Event は event_type タグと payload 型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SprintCompleted { id: EventId, occurred_on: DateTime<Utc>, .. }
///
/// impl Event for SprintCompleted {
///     const TYPE: &'static str = "project.sprint.completed.v1";
///     ..
/// }
/// ```
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// event_type の定義
    ///
    /// # 命名規約
    /// - `{domain}.{entity}.{action}.v{major}`
    /// - 例: `project.milestone.missed.v1`
    const TYPE: &'static str;

    fn event_id(&self) -> EventId;

    fn occurred_on(&self) -> DateTime<Utc>;
}
