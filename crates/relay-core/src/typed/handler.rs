//! EventHandler trait - event を消費する handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (EventHandler<E>)
//! - Object-safe trait (DynRoute) による type erasure は registry 側で行う
//!
//! # 冪等性
//! 1 つの event に複数の handler がある場合、どれか 1 つの失敗で event 全体がリトライされます。
//! 前回成功した handler も再実行されるので、handler は必ず冪等に書いてください。

use async_trait::async_trait;

use super::event::Event;
use crate::domain::errors::RelayError;

/// EventHandler は型付き event を処理する
///
/// # 使用例
/// ```ignore
/// struct MissedMilestoneNotifier;
///
/// #[async_trait]
/// impl EventHandler<MilestoneMissed> for MissedMilestoneNotifier {
///     async fn handle(&self, event: &MilestoneMissed) -> Result<(), RelayError> {
///         notify_owners(event.milestone_id).await.map_err(RelayError::handler)
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    /// ログと重複登録チェックに使う名前
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, event: &E) -> Result<(), RelayError>;
}
