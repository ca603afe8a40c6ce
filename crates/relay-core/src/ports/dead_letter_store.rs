//! DeadLetterStore port - dead-letter テーブルの参照
//!
//! 書き込みは `OutboxStore::move_to_dead_letter` の移送ステップのみ。
//! ここは運用者が調査するための読み取り専用インターフェースです。

use async_trait::async_trait;

use crate::domain::{DeadLetterId, DeadLetterRecord, EnvelopeId, RelayError};

#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Most recently moved first.
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, RelayError>;

    async fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterRecord>, RelayError>;

    async fn find_by_envelope(
        &self,
        envelope_id: EnvelopeId,
    ) -> Result<Option<DeadLetterRecord>, RelayError>;

    async fn count(&self) -> Result<usize, RelayError>;
}
