//! Errors - エラー型と分類

use std::time::Duration;

use thiserror::Error;

use crate::typed::codec::CodecError;

/// ErrorKind は実行エラーの運用分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味だが、現状はリトライ予算を使い切ってから dead-letter）
/// - Infrastructure: ストア自体の障害（イテレーションごと中断）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// RelayError はクレート全体のエラー
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no handler registered for event_type={0}")]
    UnknownEventType(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Raised by handler code.
    #[error("{0}")]
    Handler(String),

    #[error("handler {handler} failed: {source}")]
    HandlerFailed {
        handler: String,
        #[source]
        source: Box<RelayError>,
    },

    #[error("dispatch timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Store(String),
}

impl RelayError {
    /// Handler から返す一時的なエラー
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownEventType(_) | Self::Codec(_) => ErrorKind::Permanent,
            Self::Handler(_) | Self::Timeout(_) => ErrorKind::Transient,
            Self::HandlerFailed { source, .. } => source.kind(),
            Self::Store(_) => ErrorKind::Infrastructure,
        }
    }
}
