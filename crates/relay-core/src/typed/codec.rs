//! PayloadCodec - outbox payload と Event の相互変換
//!
//! payload は outbox 上では不透明な文字列（JSON）として保存されます。

use super::event::Event;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode {event_type}: {source}")]
    Encode {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("decode {event_type}: {source}")]
    Decode {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// PayloadCodec は JSON で Event を encode / decode する
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<E: Event>(event: &E) -> Result<String, CodecError> {
        serde_json::to_string(event).map_err(|source| CodecError::Encode {
            event_type: E::TYPE,
            source,
        })
    }

    pub fn decode<E: Event>(payload: &str) -> Result<E, CodecError> {
        serde_json::from_str(payload).map_err(|source| CodecError::Decode {
            event_type: E::TYPE,
            source,
        })
    }
}
