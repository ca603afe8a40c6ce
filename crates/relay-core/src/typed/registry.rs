//! EventRegistry - event_type タグから decoder と handler 列への閉じた対応表
//!
//! # 内部実装
//! - `register::<E: Event>(handler)` で登録
//! - タグごとに `TypedRoute<E>`（decoder + handler 列）を持つ
//! - `HashMap<&'static str, Box<dyn DynRoute>>` で型消去して管理
//! - 登録は起動時のみ（可変）、実行時は Arc で共有（不変、ロック不要）

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use super::codec::PayloadCodec;
use super::event::Event;
use super::handler::EventHandler;
use crate::domain::{OutboxEnvelope, RelayError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler '{handler}' is already registered for event type '{event_type}'")]
    DuplicateHandler { event_type: String, handler: String },

    #[error("event type '{0}' is already bound to a different Rust type")]
    TagConflict(String),
}

/// 型消去された route（object-safe）
#[async_trait]
trait DynRoute: Send + Sync {
    fn handler_names(&self) -> Vec<String>;

    /// decode して全 handler を順番に実行。失敗した時点で中断する。
    async fn dispatch(&self, payload: &str) -> Result<usize, RelayError>;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct TypedRoute<E: Event> {
    handlers: Vec<Arc<dyn EventHandler<E>>>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Event> TypedRoute<E> {
    fn new() -> Self {
        Self {
            handlers: Vec::new(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<E: Event> DynRoute for TypedRoute<E> {
    fn handler_names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    async fn dispatch(&self, payload: &str) -> Result<usize, RelayError> {
        let event: E = PayloadCodec::decode(payload)?;
        for handler in &self.handlers {
            handler
                .handle(&event)
                .await
                .map_err(|source| RelayError::HandlerFailed {
                    handler: handler.name().to_string(),
                    source: Box::new(source),
                })?;
        }
        Ok(self.handlers.len())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// EventRegistry は型付き handler を登録し、envelope を dispatch する
///
/// # 使用例
/// ```ignore
/// let mut registry = EventRegistry::new();
/// registry.register::<MilestoneMissed, _>(ProjectionUpdater)?;
/// registry.register::<MilestoneMissed, _>(OwnerNotifier)?;
///
/// registry.dispatch(&envelope).await?;
/// ```
#[derive(Default)]
pub struct EventRegistry {
    routes: HashMap<&'static str, Box<dyn DynRoute>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: Event, H: EventHandler<E> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.register_shared::<E>(Arc::new(handler))
    }

    /// 同じ handler インスタンスを複数の event 型に登録したいとき用
    pub fn register_shared<E: Event>(
        &mut self,
        handler: Arc<dyn EventHandler<E>>,
    ) -> Result<(), RegistryError> {
        let route = self
            .routes
            .entry(E::TYPE)
            .or_insert_with(|| Box::new(TypedRoute::<E>::new()));
        let typed = route
            .as_any_mut()
            .downcast_mut::<TypedRoute<E>>()
            .ok_or_else(|| RegistryError::TagConflict(E::TYPE.to_string()))?;

        if typed.handlers.iter().any(|h| h.name() == handler.name()) {
            return Err(RegistryError::DuplicateHandler {
                event_type: E::TYPE.to_string(),
                handler: handler.name().to_string(),
            });
        }
        typed.handlers.push(handler);
        Ok(())
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.routes.contains_key(event_type)
    }

    /// Sorted for stable output.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.routes.keys().map(|t| t.to_string()).collect();
        types.sort();
        types
    }

    pub fn handler_names(&self, event_type: &str) -> Vec<String> {
        self.routes
            .get(event_type)
            .map(|route| route.handler_names())
            .unwrap_or_default()
    }

    /// Decode the envelope payload and invoke every handler for its type, in
    /// registration order. Returns the number of handlers invoked.
    ///
    /// An unknown type or undecodable payload is an ordinary error here; the
    /// dispatch loop retries it like any other failure.
    pub async fn dispatch(&self, envelope: &OutboxEnvelope) -> Result<usize, RelayError> {
        let route = self
            .routes
            .get(envelope.event_type.as_str())
            .ok_or_else(|| RelayError::UnknownEventType(envelope.event_type.clone()))?;
        route.dispatch(&envelope.payload).await
    }
}
