//! Typed - 型付き Event API
//!
//! event_type の typo を型で排除し、handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Event` trait, `EventHandler<E>` trait - 型安全
//! - **内部（Dyn）**: registry 内の route - object-safe, type erasure

pub mod codec;
pub mod event;
pub mod handler;
pub mod registry;

pub use self::codec::{CodecError, PayloadCodec};
pub use self::event::Event;
pub use self::handler::EventHandler;
pub use self::registry::{EventRegistry, RegistryError};
