//! Cross-thread resource registry.
//!
//! One producer thread owns every resource through a [`ResourceManager`].
//! Each consumer thread holds a [`LocalResourceManager`] connected to it.
//! Creation and disposal travel as tick-stamped records so a consumer never
//! sees a resource before, or loses it after, the tick its frame is on.
//! Property bytes of schema instances are published through triple buffers
//! once per [`ResourceManager::commit`], so a consumer always reads a coherent
//! frame.
//!
//! Typed handles are declared with [`define_resource!`]; untyped access goes
//! through [`ResourceManager::set_prop`] and [`ResourceManager::get_prop`].

pub mod kinds;

mod config;
mod error;
mod local;
mod macros;
mod manager;
mod message;
mod retainers;
mod sync;
mod view;

pub use config::{ResourceConfig, DEFAULT_RING_CAPACITY};
pub use error::{ResourceError, ResourceResult};
pub use local::{LoadContext, LoadStatus, LocalResource, LocalResourceLoader, LocalResourceManager};
pub use manager::{DisposeHook, Resource, ResourceManager, ResourceOptions};
pub use message::{
    CacheKey, CreateResourceMessage, Payload, ResourceAck, ResourcePayload, Thread,
    STATUS_DISPOSED,
};
pub use retainers::Retainer;
pub use sync::SyncResourceManager;
pub use view::{ResourceClass, ResourceView, SchemaResource};

pub use resource_schema::{
    CompiledProp, PropKind, PropType, PropValue, RawBuffer, ResourceDefinition, SchemaError,
};

/// Process-wide resource id. Zero never names a resource.
pub type ResourceId = u32;

/// Frame counter of the producer's loop.
pub type Tick = u32;

/// Type tag of interned strings.
pub const STRING_RESOURCE: &str = "string";

/// Type tag of raw byte payloads.
pub const ARRAY_BUFFER_RESOURCE: &str = "arrayBuffer";

#[doc(hidden)]
pub mod __private {
    pub use paste::paste;
}
