//! Messages exchanged between the producer and its consumers.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use resource_schema::ResourceDefinition;
use serde::{Deserialize, Serialize};
use transport::TripleBuffer;

use crate::ResourceId;

/// Frame loops that can own a resource view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Thread {
    Game,
    Render,
    Main,
}

/// Opaque payload handed to a consumer's loader.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Key under which a producer deduplicates resources of one type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Str(String),
    Int(u64),
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        CacheKey::Str(key.to_owned())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        CacheKey::Str(key)
    }
}

impl From<u64> for CacheKey {
    fn from(key: u64) -> Self {
        CacheKey::Int(key)
    }
}

/// What a consumer needs to materialize a resource.
pub enum ResourcePayload {
    /// Loader input for opaque, string and array-buffer resources.
    Value(Payload),
    /// Schema instance: its layout plus the triple-buffered storage.
    Instance {
        definition: Arc<ResourceDefinition>,
        buffer: Arc<TripleBuffer>,
    },
}

impl fmt::Debug for ResourcePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourcePayload::Value(_) => f.write_str("Value(..)"),
            ResourcePayload::Instance { definition, buffer } => f
                .debug_struct("Instance")
                .field("definition", &definition.name())
                .field("len", &buffer.len())
                .finish(),
        }
    }
}

/// Envelope sent ahead of the tick record that activates it.
#[derive(Debug)]
pub struct CreateResourceMessage {
    pub resource_type: String,
    pub id: ResourceId,
    pub name: String,
    pub props: ResourcePayload,
    /// One-byte status buffer; bit 0 flips once the producer disposes the id.
    pub status: Arc<TripleBuffer>,
}

/// Set in the status byte when the producer disposes a resource.
pub const STATUS_DISPOSED: u8 = 0x01;

/// Load outcome reported back to the producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceAck {
    pub thread: Thread,
    pub id: ResourceId,
    pub result: Result<(), String>,
}
