use thiserror::Error;

use resource_schema::SchemaError;
use transport::TransportError;

use crate::{ResourceId, Thread};

pub type ResourceResult<T> = Result<T, ResourceError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    #[error("thread {0:?} cannot be targeted from here")]
    InvalidThread(Thread),

    #[error("resource type `{0}` has no registered loader")]
    UnregisteredType(String),

    #[error("resource {0} does not exist")]
    NotFound(ResourceId),

    #[error("resource {0} was disposed")]
    Disposed(ResourceId),

    #[error("resource {id} failed to load: {reason}")]
    LoadFailed { id: ResourceId, reason: String },

    #[error("resource {id} is a `{actual}`, expected `{expected}`")]
    TypeMismatch {
        id: ResourceId,
        expected: String,
        actual: String,
    },

    #[error("resource type `{0}` was already defined with a different schema")]
    DefinitionConflict(String),

    #[error("`{resource_type}` has no property `{prop}`")]
    UnknownProp { resource_type: String, prop: String },

    #[error("required property `{prop}` of `{resource_type}` was not supplied")]
    MissingRequired { resource_type: String, prop: String },

    #[error("property `{0}` is immutable")]
    Immutable(String),

    #[error("property `{0}` is not writable from scripts")]
    NotScriptWritable(String),

    #[error("array buffer `{prop}` of resource {id} is already set")]
    BufferAlreadySet { id: ResourceId, prop: String },

    #[error("array buffer `{prop}` of resource {id} is {len} bytes, past the u32 length word")]
    BufferTooLarge { id: ResourceId, prop: String, len: usize },

    #[error("consumer on {0:?} disconnected")]
    Disconnected(Thread),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ResourceError {
    pub fn load_failed(id: ResourceId, reason: impl Into<String>) -> Self {
        ResourceError::LoadFailed {
            id,
            reason: reason.into(),
        }
    }
}
