//! Resource schemas: declared properties compiled into fixed byte layouts.
//!
//! A [`ResourceDefinition`] maps each property name to a kind, an element
//! count and a byte offset. The same definition is compiled on every thread
//! that touches the resource, and the bytes at a given offset mean the same
//! thing everywhere, so no per-field marshalling is needed.

mod definition;
mod error;
mod kind;
pub mod value;

pub use definition::{CompiledProp, PropType, ResourceDefinition, ResourceDefinitionBuilder};
pub use error::{SchemaError, SchemaResult};
pub use kind::{PropKind, ELEMENT_SIZE};
pub use value::{PropValue, RawBuffer};
