//! Read access shared by the producer registry and consumer managers.

use std::any::Any;

use resource_schema::{RawBuffer, ResourceDefinition};

use crate::ResourceId;

/// Anything that can resolve resource ids to their current contents.
///
/// The producer answers from its working bytes; a consumer answers from the
/// read slot of the last snapshot it picked up, and only for resources it
/// has finished loading.
pub trait ResourceView {
    fn resource_type(&self, id: ResourceId) -> Option<&str>;

    /// Storage of a schema instance.
    fn resource_bytes(&self, id: ResourceId) -> Option<&[u8]>;

    /// Payload of an opaque, string or array-buffer resource.
    fn resource_value(&self, id: ResourceId) -> Option<&(dyn Any + Send + Sync)>;

    fn string(&self, id: ResourceId) -> Option<&str> {
        self.resource_value(id)?
            .downcast_ref::<String>()
            .map(String::as_str)
    }

    fn raw_buffer(&self, id: ResourceId) -> Option<&RawBuffer> {
        self.resource_value(id)?.downcast_ref::<RawBuffer>()
    }
}

/// Typed handle over a resource id.
pub trait ResourceClass: Copy + 'static {
    /// Type tag the registry files instances under.
    const NAME: &'static str;

    fn from_id(id: ResourceId) -> Self;

    fn id(self) -> ResourceId;
}

/// Handle whose instances store their properties in a compiled layout.
pub trait SchemaResource: ResourceClass {
    /// Compiled once per process and shared by every thread.
    fn definition() -> &'static std::sync::Arc<ResourceDefinition>;
}
