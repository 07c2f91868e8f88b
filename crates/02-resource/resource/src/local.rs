//! Consumer-side resource view.
//!
//! A [`LocalResourceManager`] owns one end of a producer link. Create
//! envelopes arrive over a channel as soon as the producer flushes, but a
//! resource only becomes visible once its create record is due at the
//! consumer's tick. Loaders registered per resource type turn each arrival
//! into whatever local object the thread needs.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace, warn};
use resource_schema::ResourceDefinition;
use transport::{ResourceCommand, TickRecord, TickRingConsumer, TripleBuffer, TripleBufferReader};

use crate::{
    CreateResourceMessage, Payload, ResourceAck, ResourceError, ResourceId, ResourcePayload,
    ResourceResult, ResourceView, Thread, Tick, ARRAY_BUFFER_RESOURCE, STATUS_DISPOSED,
    STRING_RESOURCE,
};

/// Everything a loader gets to see about an arriving resource.
pub struct LoadContext<'a> {
    pub id: ResourceId,
    pub resource_type: &'a str,
    pub name: &'a str,
    /// Opaque payload; `None` for schema instances.
    pub payload: Option<&'a (dyn Any + Send + Sync)>,
    /// Current snapshot of a schema instance's bytes.
    pub bytes: Option<&'a [u8]>,
}

impl LoadContext<'_> {
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload?.downcast_ref()
    }
}

/// Materializes resources of one type on a consumer thread.
pub trait LocalResourceLoader: Send {
    fn load(&mut self, resource: &LoadContext<'_>) -> anyhow::Result<Box<dyn Any + Send>>;

    /// Releases what [`LocalResourceLoader::load`] produced.
    fn dispose(&mut self, id: ResourceId, local: Box<dyn Any + Send>) {
        let _ = id;
        drop(local);
    }
}

impl<F> LocalResourceLoader for F
where
    F: FnMut(&LoadContext<'_>) -> anyhow::Result<Box<dyn Any + Send>> + Send,
{
    fn load(&mut self, resource: &LoadContext<'_>) -> anyhow::Result<Box<dyn Any + Send>> {
        self(resource)
    }
}

/// Where a resource stands on this consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    /// Envelope received, create record not yet due.
    Pending,
    Loaded,
    Failed(String),
    /// The producer disposed it; the dispose record is not due yet.
    Disposed,
}

enum LocalPayload {
    Value(Payload),
    Instance {
        definition: Arc<ResourceDefinition>,
        buffer: Arc<TripleBuffer>,
    },
}

/// A resource whose create record has been applied on this consumer.
pub struct LocalResource {
    id: ResourceId,
    resource_type: String,
    name: String,
    payload: LocalPayload,
    status: Arc<TripleBuffer>,
    local: Option<Box<dyn Any + Send>>,
    error: Option<String>,
}

impl LocalResource {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> Option<&Arc<ResourceDefinition>> {
        match &self.payload {
            LocalPayload::Instance { definition, .. } => Some(definition),
            LocalPayload::Value(_) => None,
        }
    }

    /// What the loader produced, if it succeeded.
    pub fn local<T: Any>(&self) -> Option<&T> {
        self.local.as_ref()?.downcast_ref()
    }

    pub fn local_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.local.as_mut()?.downcast_mut()
    }
}

pub struct LocalResourceManager {
    thread: Thread,
    envelopes: Receiver<CreateResourceMessage>,
    records: TickRingConsumer,
    acks: Sender<ResourceAck>,
    reader: TripleBufferReader,
    loaders: HashMap<String, Box<dyn LocalResourceLoader>>,
    pending: HashMap<ResourceId, CreateResourceMessage>,
    resources: HashMap<ResourceId, LocalResource>,
    due: Vec<TickRecord>,
}

impl LocalResourceManager {
    pub(crate) fn new(
        thread: Thread,
        envelopes: Receiver<CreateResourceMessage>,
        records: TickRingConsumer,
        acks: Sender<ResourceAck>,
        reader: TripleBufferReader,
    ) -> Self {
        Self {
            thread,
            envelopes,
            records,
            acks,
            reader,
            loaders: HashMap::new(),
            pending: HashMap::new(),
            resources: HashMap::new(),
            due: Vec::new(),
        }
    }

    pub fn thread(&self) -> Thread {
        self.thread
    }

    /// Installs the loader for `resource_type`, replacing any previous one.
    pub fn register_loader(
        &mut self,
        resource_type: impl Into<String>,
        loader: impl LocalResourceLoader + 'static,
    ) {
        self.loaders.insert(resource_type.into(), Box::new(loader));
    }

    /// Advances this consumer to `tick`.
    ///
    /// Picks up the latest committed snapshot, takes every create and
    /// dispose record due at `tick`, receives pending envelopes and applies
    /// the records in order. An error leaves the remaining due records
    /// unapplied and should be treated as fatal for this consumer.
    pub fn update(&mut self, tick: Tick) -> ResourceResult<()> {
        self.reader.swap();
        let due = self.take_due(tick);
        self.receive_envelopes();
        self.apply(due)
    }

    /// Pops the records due at `tick`.
    ///
    /// Must run before [`Self::receive_envelopes`]: the producer sends an
    /// envelope before publishing its create record, so every popped create
    /// has its envelope in the channel by then.
    fn take_due(&mut self, tick: Tick) -> Vec<TickRecord> {
        let mut due = std::mem::take(&mut self.due);
        due.clear();
        due.extend_from_slice(self.records.drain(tick));
        due
    }

    fn receive_envelopes(&mut self) {
        for message in self.envelopes.try_iter() {
            self.pending.insert(message.id, message);
        }
    }

    fn apply(&mut self, due: Vec<TickRecord>) -> ResourceResult<()> {
        let result = due.iter().try_for_each(|record| match record.command {
            ResourceCommand::Create => self.load(record.id),
            ResourceCommand::Dispose => {
                self.dispose(record.id);
                Ok(())
            }
        });
        self.due = due;
        result
    }

    pub fn get_resource(&self, id: ResourceId) -> Option<&LocalResource> {
        self.resources.get(&id)
    }

    pub fn get_resource_mut(&mut self, id: ResourceId) -> Option<&mut LocalResource> {
        self.resources.get_mut(&id)
    }

    /// Loader output for `id`, downcast to `T`.
    pub fn local<T: Any>(&self, id: ResourceId) -> Option<&T> {
        self.resources.get(&id)?.local()
    }

    pub fn load_status(&self, id: ResourceId) -> Option<LoadStatus> {
        if self.pending.contains_key(&id) {
            return Some(LoadStatus::Pending);
        }
        let resource = self.resources.get(&id)?;
        Some(if self.status_disposed(&resource.status) {
            LoadStatus::Disposed
        } else if let Some(reason) = &resource.error {
            LoadStatus::Failed(reason.clone())
        } else {
            LoadStatus::Loaded
        })
    }

    /// Whether the producer has disposed `id`, per the last picked-up snapshot.
    pub fn is_disposed(&self, id: ResourceId) -> bool {
        let status = self
            .resources
            .get(&id)
            .map(|resource| &resource.status)
            .or_else(|| self.pending.get(&id).map(|message| &message.status));
        status.map_or(true, |status| self.status_disposed(status))
    }

    pub fn resources_by_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a LocalResource> + 'a {
        self.resources
            .values()
            .filter(move |resource| resource.resource_type == resource_type)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn status_disposed(&self, status: &TripleBuffer) -> bool {
        status
            .read(&self.reader)
            .first()
            .is_some_and(|flags| flags & STATUS_DISPOSED != 0)
    }

    fn load(&mut self, id: ResourceId) -> ResourceResult<()> {
        let Some(message) = self.pending.remove(&id) else {
            warn!("{:?}: create for unknown resource {id}, skipping", self.thread);
            return Ok(());
        };
        let CreateResourceMessage {
            resource_type,
            id,
            name,
            props,
            status,
        } = message;
        let payload = match props {
            ResourcePayload::Value(payload) => LocalPayload::Value(payload),
            ResourcePayload::Instance { definition, buffer } => {
                LocalPayload::Instance { definition, buffer }
            }
        };
        let mut resource = LocalResource {
            id,
            resource_type,
            name,
            payload,
            status,
            local: None,
            error: None,
        };

        if self.status_disposed(&resource.status) {
            trace!("{:?}: {id} was disposed before it loaded", self.thread);
            self.resources.insert(id, resource);
            return Ok(());
        }

        let result = match self.loaders.get_mut(&resource.resource_type) {
            Some(loader) => {
                let (payload, bytes) = match &resource.payload {
                    LocalPayload::Value(payload) => (Some(payload.as_ref()), None),
                    LocalPayload::Instance { buffer, .. } => (None, Some(buffer.read(&self.reader))),
                };
                let context = LoadContext {
                    id,
                    resource_type: &resource.resource_type,
                    name: &resource.name,
                    payload,
                    bytes,
                };
                loader.load(&context).map_err(|err| format!("{err:#}"))
            }
            None if is_builtin(&resource) => Ok(Box::new(()) as Box<dyn Any + Send>),
            None => return Err(ResourceError::UnregisteredType(resource.resource_type)),
        };

        let ack = match result {
            Ok(local) => {
                debug!("{:?}: loaded {} {id}", self.thread, resource.resource_type);
                resource.local = Some(local);
                Ok(())
            }
            Err(reason) => {
                warn!(
                    "{:?}: {} {id} failed to load: {reason}",
                    self.thread, resource.resource_type
                );
                resource.error = Some(reason.clone());
                Err(reason)
            }
        };
        self.resources.insert(id, resource);
        if self
            .acks
            .send(ResourceAck {
                thread: self.thread,
                id,
                result: ack,
            })
            .is_err()
        {
            debug!("{:?}: producer gone, dropping ack for {id}", self.thread);
        }
        Ok(())
    }

    fn dispose(&mut self, id: ResourceId) {
        self.pending.remove(&id);
        let Some(resource) = self.resources.remove(&id) else {
            warn!("{:?}: dispose for unknown resource {id}, skipping", self.thread);
            return;
        };
        if let Some(local) = resource.local {
            if let Some(loader) = self.loaders.get_mut(&resource.resource_type) {
                loader.dispose(id, local);
            }
        }
        debug!("{:?}: disposed {} {id}", self.thread, resource.resource_type);
    }
}

/// Types that are usable without a loader.
fn is_builtin(resource: &LocalResource) -> bool {
    matches!(resource.payload, LocalPayload::Instance { .. })
        || resource.resource_type == STRING_RESOURCE
        || resource.resource_type == ARRAY_BUFFER_RESOURCE
}

impl ResourceView for LocalResourceManager {
    fn resource_type(&self, id: ResourceId) -> Option<&str> {
        let resource = self.resources.get(&id)?;
        resource.error.is_none().then_some(resource.resource_type.as_str())
    }

    fn resource_bytes(&self, id: ResourceId) -> Option<&[u8]> {
        match &self.resources.get(&id)?.payload {
            LocalPayload::Instance { buffer, .. } => Some(buffer.read(&self.reader)),
            LocalPayload::Value(_) => None,
        }
    }

    fn resource_value(&self, id: ResourceId) -> Option<&(dyn Any + Send + Sync)> {
        match &self.resources.get(&id)?.payload {
            LocalPayload::Value(payload) => Some(payload.as_ref()),
            LocalPayload::Instance { .. } => None,
        }
    }
}
