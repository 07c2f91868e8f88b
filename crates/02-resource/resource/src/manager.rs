//! Authoritative resource registry on the producing thread.
//!
//! The producer owns every resource: ids, reference counts, the cache index
//! and the working bytes of schema instances. Consumers learn about
//! resources through per-link queues that only move on [`ResourceManager::flush`]
//! and [`ResourceManager::commit`], so a frame's worth of mutations becomes
//! visible to a consumer all at once.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt};
use indexmap::IndexSet;
use log::{debug, trace, warn};
use resource_schema::value::{read_f32, read_u32, write_u32};
use resource_schema::{CompiledProp, PropKind, PropValue, RawBuffer, ResourceDefinition};
use smallvec::{smallvec, SmallVec};
use transport::{
    tick_ring, triple_buffer_flags, ResourceCommand, TickRingProducer, TransportError,
    TripleBuffer, TripleBufferWriter,
};

use crate::retainers::held_refs;
use crate::{
    CacheKey, CreateResourceMessage, LocalResourceManager, Payload, ResourceAck, ResourceConfig,
    ResourceError, ResourceId, ResourcePayload, ResourceResult, ResourceView, Thread, Tick,
    ARRAY_BUFFER_RESOURCE, STATUS_DISPOSED, STRING_RESOURCE,
};

static NEXT_RESOURCE_ID: AtomicU32 = AtomicU32::new(1);

/// Ids are unique for the life of the process and never reused.
fn next_resource_id() -> ResourceId {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Runs once, when a resource's reference count reaches zero.
pub type DisposeHook = Box<dyn FnOnce(ResourceId) + Send>;

/// Optional settings for a new resource.
#[derive(Default)]
pub struct ResourceOptions {
    pub name: Option<String>,
    pub cache_key: Option<CacheKey>,
    dispose: Option<DisposeHook>,
}

impl ResourceOptions {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Creating another resource of the same type under `key` returns this one.
    pub fn cache_key(mut self, key: impl Into<CacheKey>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn on_dispose(mut self, hook: impl FnOnce(ResourceId) + Send + 'static) -> Self {
        self.dispose = Some(Box::new(hook));
        self
    }
}

enum Storage {
    Value(Payload),
    Instance {
        definition: Arc<ResourceDefinition>,
        bytes: Vec<u8>,
    },
}

enum LoadState {
    /// Links that have not acknowledged yet.
    Pending(usize),
    Loaded,
    Failed(String),
}

/// Buffers a resource shares with one consumer link.
struct LinkBinding {
    link: usize,
    thread: Thread,
    status: Arc<TripleBuffer>,
    data: Option<Arc<TripleBuffer>>,
}

/// A live resource as the producer sees it.
pub struct Resource {
    id: ResourceId,
    resource_type: String,
    name: String,
    ref_count: u32,
    storage: Storage,
    cache_key: Option<CacheKey>,
    dispose: Option<DisposeHook>,
    bindings: SmallVec<[LinkBinding; 2]>,
    load: LoadState,
    waiters: Vec<oneshot::Sender<ResourceResult<ResourceId>>>,
}

impl Resource {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Every target consumer has acknowledged a successful load.
    pub fn is_loaded(&self) -> bool {
        matches!(self.load, LoadState::Loaded)
    }

    pub fn load_error(&self) -> Option<&str> {
        match &self.load {
            LoadState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Consumer threads this resource was shipped to.
    pub fn targets(&self) -> impl Iterator<Item = Thread> + '_ {
        self.bindings.iter().map(|binding| binding.thread)
    }

    pub fn value<T: Any>(&self) -> Option<&T> {
        match &self.storage {
            Storage::Value(payload) => payload.downcast_ref(),
            Storage::Instance { .. } => None,
        }
    }

    pub fn definition(&self) -> Option<&Arc<ResourceDefinition>> {
        match &self.storage {
            Storage::Instance { definition, .. } => Some(definition),
            Storage::Value(_) => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Instance { bytes, .. } => Some(bytes),
            Storage::Value(_) => None,
        }
    }

    fn acknowledge(&mut self, ack: ResourceAck) {
        let LoadState::Pending(remaining) = self.load else {
            return;
        };
        match ack.result {
            Ok(()) if remaining > 1 => self.load = LoadState::Pending(remaining - 1),
            Ok(()) => {
                self.load = LoadState::Loaded;
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(self.id));
                }
            }
            Err(reason) => {
                warn!(
                    "{} {} failed to load on {:?}: {reason}",
                    self.resource_type, self.id, ack.thread
                );
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(ResourceError::load_failed(self.id, reason.clone())));
                }
                self.load = LoadState::Failed(reason);
            }
        }
    }
}

enum Outgoing {
    Create {
        message: CreateResourceMessage,
        tick: Tick,
    },
    Dispose {
        id: ResourceId,
        tick: Tick,
    },
}

/// Producer end of one consumer link.
struct ConsumerLink {
    thread: Thread,
    writer: TripleBufferWriter,
    records: TickRingProducer,
    envelopes: Sender<CreateResourceMessage>,
    acks: Receiver<ResourceAck>,
    outbox: Vec<Outgoing>,
}

/// Buffer of a disposed resource, rewritten with its final bytes on every
/// commit until all three slots hold them.
///
/// The link's flag byte keeps rotating after a disposal, so a consumer that
/// has not reached the dispose tick would otherwise read older snapshots
/// again. Status buffers retire with the disposed bit, data buffers with the
/// instance's last bytes.
struct RetiredBuffer {
    link: usize,
    buffer: Arc<TripleBuffer>,
    bytes: Box<[u8]>,
    written: u8,
}

impl RetiredBuffer {
    fn rewrite(&mut self, writer: &mut TripleBufferWriter) -> ResourceResult<()> {
        let slot = self.buffer.copy_to_write_buffer(writer, &self.bytes)?;
        self.written |= 1 << slot;
        Ok(())
    }
}

const ALL_SLOTS: u8 = 0b111;

pub struct ResourceManager {
    config: ResourceConfig,
    tick: Tick,
    links: Vec<ConsumerLink>,
    resources: HashMap<ResourceId, Resource>,
    by_type: HashMap<String, IndexSet<ResourceId>>,
    cache: HashMap<(String, CacheKey), ResourceId>,
    loader_types: HashSet<String>,
    definitions: HashMap<String, Arc<ResourceDefinition>>,
    disposed: Vec<RetiredBuffer>,
    retired: Vec<RetiredBuffer>,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new(ResourceConfig::default())
    }
}

impl ResourceManager {
    pub fn new(config: ResourceConfig) -> Self {
        Self {
            config,
            tick: 0,
            links: Vec::new(),
            resources: HashMap::new(),
            by_type: HashMap::new(),
            cache: HashMap::new(),
            loader_types: HashSet::new(),
            definitions: HashMap::new(),
            disposed: Vec::new(),
            retired: Vec::new(),
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Thread this registry runs on.
    pub fn thread(&self) -> Thread {
        self.config.producer
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Sets the tick stamped onto subsequent create and dispose records.
    pub fn set_tick(&mut self, tick: Tick) {
        self.tick = tick;
    }

    /// Opens a link to a consumer on `thread` and returns its manager.
    ///
    /// Only resources created after the link exists are shipped to it.
    pub fn connect(&mut self, thread: Thread) -> ResourceResult<LocalResourceManager> {
        if thread == self.config.producer || self.links.iter().any(|link| link.thread == thread) {
            return Err(ResourceError::InvalidThread(thread));
        }

        let (writer, reader) = triple_buffer_flags();
        let (records, drain) = tick_ring(self.config.ring_capacity)?;
        let (envelopes, envelope_rx) = crossbeam_channel::unbounded();
        let (ack_tx, acks) = crossbeam_channel::unbounded();

        self.links.push(ConsumerLink {
            thread,
            writer,
            records,
            envelopes,
            acks,
            outbox: Vec::new(),
        });
        debug!("connected {thread:?} consumer to {:?} producer", self.config.producer);
        Ok(LocalResourceManager::new(
            thread,
            envelope_rx,
            drain,
            ack_tx,
            reader,
        ))
    }

    /// Declares that consumers have a loader for opaque `resource_type`.
    pub fn register_resource_type(&mut self, resource_type: impl Into<String>) {
        self.loader_types.insert(resource_type.into());
    }

    /// Creates an opaque resource materialized by `thread`'s loader.
    pub fn create_resource<T: Any + Send + Sync>(
        &mut self,
        thread: Thread,
        resource_type: &str,
        props: T,
        options: ResourceOptions,
    ) -> ResourceResult<ResourceId> {
        let link = self.link_index(thread)?;
        if !self.loader_types.contains(resource_type) {
            return Err(ResourceError::UnregisteredType(resource_type.to_owned()));
        }
        if let Some(id) = self.cached(resource_type, options.cache_key.as_ref()) {
            return Ok(id);
        }

        let id = self.insert(resource_type, Storage::Value(Arc::new(props)), options);
        self.bind(id, smallvec![link])?;
        Ok(id)
    }

    /// Creates an instance of a compiled schema, shipped to every link.
    ///
    /// Unset properties take their declared defaults. References, strings
    /// and buffers among `props` are retained before the instance becomes
    /// visible; a failure part-way releases everything taken so far.
    pub fn create_instance<'a>(
        &mut self,
        definition: Arc<ResourceDefinition>,
        props: impl IntoIterator<Item = (&'a str, PropValue)>,
        mut options: ResourceOptions,
    ) -> ResourceResult<ResourceId> {
        self.register_definition(&definition)?;
        let resource_type = definition.name();

        let mut supplied: Vec<(&CompiledProp, PropValue)> = Vec::new();
        for (name, value) in props {
            let prop = definition
                .prop(name)
                .ok_or_else(|| ResourceError::UnknownProp {
                    resource_type: resource_type.to_owned(),
                    prop: name.to_owned(),
                })?;
            prop.validate(&value)?;
            self.check_targets(prop, &value)?;
            supplied.push((prop, value));
        }
        if let Some(missing) = definition
            .props()
            .find(|prop| prop.required && !supplied.iter().any(|(given, _)| given.name == prop.name))
        {
            return Err(ResourceError::MissingRequired {
                resource_type: resource_type.to_owned(),
                prop: missing.name.clone(),
            });
        }
        if let Some(id) = self.cached(resource_type, options.cache_key.as_ref()) {
            return Ok(id);
        }

        let mut bytes = definition.default_bytes();
        let mut deferred = Vec::new();
        for (prop, value) in supplied {
            if prop.kind.is_plain() {
                prop.encode_plain(&value, &mut bytes[prop.range()])?;
            } else {
                deferred.push((prop, value));
            }
        }
        for prop in definition.props() {
            if deferred.iter().any(|(given, _)| given.name == prop.name) {
                continue;
            }
            if let Some(default) = prop.default.as_ref().filter(|_| !prop.kind.is_plain()) {
                deferred.push((prop, default.clone()));
            }
        }

        let dispose = options.dispose.take();
        let storage = Storage::Instance {
            definition: definition.clone(),
            bytes,
        };
        let id = self.insert(resource_type, storage, options);
        for (prop, value) in deferred {
            if let Err(err) = self.write_prop(id, prop, value) {
                self.destroy(id);
                return Err(err);
            }
        }
        if let Some(resource) = self.resources.get_mut(&id) {
            resource.dispose = dispose;
        }

        self.bind(id, self.all_links())?;
        Ok(id)
    }

    /// Interns `text` as a `string` resource. The empty string is id 0.
    pub fn create_string(&mut self, text: impl Into<String>) -> ResourceResult<ResourceId> {
        let text = text.into();
        if text.is_empty() {
            return Ok(0);
        }
        let key = CacheKey::Str(text.clone());
        if let Some(id) = self.cached(STRING_RESOURCE, Some(&key)) {
            return Ok(id);
        }

        let options = ResourceOptions::default().cache_key(key);
        let id = self.insert(STRING_RESOURCE, Storage::Value(Arc::new(text)), options);
        self.bind(id, self.all_links())?;
        Ok(id)
    }

    pub fn create_array_buffer(&mut self, buffer: RawBuffer) -> ResourceResult<ResourceId> {
        let id = self.insert(
            ARRAY_BUFFER_RESOURCE,
            Storage::Value(Arc::new(buffer)),
            ResourceOptions::default(),
        );
        self.bind(id, self.all_links())?;
        Ok(id)
    }

    pub fn get_resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(&id)
    }

    /// Live resources of `resource_type`, in creation order.
    pub fn resources_by_type<'a>(
        &'a self,
        resource_type: &str,
    ) -> impl Iterator<Item = &'a Resource> + 'a {
        self.resource_ids_by_type(resource_type)
            .filter_map(|id| self.resources.get(&id))
    }

    pub fn resource_ids_by_type<'a>(
        &'a self,
        resource_type: &str,
    ) -> impl Iterator<Item = ResourceId> + 'a {
        self.by_type
            .get(resource_type)
            .into_iter()
            .flat_map(|ids| ids.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Takes a reference on `id` and returns the new count.
    pub fn add_resource_ref(&mut self, id: ResourceId) -> ResourceResult<u32> {
        let resource = self
            .resources
            .get_mut(&id)
            .ok_or(ResourceError::NotFound(id))?;
        resource.ref_count = resource.ref_count.saturating_add(1);
        Ok(resource.ref_count)
    }

    /// Drops a reference on `id`, disposing it once nothing holds it.
    ///
    /// The count saturates at zero, so disposing an unreferenced resource
    /// disposes it immediately. Returns whether the resource was disposed.
    pub fn dispose_resource(&mut self, id: ResourceId) -> ResourceResult<bool> {
        let resource = self
            .resources
            .get_mut(&id)
            .ok_or(ResourceError::NotFound(id))?;
        resource.ref_count = resource.ref_count.saturating_sub(1);
        if resource.ref_count > 0 {
            return Ok(false);
        }
        self.destroy(id);
        Ok(true)
    }

    /// Host write to a mutable property.
    pub fn set_prop(&mut self, id: ResourceId, name: &str, value: PropValue) -> ResourceResult<()> {
        let definition = self.definition_of(id)?;
        let prop = lookup(&definition, name)?;
        if !prop.mutable {
            return Err(ResourceError::Immutable(name.to_owned()));
        }
        self.write_prop(id, prop, value)
    }

    /// Script write; only properties declared script-writable accept it.
    pub fn set_prop_from_script(
        &mut self,
        id: ResourceId,
        name: &str,
        value: PropValue,
    ) -> ResourceResult<()> {
        let definition = self.definition_of(id)?;
        let prop = lookup(&definition, name)?;
        if !prop.script {
            return Err(ResourceError::NotScriptWritable(name.to_owned()));
        }
        self.write_prop(id, prop, value)
    }

    /// Untyped read of a property's current value.
    pub fn get_prop(&self, id: ResourceId, name: &str) -> ResourceResult<PropValue> {
        let resource = self.resources.get(&id).ok_or(ResourceError::NotFound(id))?;
        let (definition, bytes) = match &resource.storage {
            Storage::Instance { definition, bytes } => (definition, bytes),
            Storage::Value(_) => {
                return Err(ResourceError::UnknownProp {
                    resource_type: resource.resource_type.clone(),
                    prop: name.to_owned(),
                })
            }
        };
        let prop = lookup(definition, name)?;
        let slot = &bytes[prop.range()];
        let count = prop.element_count as usize;
        let id_at = |index: usize| Some(read_u32(slot, index)).filter(|&id| id != 0);

        Ok(match prop.kind {
            PropKind::Bool => PropValue::Bool(read_u32(slot, 0) != 0),
            PropKind::U32 | PropKind::Bitmask | PropKind::Enum => PropValue::U32(read_u32(slot, 0)),
            PropKind::F32 => PropValue::F32(read_f32(slot, 0)),
            PropKind::Vec2
            | PropKind::Vec3
            | PropKind::Rgb
            | PropKind::Rgba
            | PropKind::Quat
            | PropKind::Mat4 => PropValue::Floats((0..count).map(|i| read_f32(slot, i)).collect()),
            PropKind::String => {
                PropValue::Str(self.string(read_u32(slot, 0)).unwrap_or_default().to_owned())
            }
            PropKind::ArrayBuffer => PropValue::Buffer(
                self.raw_buffer(read_u32(slot, 2))
                    .cloned()
                    .unwrap_or_else(|| RawBuffer::frozen(Vec::new())),
            ),
            PropKind::Ref | PropKind::SelfRef => PropValue::Ref(id_at(0)),
            PropKind::RefArray => PropValue::refs((0..count).map(id_at).take_while(Option::is_some)),
            PropKind::RefMap => PropValue::refs((0..count).map(id_at)),
        })
    }

    /// Resolves once every target consumer has loaded `id`.
    ///
    /// Rejects with [`ResourceError::LoadFailed`] if a consumer reports a
    /// failure and with [`ResourceError::Disposed`] if the resource is
    /// disposed first. Acknowledgements are collected by [`Self::flush`].
    pub fn wait_for_resource(
        &mut self,
        id: ResourceId,
    ) -> BoxFuture<'static, ResourceResult<ResourceId>> {
        self.process_acks();
        let Some(resource) = self.resources.get_mut(&id) else {
            return future::ready(Err(ResourceError::NotFound(id))).boxed();
        };
        match &resource.load {
            LoadState::Loaded => future::ready(Ok(id)).boxed(),
            LoadState::Failed(reason) => {
                future::ready(Err(ResourceError::load_failed(id, reason.clone()))).boxed()
            }
            LoadState::Pending(_) => {
                let (tx, rx) = oneshot::channel();
                resource.waiters.push(tx);
                rx.map(move |result| result.unwrap_or(Err(ResourceError::Disposed(id))))
                    .boxed()
            }
        }
    }

    /// Publishes the current bytes of every shipped instance.
    ///
    /// Each link gets one coherent snapshot: all buffers are copied into
    /// their write slots before the link's flag byte swaps.
    pub fn commit(&mut self) -> ResourceResult<()> {
        for resource in self.resources.values() {
            let Storage::Instance { bytes, .. } = &resource.storage else {
                continue;
            };
            for binding in &resource.bindings {
                if let Some(buffer) = &binding.data {
                    buffer.copy_to_write_buffer(&mut self.links[binding.link].writer, bytes)?;
                }
            }
        }

        for retired in &mut self.retired {
            let link = retired.link;
            retired.rewrite(&mut self.links[link].writer)?;
        }
        self.retired.retain(|retired| retired.written != ALL_SLOTS);

        for link in &mut self.links {
            link.writer.swap();
        }
        trace!("committed {} resources at tick {}", self.resources.len(), self.tick);
        Ok(())
    }

    /// Collects load acknowledgements, retires disposed buffers and ships
    /// queued envelopes and tick records, in creation order, to every link.
    ///
    /// A link whose ring cannot take its whole outbox fails with
    /// [`TransportError::RingFull`] before anything is sent on it. A
    /// disconnected consumer fails with [`ResourceError::Disconnected`]; its
    /// link is dead and the rest of its outbox is dropped.
    pub fn flush(&mut self) -> ResourceResult<()> {
        self.process_acks();

        for mut retired in self.disposed.drain(..) {
            retired.rewrite(&mut self.links[retired.link].writer)?;
            self.retired.push(retired);
        }

        for link in &mut self.links {
            if link.outbox.is_empty() {
                continue;
            }
            let capacity = link.records.capacity();
            let free = capacity.saturating_sub(link.records.in_flight());
            if link.outbox.len() > free as usize {
                return Err(TransportError::RingFull { capacity }.into());
            }

            trace!("flushing {} records to {:?}", link.outbox.len(), link.thread);
            for outgoing in link.outbox.drain(..) {
                let (command, tick, id) = match outgoing {
                    Outgoing::Create { message, tick } => {
                        let id = message.id;
                        link.envelopes
                            .send(message)
                            .map_err(|_| ResourceError::Disconnected(link.thread))?;
                        (ResourceCommand::Create, tick, id)
                    }
                    Outgoing::Dispose { id, tick } => (ResourceCommand::Dispose, tick, id),
                };
                link.records.enqueue(command, tick, id)?;
            }
        }
        Ok(())
    }

    /// Applies load acknowledgements that consumers have sent so far.
    pub fn process_acks(&mut self) {
        let mut acks = Vec::new();
        for link in &self.links {
            acks.extend(link.acks.try_iter());
        }
        for ack in acks {
            match self.resources.get_mut(&ack.id) {
                Some(resource) => resource.acknowledge(ack),
                None => debug!("ignoring ack for retired resource {} from {:?}", ack.id, ack.thread),
            }
        }
    }

    pub(crate) fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    fn link_index(&self, thread: Thread) -> ResourceResult<usize> {
        self.links
            .iter()
            .position(|link| link.thread == thread)
            .ok_or(ResourceError::InvalidThread(thread))
    }

    fn all_links(&self) -> SmallVec<[usize; 2]> {
        (0..self.links.len()).collect()
    }

    fn cached(&self, resource_type: &str, key: Option<&CacheKey>) -> Option<ResourceId> {
        let key = key?;
        self.cache
            .get(&(resource_type.to_owned(), key.clone()))
            .copied()
    }

    fn register_definition(&mut self, definition: &Arc<ResourceDefinition>) -> ResourceResult<()> {
        match self.definitions.get(definition.name()) {
            Some(known) if Arc::ptr_eq(known, definition) || **known == **definition => Ok(()),
            Some(_) => Err(ResourceError::DefinitionConflict(definition.name().to_owned())),
            None => {
                self.definitions
                    .insert(definition.name().to_owned(), definition.clone());
                Ok(())
            }
        }
    }

    fn definition_of(&self, id: ResourceId) -> ResourceResult<Arc<ResourceDefinition>> {
        let resource = self.resources.get(&id).ok_or(ResourceError::NotFound(id))?;
        resource
            .definition()
            .cloned()
            .ok_or_else(|| ResourceError::TypeMismatch {
                id,
                expected: "schema instance".to_owned(),
                actual: resource.resource_type.clone(),
            })
    }

    fn insert(&mut self, resource_type: &str, storage: Storage, options: ResourceOptions) -> ResourceId {
        let id = next_resource_id();
        let ResourceOptions {
            name,
            cache_key,
            dispose,
        } = options;
        let name = name.unwrap_or_else(|| format!("{resource_type}[{id}]"));

        if let Some(key) = &cache_key {
            self.cache.insert((resource_type.to_owned(), key.clone()), id);
        }
        self.by_type
            .entry(resource_type.to_owned())
            .or_default()
            .insert(id);
        debug!("created {resource_type} {id} ({name})");
        self.resources.insert(
            id,
            Resource {
                id,
                resource_type: resource_type.to_owned(),
                name,
                ref_count: 0,
                storage,
                cache_key,
                dispose,
                bindings: SmallVec::new(),
                load: LoadState::Pending(0),
                waiters: Vec::new(),
            },
        );
        id
    }

    /// Allocates the link buffers for `id` and queues its create envelope.
    fn bind(&mut self, id: ResourceId, links: SmallVec<[usize; 2]>) -> ResourceResult<()> {
        let tick = self.tick;
        let resource = self
            .resources
            .get_mut(&id)
            .ok_or(ResourceError::NotFound(id))?;

        for index in links {
            let link = &mut self.links[index];
            let status = Arc::new(TripleBuffer::with_contents(&link.writer, &[0])?);
            let (props, data) = match &resource.storage {
                Storage::Value(payload) => (ResourcePayload::Value(payload.clone()), None),
                Storage::Instance { definition, bytes } => {
                    let buffer = Arc::new(TripleBuffer::with_contents(&link.writer, bytes)?);
                    let props = ResourcePayload::Instance {
                        definition: definition.clone(),
                        buffer: buffer.clone(),
                    };
                    (props, Some(buffer))
                }
            };
            link.outbox.push(Outgoing::Create {
                message: CreateResourceMessage {
                    resource_type: resource.resource_type.clone(),
                    id,
                    name: resource.name.clone(),
                    props,
                    status: status.clone(),
                },
                tick,
            });
            resource.bindings.push(LinkBinding {
                link: index,
                thread: link.thread,
                status,
                data,
            });
        }

        resource.load = match resource.bindings.len() {
            0 => LoadState::Loaded,
            pending => LoadState::Pending(pending),
        };
        Ok(())
    }

    fn check_targets(&self, prop: &CompiledProp, value: &PropValue) -> ResourceResult<()> {
        let Some(expected) = prop.target.as_deref() else {
            return Ok(());
        };
        let ids: SmallVec<[ResourceId; 8]> = match value {
            PropValue::Ref(id) => id.iter().copied().collect(),
            PropValue::Refs(slots) => slots.iter().flatten().copied().collect(),
            _ => return Ok(()),
        };
        for id in ids.into_iter().filter(|&id| id != 0) {
            let target = self.resources.get(&id).ok_or(ResourceError::NotFound(id))?;
            if target.resource_type != expected {
                return Err(ResourceError::TypeMismatch {
                    id,
                    expected: expected.to_owned(),
                    actual: target.resource_type.clone(),
                });
            }
        }
        Ok(())
    }

    fn write_prop(&mut self, id: ResourceId, prop: &CompiledProp, value: PropValue) -> ResourceResult<()> {
        prop.validate(&value)?;
        self.check_targets(prop, &value)?;

        match value {
            PropValue::Str(text) => {
                let target = self.create_string(text)?;
                self.replace_refs(id, prop, &[target])
            }
            PropValue::Buffer(buffer) => {
                if read_u32(&self.instance_bytes_mut(id)?[prop.range()], 2) != 0 {
                    return Err(ResourceError::BufferAlreadySet {
                        id,
                        prop: prop.name.clone(),
                    });
                }
                let length = buffer_length(id, prop, buffer.len())?;
                let mutable = u32::from(buffer.is_mutable());
                let buffer_id = self.create_array_buffer(buffer)?;
                self.add_resource_ref(buffer_id)?;
                let slot = &mut self.instance_bytes_mut(id)?[prop.range()];
                write_u32(slot, 0, length);
                write_u32(slot, 1, mutable);
                write_u32(slot, 2, buffer_id);
                Ok(())
            }
            PropValue::Ref(target) if prop.back_ref => {
                let slot = &mut self.instance_bytes_mut(id)?[prop.range()];
                write_u32(slot, 0, target.unwrap_or(0));
                Ok(())
            }
            PropValue::Ref(target) => self.replace_refs(id, prop, &[target.unwrap_or(0)]),
            PropValue::Refs(slots) => {
                let ids: SmallVec<[ResourceId; 8]> =
                    slots.iter().map(|slot| slot.unwrap_or(0)).collect();
                self.replace_refs(id, prop, &ids)
            }
            plain => {
                let slot = &mut self.instance_bytes_mut(id)?[prop.range()];
                prop.encode_plain(&plain, slot)?;
                Ok(())
            }
        }
    }

    /// Stores `targets` (zero-padded) in an owning property.
    ///
    /// New targets are retained before old ones are released, so rewriting
    /// the same id never lets it reach zero.
    fn replace_refs(
        &mut self,
        id: ResourceId,
        prop: &CompiledProp,
        targets: &[ResourceId],
    ) -> ResourceResult<()> {
        let count = prop.element_count as usize;
        let previous: SmallVec<[ResourceId; 8]> = {
            let slot = &self.instance_bytes_mut(id)?[prop.range()];
            (0..count).map(|index| read_u32(slot, index)).collect()
        };

        for &target in targets.iter().filter(|&&target| target != 0) {
            self.add_resource_ref(target)?;
        }
        let slot = &mut self.instance_bytes_mut(id)?[prop.range()];
        for index in 0..count {
            write_u32(slot, index, targets.get(index).copied().unwrap_or(0));
        }
        for target in previous.into_iter().filter(|&target| target != 0) {
            self.release(target);
        }
        Ok(())
    }

    fn release(&mut self, id: ResourceId) {
        match self.dispose_resource(id) {
            Ok(_) => {}
            Err(_) => debug!("released reference to missing resource {id}"),
        }
    }

    fn instance_bytes_mut(&mut self, id: ResourceId) -> ResourceResult<&mut [u8]> {
        let resource = self
            .resources
            .get_mut(&id)
            .ok_or(ResourceError::NotFound(id))?;
        match &mut resource.storage {
            Storage::Instance { bytes, .. } => Ok(bytes),
            Storage::Value(_) => Err(ResourceError::TypeMismatch {
                id,
                expected: "schema instance".to_owned(),
                actual: resource.resource_type.clone(),
            }),
        }
    }

    /// Removes `id` and everything only it kept alive.
    ///
    /// Walks owned references with an explicit worklist, so arbitrarily deep
    /// ownership chains cannot exhaust the stack.
    fn destroy(&mut self, id: ResourceId) {
        let tick = self.tick;
        let mut worklist: SmallVec<[ResourceId; 8]> = smallvec![id];

        while let Some(id) = worklist.pop() {
            let Some(mut resource) = self.resources.remove(&id) else {
                continue;
            };
            if let Some(hook) = resource.dispose.take() {
                hook(id);
            }
            if let Some(key) = resource.cache_key.take() {
                self.cache.remove(&(resource.resource_type.clone(), key));
            }
            if let Some(ids) = self.by_type.get_mut(&resource.resource_type) {
                ids.shift_remove(&id);
            }
            for waiter in resource.waiters.drain(..) {
                let _ = waiter.send(Err(ResourceError::Disposed(id)));
            }
            for binding in resource.bindings.drain(..) {
                self.links[binding.link]
                    .outbox
                    .push(Outgoing::Dispose { id, tick });
                self.disposed.push(RetiredBuffer {
                    link: binding.link,
                    buffer: binding.status,
                    bytes: Box::new([STATUS_DISPOSED]),
                    written: 0,
                });
                if let (Some(buffer), Storage::Instance { bytes, .. }) =
                    (binding.data, &resource.storage)
                {
                    self.disposed.push(RetiredBuffer {
                        link: binding.link,
                        buffer,
                        bytes: bytes.as_slice().into(),
                        written: 0,
                    });
                }
            }

            if let Storage::Instance { definition, bytes } = &resource.storage {
                for held in held_refs(definition, bytes) {
                    if let Some(target) = self.resources.get_mut(&held.id) {
                        target.ref_count = target.ref_count.saturating_sub(1);
                        if target.ref_count == 0 {
                            worklist.push(held.id);
                        }
                    }
                }
            }
            debug!("disposed {} {id}", resource.resource_type);
        }
    }
}

/// Length word of an array-buffer slot.
fn buffer_length(id: ResourceId, prop: &CompiledProp, len: usize) -> ResourceResult<u32> {
    u32::try_from(len).map_err(|_| ResourceError::BufferTooLarge {
        id,
        prop: prop.name.clone(),
        len,
    })
}

fn lookup<'d>(definition: &'d ResourceDefinition, name: &str) -> ResourceResult<&'d CompiledProp> {
    definition
        .prop(name)
        .ok_or_else(|| ResourceError::UnknownProp {
            resource_type: definition.name().to_owned(),
            prop: name.to_owned(),
        })
}

impl ResourceView for ResourceManager {
    fn resource_type(&self, id: ResourceId) -> Option<&str> {
        self.resources
            .get(&id)
            .map(|resource| resource.resource_type.as_str())
    }

    fn resource_bytes(&self, id: ResourceId) -> Option<&[u8]> {
        self.resources.get(&id)?.bytes()
    }

    fn resource_value(&self, id: ResourceId) -> Option<&(dyn Any + Send + Sync)> {
        match &self.resources.get(&id)?.storage {
            Storage::Value(payload) => Some(payload.as_ref()),
            Storage::Instance { .. } => None,
        }
    }
}
