//! Resource types and consumer plumbing shared by the end-to-end tests.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use log::debug;
use resource::kinds::{Ref, Str, F32};
use resource::{
    define_resource, LoadContext, LocalResourceLoader, LocalResourceManager, ResourceId,
    ResourceResult, Tick,
};

pub const IMAGE: &str = "image";

define_resource! {
    /// Opaque pixels decoded by the consumer's [`ImageLoader`].
    pub struct Image("image");
}

define_resource! {
    pub struct Texture("texture") {
        mut image: Ref<Image>,
        mut label: Str,
    }
}

define_resource! {
    pub struct Material("material") {
        mut name: Str,
        #[prop(script, min(0.0), max(1.0))]
        mut metallic_factor: F32 = 1.0,
        mut base_color_texture: Ref<Texture>,
    }
}

/// What the producer knows about an image.
#[derive(Clone, Debug)]
pub struct ImageSource {
    pub width: u32,
    pub height: u32,
}

/// What a consumer turns it into.
#[derive(Debug)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
}

/// Decodes [`ImageSource`] payloads and counts loads and disposals.
#[derive(Clone, Default)]
pub struct ImageLoader {
    pub loads: Arc<AtomicUsize>,
    pub disposals: Arc<AtomicUsize>,
}

impl LocalResourceLoader for ImageLoader {
    fn load(&mut self, resource: &LoadContext<'_>) -> anyhow::Result<Box<dyn Any + Send>> {
        let source = resource
            .payload::<ImageSource>()
            .ok_or_else(|| anyhow::anyhow!("image {} has no source", resource.id))?;
        anyhow::ensure!(source.width > 0 && source.height > 0, "empty image");
        self.loads.fetch_add(1, Ordering::SeqCst);
        debug!("decoding {}x{} image {}", source.width, source.height, resource.id);
        Ok(Box::new(DecodedImage {
            pixels: vec![0xff; (source.width * source.height * 4) as usize],
        }))
    }

    fn dispose(&mut self, _id: ResourceId, local: Box<dyn Any + Send>) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        drop(local);
    }
}

type Job = Box<dyn FnOnce(&mut LocalResourceManager) + Send>;

/// A consumer on its own OS thread, driven one job at a time.
pub struct ConsumerThread {
    jobs: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl ConsumerThread {
    pub fn spawn(local: LocalResourceManager) -> Self {
        let (jobs, incoming) = crossbeam_channel::unbounded::<Job>();
        let handle = thread::spawn(move || {
            let mut local = local;
            for job in incoming {
                job(&mut local);
            }
        });
        Self {
            jobs: Some(jobs),
            handle: Some(handle),
        }
    }

    /// Runs `f` against the consumer on its thread and returns the result.
    pub fn with<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut LocalResourceManager) -> R + Send + 'static,
    ) -> R {
        let (reply, result) = crossbeam_channel::bounded(1);
        self.jobs
            .as_ref()
            .expect("consumer running")
            .send(Box::new(move |local: &mut LocalResourceManager| {
                let _ = reply.send(f(local));
            }))
            .expect("consumer thread alive");
        result.recv().expect("consumer reply")
    }

    pub fn update(&self, tick: Tick) -> ResourceResult<()> {
        self.with(move |local| local.update(tick))
    }
}

impl Drop for ConsumerThread {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
