//! Producer handle shared across worker threads.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::{ResourceConfig, ResourceManager};

/// A [`ResourceManager`] behind a lock, for producers fed by several threads.
///
/// Every operation takes the lock for its duration, so reference counting
/// stays consistent no matter which thread creates or releases a resource.
#[derive(Clone)]
pub struct SyncResourceManager {
    inner: Arc<Mutex<ResourceManager>>,
}

impl SyncResourceManager {
    pub fn new(config: ResourceConfig) -> Self {
        Self::from_manager(ResourceManager::new(config))
    }

    pub fn from_manager(manager: ResourceManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ResourceManager> {
        self.inner.lock()
    }

    /// Runs `f` with exclusive access.
    pub fn with<R>(&self, f: impl FnOnce(&mut ResourceManager) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl Default for SyncResourceManager {
    fn default() -> Self {
        Self::new(ResourceConfig::default())
    }
}
