//! Process-wide provider module cache
//!
//! Loading a module is expensive and may spawn programs, so a collector
//! shares one `ModuleCache` across passes. Each module name maps to its own
//! slot mutex: two threads acquiring the same module wait on the slot and
//! the module is loaded once, while different modules load independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::provider::{ModuleError, ModuleLoader, ProviderHandle};

type Slot = Arc<Mutex<Option<Arc<ProviderHandle>>>>;

/// Caches loaded provider handles by module name
pub struct ModuleCache {
    loader: Arc<dyn ModuleLoader>,
    caching: bool,
    slots: Mutex<HashMap<String, Slot>>,
    loads: AtomicUsize,
}

impl ModuleCache {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            caching: true,
            slots: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Disable caching so every acquire loads a fresh handle
    pub fn without_caching(mut self) -> Self {
        self.caching = false;
        self
    }

    pub fn is_caching(&self) -> bool {
        self.caching
    }

    /// Get the handle for `name`, loading it on first use
    ///
    /// Failed loads are not cached; the next acquire tries again.
    pub fn acquire(&self, name: &str) -> Result<Arc<ProviderHandle>, ModuleError> {
        if !self.caching {
            return self.load(name).map(Arc::new);
        }

        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(name.to_string()).or_default())
        };

        let mut cached = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = cached.as_ref() {
            debug!("Provider module {} served from cache", name);
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(self.load(name)?);
        *cached = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Drop the cached handle for `name`
    ///
    /// The module is unloaded right away when no pass still holds it. Returns
    /// false when `name` was not cached or is still leased; a leased handle
    /// stays cached. The slot stays locked until the unload finishes, so a
    /// concurrent acquire of the same name waits and then loads afresh.
    pub fn evict(&self, name: &str) -> bool {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            match slots.get(name) {
                Some(slot) => Arc::clone(slot),
                None => return false,
            }
        };

        let mut cached = slot.lock().unwrap_or_else(PoisonError::into_inner);
        match cached.as_ref() {
            None => return false,
            Some(handle) if Arc::strong_count(handle) > 1 => {
                debug!("Provider module {} still in use, not evicted", name);
                return false;
            }
            Some(_) => {}
        }

        // Only this slot holds the handle and clones happen under its lock
        match cached.take().map(Arc::try_unwrap) {
            Some(Ok(mut handle)) => {
                handle.unload();
                info!("Provider module {} evicted", name);
                true
            }
            Some(Err(handle)) => {
                *cached = Some(handle);
                false
            }
            None => false,
        }
    }

    /// Evict every cached module
    pub fn clear(&self) {
        let names: Vec<String> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.keys().cloned().collect()
        };
        for name in names {
            self.evict(&name);
        }
    }

    /// Number of loads performed through this cache
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Names of modules currently held in the cache
    pub fn cached_modules(&self) -> Vec<String> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    fn load(&self, name: &str) -> Result<ProviderHandle, ModuleError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let handle = self.loader.load(name)?;
        info!("Provider module {} loaded", name);
        Ok(handle)
    }
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("caching", &self.caching)
            .field("loads", &self.load_count())
            .finish()
    }
}
