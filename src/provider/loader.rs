use std::collections::BTreeMap;

use tracing::debug;

use crate::provider::{ModuleError, ProviderHandle, ProviderModule};

/// Resolves provider modules by name
///
/// `load` either returns a handle in the Loaded state with its entry points
/// resolved, or fails; it never produces a half-loaded handle.
pub trait ModuleLoader: Send + Sync {
    /// Locate and load the named module
    fn load(&self, name: &str) -> Result<ProviderHandle, ModuleError>;

    /// Names of the modules this loader can currently find
    fn list_available(&self) -> Vec<String> {
        Vec::new()
    }
}

type ModuleFactory = Box<dyn Fn() -> Result<Box<dyn ProviderModule>, ModuleError> + Send + Sync>;

/// Loader for modules compiled into the host
pub struct StaticLoader {
    factories: BTreeMap<String, ModuleFactory>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register a module factory under a name
    pub fn with_module<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn ProviderModule>, ModuleError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Loader holding the built-in host provider
    pub fn with_builtin_providers() -> Self {
        use crate::provider::builtin::{HOST_MODULE, HostProvider};

        Self::new().with_module(HOST_MODULE, || Ok(Box::new(HostProvider::new())))
    }
}

impl Default for StaticLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for StaticLoader {
    fn load(&self, name: &str) -> Result<ProviderHandle, ModuleError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ModuleError::ModuleNotFound {
                name: name.to_string(),
                searched: Vec::new(),
            })?;
        let module = factory()?;
        debug!("Loaded built-in provider module {}", name);
        Ok(ProviderHandle::loaded(name, None, module))
    }

    fn list_available(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

/// Loader used when the provider subsystem is switched off
#[derive(Debug, Default)]
pub struct DisabledLoader;

impl ModuleLoader for DisabledLoader {
    fn load(&self, name: &str) -> Result<ProviderHandle, ModuleError> {
        Err(ModuleError::load(
            name,
            "provider module subsystem is disabled",
        ))
    }
}

/// Tries several loaders in order
///
/// A loader that cannot find the module passes to the next one; any other
/// failure stops the search, since the module was found but is unusable.
pub struct LoaderChain {
    loaders: Vec<Box<dyn ModuleLoader>>,
}

impl LoaderChain {
    pub fn new() -> Self {
        Self {
            loaders: Vec::new(),
        }
    }

    pub fn with_loader(mut self, loader: Box<dyn ModuleLoader>) -> Self {
        self.loaders.push(loader);
        self
    }
}

impl Default for LoaderChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for LoaderChain {
    fn load(&self, name: &str) -> Result<ProviderHandle, ModuleError> {
        let mut searched = Vec::new();
        for loader in &self.loaders {
            match loader.load(name) {
                Ok(handle) => return Ok(handle),
                Err(ModuleError::ModuleNotFound {
                    searched: paths, ..
                }) => searched.extend(paths),
                Err(e) => return Err(e),
            }
        }
        Err(ModuleError::ModuleNotFound {
            name: name.to_string(),
            searched,
        })
    }

    fn list_available(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .loaders
            .iter()
            .flat_map(|loader| loader.list_available())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
