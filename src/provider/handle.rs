//! Loaded provider handles and the entry points resolved from them

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::provider::{ModuleError, ProviderModule};
use crate::query::PropertyValue;

/// Load status of a provider handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Unloaded,
    Loaded,
    Failed,
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Failed => "failed",
        })
    }
}

/// A provider module and the entry points it exports
///
/// Entry points are resolved eagerly when the handle is created. An
/// `EntryPoint` borrows the handle, so the borrow checker rejects any use of
/// a callable after `unload()`. Dropping the handle unloads it.
pub struct ProviderHandle {
    name: String,
    location: Option<PathBuf>,
    status: LoadStatus,
    module: Option<Box<dyn ProviderModule>>,
    symbols: BTreeSet<String>,
    failure: Option<String>,
}

impl ProviderHandle {
    /// Handle for a module that has not been loaded
    pub fn unloaded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: None,
            status: LoadStatus::Unloaded,
            module: None,
            symbols: BTreeSet::new(),
            failure: None,
        }
    }

    /// Handle recording a failed load
    pub fn failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: None,
            status: LoadStatus::Failed,
            module: None,
            symbols: BTreeSet::new(),
            failure: Some(reason.into()),
        }
    }

    /// Wrap a freshly loaded module, resolving its exported entry points
    pub fn loaded(
        name: impl Into<String>,
        location: Option<PathBuf>,
        module: Box<dyn ProviderModule>,
    ) -> Self {
        let name = name.into();
        let symbols: BTreeSet<String> = module.entry_points().into_iter().collect();
        debug!("Provider module {} exports {:?}", name, symbols);
        Self {
            name,
            location,
            status: LoadStatus::Loaded,
            module: Some(module),
            symbols,
            failure: None,
        }
    }

    /// Look up an exported entry point
    pub fn resolve_symbol(&self, symbol: &str) -> Result<EntryPoint<'_>, ModuleError> {
        let module = match (&self.status, &self.module) {
            (LoadStatus::Loaded, Some(module)) => module.as_ref(),
            _ => {
                return Err(ModuleError::NotLoaded {
                    module: self.name.clone(),
                });
            }
        };
        if !self.symbols.contains(symbol) {
            return Err(ModuleError::SymbolNotFound {
                module: self.name.clone(),
                symbol: symbol.to_string(),
            });
        }
        Ok(EntryPoint {
            module,
            module_name: &self.name,
            symbol: symbol.to_string(),
        })
    }

    /// Release the module; a no-op unless the handle is loaded
    pub fn unload(&mut self) {
        if self.status != LoadStatus::Loaded {
            return;
        }
        if let Some(mut module) = self.module.take() {
            module.release();
        }
        self.symbols.clear();
        self.status = LoadStatus::Unloaded;
        info!("Provider module {} unloaded", self.name);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn status(&self) -> LoadStatus {
        self.status
    }

    pub fn is_loaded(&self) -> bool {
        self.status == LoadStatus::Loaded
    }

    pub fn entry_points(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("status", &self.status)
            .field("symbols", &self.symbols)
            .field("failure", &self.failure)
            .finish()
    }
}

impl Drop for ProviderHandle {
    fn drop(&mut self) {
        self.unload();
    }
}

/// A bound entry point; valid only while its handle is borrowed
pub struct EntryPoint<'m> {
    module: &'m dyn ProviderModule,
    module_name: &'m str,
    symbol: String,
}

impl EntryPoint<'_> {
    /// Call the entry point; an empty result is an invocation failure
    pub fn invoke(&self) -> Result<PropertyValue, ModuleError> {
        debug!("Invoking {}::{}", self.module_name, self.symbol);
        let value = self.module.invoke(&self.symbol)?;
        let empty = match &value {
            PropertyValue::Null => true,
            other => other.as_text().is_some_and(|t| t.trim().is_empty()),
        };
        if empty {
            return Err(ModuleError::invocation(
                self.module_name,
                &self.symbol,
                "entry point returned an empty result",
            ));
        }
        Ok(value)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn module_name(&self) -> &str {
        self.module_name
    }
}
