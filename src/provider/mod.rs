//! Provider modules
//!
//! A provider module exports named zero-argument entry points that each
//! produce one fact value. Modules are located and loaded by a
//! [`ModuleLoader`], wrapped in a [`ProviderHandle`] and shared between
//! inventory passes through a [`ModuleCache`].

pub mod builtin;
pub mod cache;
pub mod error;
pub mod handle;
pub mod loader;
pub mod manifest;

pub use cache::ModuleCache;
pub use error::ModuleError;
pub use handle::{EntryPoint, LoadStatus, ProviderHandle};
pub use loader::{DisabledLoader, LoaderChain, ModuleLoader, StaticLoader};
pub use manifest::ManifestLoader;

use crate::query::PropertyValue;

/// Code behind a loaded provider module
pub trait ProviderModule: Send + Sync {
    /// Names of the exported entry points
    fn entry_points(&self) -> Vec<String>;

    /// Run one entry point
    fn invoke(&self, symbol: &str) -> Result<PropertyValue, ModuleError>;

    /// Free module resources; called exactly once when the handle unloads
    fn release(&mut self) {}
}
