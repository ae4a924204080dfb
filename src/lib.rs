//! Hardware inventory engine
//!
//! Collects named hardware facts from two kinds of sources: WQL-style queries
//! against a management backend (CIM through PowerShell, a sysfs/procfs
//! reader, or a JSON snapshot), and entry points of provider modules located
//! at runtime. Every fact comes back as a value or a reason it is
//! unavailable; a pass only fails outright when nothing could be acquired.

pub mod backend;
pub mod config;
pub mod inventory;
pub mod logging;
pub mod provider;
pub mod query;
pub mod runner;
pub mod session;
pub mod sink;

#[cfg(test)]
mod test_utils;

pub use config::{BackendKind, CollectorConfig, CollectorConfigBuilder, ConfigError};
pub use inventory::{
    FactOutcome, FactSpec, InventoryCollector, InventoryError, InventoryPlan, InventoryResult,
};
pub use runner::InventoryRunner;
