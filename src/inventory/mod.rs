//! Inventory collection
//!
//! # Architecture
//!
//! - **InventoryPlan**: the facts to collect and their sources
//! - **InventoryCollector**: runs one pass, recording an outcome per fact
//! - **InventoryResult**: ordered facts with pass id and timestamp
//! - **InventoryError**: the few failures that abort a whole pass
//!
//! # Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use hwinventory::{CollectorConfig, InventoryCollector, InventoryPlan};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CollectorConfig::builder().build()?;
//! let cache = Arc::new(config.create_module_cache());
//! let collector = InventoryCollector::new(InventoryPlan::default(), cache);
//! let result = collector.collect(config.create_backend()?)?;
//! print!("{result}");
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod error;
pub mod plan;
pub mod result;

pub use collector::{InventoryCollector, NO_MATCHING_RECORD, PASS_ABANDONED};
pub use error::InventoryError;
pub use plan::{FactSource, FactSpec, InventoryPlan};
pub use result::{FactEntry, FactOutcome, InventoryResult};
