use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Top-level failures of an inventory pass
///
/// Per-fact failures never surface here; they are recorded in the result.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Nothing could be acquired and no fact was obtained
    #[error("Inventory environment unavailable: {reason}")]
    Environment { reason: String },

    #[error("Inventory pass timed out after {0:?}")]
    Timeout(Duration),

    #[error("Inventory pass aborted: {reason}")]
    Aborted { reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to write inventory to {target}")]
    Sink {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

impl InventoryError {
    pub fn environment(reason: impl Into<String>) -> Self {
        Self::Environment {
            reason: reason.into(),
        }
    }

    pub fn sink(target: impl Into<String>, source: std::io::Error) -> Self {
        Self::Sink {
            target: target.into(),
            source,
        }
    }
}
