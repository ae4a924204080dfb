use std::path::PathBuf;

use thiserror::Error;

/// Failures of the module loader and of provider entry points
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Provider module not found: {name} (searched: {searched:?})")]
    ModuleNotFound { name: String, searched: Vec<PathBuf> },

    #[error("Failed to load provider module {name}: {reason}")]
    Load { name: String, reason: String },

    #[error("Entry point '{symbol}' not exported by provider module {module}")]
    SymbolNotFound { module: String, symbol: String },

    #[error("Entry point {module}::{symbol} failed: {reason}")]
    Invocation {
        module: String,
        symbol: String,
        reason: String,
    },

    #[error("Provider module {module} is not loaded")]
    NotLoaded { module: String },
}

impl ModuleError {
    pub fn load(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invocation(
        module: impl Into<String>,
        symbol: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invocation {
            module: module.into(),
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ModuleNotFound { .. })
    }
}
