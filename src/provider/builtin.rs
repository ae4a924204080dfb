//! Built-in host provider
//!
//! Answers identity facts that need no management backend, so an inventory
//! still has something to report when the backend is unreachable.

use std::fs;

use crate::provider::{ModuleError, ProviderModule};
use crate::query::PropertyValue;

/// Module name of the built-in host provider
pub const HOST_MODULE: &str = "host";

const GET_HOST_NAME: &str = "GetHostName";
const GET_OS_FAMILY: &str = "GetOsFamily";
const GET_ARCHITECTURE: &str = "GetArchitecture";
const GET_LOGICAL_PROCESSORS: &str = "GetLogicalProcessors";

#[derive(Debug, Default)]
pub struct HostProvider;

impl HostProvider {
    pub fn new() -> Self {
        Self
    }

    fn host_name() -> Option<String> {
        ["COMPUTERNAME", "HOSTNAME"]
            .iter()
            .find_map(|var| std::env::var(var).ok())
            .or_else(|| fs::read_to_string("/proc/sys/kernel/hostname").ok())
            .or_else(|| fs::read_to_string("/etc/hostname").ok())
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }
}

impl ProviderModule for HostProvider {
    fn entry_points(&self) -> Vec<String> {
        [
            GET_HOST_NAME,
            GET_OS_FAMILY,
            GET_ARCHITECTURE,
            GET_LOGICAL_PROCESSORS,
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }

    fn invoke(&self, symbol: &str) -> Result<PropertyValue, ModuleError> {
        match symbol {
            GET_HOST_NAME => Self::host_name().map(PropertyValue::String).ok_or_else(|| {
                ModuleError::invocation(HOST_MODULE, symbol, "host name not available")
            }),
            GET_OS_FAMILY => Ok(PropertyValue::from(std::env::consts::OS)),
            GET_ARCHITECTURE => Ok(PropertyValue::from(std::env::consts::ARCH)),
            GET_LOGICAL_PROCESSORS => std::thread::available_parallelism()
                .map(|n| PropertyValue::Unsigned(n.get() as u64))
                .map_err(|e| ModuleError::invocation(HOST_MODULE, symbol, e.to_string())),
            _ => Err(ModuleError::SymbolNotFound {
                module: HOST_MODULE.to_string(),
                symbol: symbol.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports_and_values() {
        let provider = HostProvider::new();
        assert_eq!(provider.entry_points().len(), 4);
        assert_eq!(
            provider.invoke(GET_OS_FAMILY).unwrap(),
            PropertyValue::from(std::env::consts::OS)
        );
        assert!(matches!(
            provider.invoke(GET_LOGICAL_PROCESSORS).unwrap(),
            PropertyValue::Unsigned(n) if n >= 1
        ));
        assert!(provider.invoke("Nope").is_err());
    }
}
