//! What an inventory pass collects
//!
//! A plan names each fact and where it comes from: a query against the
//! management namespace, or an entry point of a provider module. Plans are
//! plain JSON:
//!
//! ```json
//! {
//!   "namespace": "root\\cimv2",
//!   "facts": [
//!     { "name": "serial_number",
//!       "source": { "kind": "query", "text": "SELECT SerialNumber FROM Win32_BaseBoard", "field": "SerialNumber" } },
//!     { "name": "host_name",
//!       "source": { "kind": "provider", "module": "host", "entry_point": "GetHostName" } }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::DEFAULT_NAMESPACE;
use crate::config::ConfigError;
use crate::query::QueryRequest;

/// Where a fact's value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactSource {
    Query(QueryRequest),
    Provider { module: String, entry_point: String },
}

/// One named fact in a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSpec {
    pub name: String,
    pub source: FactSource,
}

impl FactSpec {
    pub fn query(name: impl Into<String>, request: QueryRequest) -> Self {
        Self {
            name: name.into(),
            source: FactSource::Query(request),
        }
    }

    pub fn provider(
        name: impl Into<String>,
        module: impl Into<String>,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: FactSource::Provider {
                module: module.into(),
                entry_point: entry_point.into(),
            },
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self.source, FactSource::Query(_))
    }
}

/// Ordered list of facts to collect from one namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryPlan {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub facts: Vec<FactSpec>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for InventoryPlan {
    /// Board serial, processor and memory facts
    fn default() -> Self {
        Self::empty()
            .with_fact(FactSpec::query(
                "serial_number",
                QueryRequest::select("Win32_BaseBoard", "SerialNumber"),
            ))
            .with_fact(FactSpec::query(
                "processor_architecture",
                QueryRequest::select("Win32_Processor", "Architecture"),
            ))
            .with_fact(FactSpec::query(
                "processor_cores",
                QueryRequest::select("Win32_Processor", "NumberOfCores"),
            ))
            .with_fact(FactSpec::query(
                "logical_processors",
                QueryRequest::select("Win32_Processor", "NumberOfLogicalProcessors"),
            ))
            .with_fact(FactSpec::query(
                "total_physical_memory",
                QueryRequest::select("Win32_ComputerSystem", "TotalPhysicalMemory"),
            ))
            .with_fact(FactSpec::query(
                "free_physical_memory",
                QueryRequest::select("Win32_OperatingSystem", "FreePhysicalMemory"),
            ))
    }
}

impl InventoryPlan {
    /// Plan with no facts on the default namespace
    pub fn empty() -> Self {
        Self {
            namespace: default_namespace(),
            facts: Vec::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_fact(mut self, fact: FactSpec) -> Self {
        self.facts.push(fact);
        self
    }

    pub fn has_query_facts(&self) -> bool {
        self.facts.iter().any(FactSpec::is_query)
    }

    /// Parse a JSON plan without validating it
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Load and validate a plan file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let plan = Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        plan.validate()?;
        Ok(plan)
    }

    /// Fact names must be non-empty and unique
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for fact in &self.facts {
            if fact.name.trim().is_empty() {
                return Err(ConfigError::invalid_plan("fact name cannot be empty"));
            }
            if !seen.insert(fact.name.as_str()) {
                return Err(ConfigError::invalid_plan(format!(
                    "duplicate fact name: {}",
                    fact.name
                )));
            }
            match &fact.source {
                FactSource::Query(request) if request.field.trim().is_empty() => {
                    return Err(ConfigError::invalid_plan(format!(
                        "fact {} has no result field",
                        fact.name
                    )));
                }
                FactSource::Provider {
                    module,
                    entry_point,
                } if module.trim().is_empty() || entry_point.trim().is_empty() => {
                    return Err(ConfigError::invalid_plan(format!(
                        "fact {} needs both a module and an entry point",
                        fact.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
