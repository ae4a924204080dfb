use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::query::PropertyValue;

/// Outcome of collecting one fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactOutcome {
    Available(PropertyValue),
    Unavailable(String),
}

impl FactOutcome {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn value(&self) -> Option<&PropertyValue> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unavailable(_) => None,
        }
    }
}

impl fmt::Display for FactOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available(value) => write!(f, "{value}"),
            Self::Unavailable(reason) => write!(f, "unavailable: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactEntry {
    pub name: String,
    pub outcome: FactOutcome,
}

/// Facts gathered by one inventory pass, in plan order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryResult {
    pub pass_id: Uuid,
    pub collected_at: DateTime<Utc>,
    pub namespace: String,
    pub facts: Vec<FactEntry>,
}

impl InventoryResult {
    pub(crate) fn new(pass_id: Uuid, namespace: impl Into<String>, facts: Vec<FactEntry>) -> Self {
        Self {
            pass_id,
            collected_at: Utc::now(),
            namespace: namespace.into(),
            facts,
        }
    }

    /// Outcome for a fact by name
    pub fn fact(&self, name: &str) -> Option<&FactOutcome> {
        self.facts
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.outcome)
    }

    pub fn available_count(&self) -> usize {
        self.facts
            .iter()
            .filter(|entry| entry.outcome.is_available())
            .count()
    }

    pub fn unavailable_count(&self) -> usize {
        self.facts.len() - self.available_count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FactEntry> {
        self.facts.iter()
    }
}

/// One `name: value` line per fact
impl fmt::Display for InventoryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.facts {
            writeln!(f, "{}: {}", entry.name, entry.outcome)?;
        }
        Ok(())
    }
}
