//! Snapshot-backed backend
//!
//! Serves records from a `FixtureSnapshot` (in memory or loaded from a JSON
//! file captured on another machine). Each lifecycle stage can be made to
//! fail, and every acquire/release is counted in a shared `ResourceLedger`
//! so callers can verify that nothing leaks or is released twice.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{
    BackendError, DEFAULT_NAMESPACE, ManagementBackend, RecordStream, SecurityContext,
    same_namespace,
};
use crate::query::{ParsedQuery, PropertyRecord, QueryRequest};

/// Class instances served by the fixture backend
///
/// JSON form:
/// ```json
/// { "namespace": "root\\cimv2",
///   "classes": { "Win32_BaseBoard": [ { "SerialNumber": "ABC123" } ] } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureSnapshot {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub classes: BTreeMap<String, Vec<PropertyRecord>>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl FixtureSnapshot {
    pub fn new() -> Self {
        Self {
            namespace: default_namespace(),
            classes: BTreeMap::new(),
        }
    }

    /// Add one instance of a class (creates the class if needed)
    pub fn with_instance(mut self, class: &str, record: PropertyRecord) -> Self {
        self.classes.entry(class.to_string()).or_default().push(record);
        self
    }

    /// Declare a class with no instances
    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.entry(class.to_string()).or_default();
        self
    }

    /// Load a snapshot from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, BackendError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn instances(&self, class: &str) -> Option<&Vec<PropertyRecord>> {
        self.classes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(class))
            .map(|(_, records)| records)
    }
}

// ============================================================================
// Resource Ledger
// ============================================================================

/// Counts of backend resources acquired and released
#[derive(Debug, Default)]
pub struct ResourceLedger {
    pub security_initialized: AtomicUsize,
    pub security_released: AtomicUsize,
    pub connections_opened: AtomicUsize,
    pub connections_closed: AtomicUsize,
    pub streams_opened: AtomicUsize,
    pub streams_released: AtomicUsize,
    pub queries_executed: AtomicUsize,
}

impl ResourceLedger {
    /// Whether every acquired resource has been released
    pub fn is_balanced(&self) -> bool {
        let load = |counter: &AtomicUsize| counter.load(Ordering::SeqCst);
        load(&self.security_initialized) == load(&self.security_released)
            && load(&self.connections_opened) == load(&self.connections_closed)
            && load(&self.streams_opened) == load(&self.streams_released)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Failure Injection
// ============================================================================

/// Stages at which the fixture backend can be told to fail
#[derive(Debug, Clone, Default)]
pub struct FixtureFailures {
    pub security: Option<String>,
    pub connect: Option<String>,
    pub query: Option<String>,
    /// Fail enumeration after this many records have been yielded
    pub enumeration_after: Option<usize>,
}

// ============================================================================
// Fixture Backend
// ============================================================================

/// Backend serving records from a `FixtureSnapshot`
pub struct FixtureBackend {
    snapshot: FixtureSnapshot,
    failures: FixtureFailures,
    ledger: Arc<ResourceLedger>,
    connected: bool,
}

impl FixtureBackend {
    pub fn new(snapshot: FixtureSnapshot) -> Self {
        Self {
            snapshot,
            failures: FixtureFailures::default(),
            ledger: Arc::new(ResourceLedger::default()),
            connected: false,
        }
    }

    /// Make security initialization fail
    pub fn fail_security(mut self, reason: impl Into<String>) -> Self {
        self.failures.security = Some(reason.into());
        self
    }

    /// Make the namespace connection fail
    pub fn fail_connect(mut self, reason: impl Into<String>) -> Self {
        self.failures.connect = Some(reason.into());
        self
    }

    /// Make every query be rejected
    pub fn fail_query(mut self, reason: impl Into<String>) -> Self {
        self.failures.query = Some(reason.into());
        self
    }

    /// Make enumeration fail after `count` records
    pub fn fail_enumeration_after(mut self, count: usize) -> Self {
        self.failures.enumeration_after = Some(count);
        self
    }

    /// Shared ledger of acquired/released resources
    pub fn ledger(&self) -> Arc<ResourceLedger> {
        Arc::clone(&self.ledger)
    }
}

impl ManagementBackend for FixtureBackend {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn initialize_security(&mut self) -> Result<SecurityContext, BackendError> {
        if let Some(reason) = &self.failures.security {
            return Err(BackendError::unavailable(reason.clone()));
        }
        self.ledger
            .security_initialized
            .fetch_add(1, Ordering::SeqCst);
        Ok(SecurityContext::new("fixture"))
    }

    fn connect(&mut self, namespace: &str) -> Result<(), BackendError> {
        if let Some(reason) = &self.failures.connect {
            return Err(BackendError::refused(namespace, reason.clone()));
        }
        if !same_namespace(namespace, &self.snapshot.namespace) {
            return Err(BackendError::refused(namespace, "namespace not in snapshot"));
        }
        self.ledger.connections_opened.fetch_add(1, Ordering::SeqCst);
        self.connected = true;
        Ok(())
    }

    fn exec_query<'a>(
        &'a mut self,
        request: &QueryRequest,
    ) -> Result<Box<dyn RecordStream + 'a>, BackendError> {
        self.ledger.queries_executed.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.failures.query {
            return Err(BackendError::rejected(reason.clone()));
        }

        let parsed = ParsedQuery::parse(&request.text).map_err(BackendError::rejected)?;
        let instances = self
            .snapshot
            .instances(&parsed.class)
            .ok_or_else(|| BackendError::rejected(format!("invalid class: {}", parsed.class)))?;

        let records: Vec<PropertyRecord> = instances
            .iter()
            .filter(|record| parsed.matches(record))
            .cloned()
            .map(|record| parsed.project(record))
            .collect();

        debug!(
            "Fixture query on {} matched {} record(s)",
            parsed.class,
            records.len()
        );

        self.ledger.streams_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FixtureStream {
            records: records.into_iter(),
            yielded: 0,
            fail_after: self.failures.enumeration_after,
            ledger: Arc::clone(&self.ledger),
        }))
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.ledger.connections_closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn release_security(&mut self) {
        self.ledger.security_released.fetch_add(1, Ordering::SeqCst);
    }
}

struct FixtureStream {
    records: std::vec::IntoIter<PropertyRecord>,
    yielded: usize,
    fail_after: Option<usize>,
    ledger: Arc<ResourceLedger>,
}

impl RecordStream for FixtureStream {
    fn next_record(&mut self) -> Result<Option<PropertyRecord>, BackendError> {
        if self.fail_after.is_some_and(|limit| self.yielded >= limit) {
            return Err(BackendError::unavailable("connection to backend lost"));
        }
        let next = self.records.next();
        if next.is_some() {
            self.yielded += 1;
        }
        Ok(next)
    }
}

impl Drop for FixtureStream {
    fn drop(&mut self) {
        self.ledger.streams_released.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Tests
// ============================================================================
