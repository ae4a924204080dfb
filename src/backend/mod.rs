//! Management backends
//!
//! A backend is the external information service a `QuerySession` talks to.
//! Every backend goes through the same staged lifecycle: configure security,
//! connect to a namespace, execute queries that stream records, disconnect,
//! release security. The session owns the ordering; backends only perform
//! each stage.
//!
//! # Implementations
//!
//! - **CimBackend**: CIM/WMI through PowerShell `Get-CimInstance`
//! - **SysfsBackend**: Linux `/proc` and `/sys/class/dmi/id`
//! - **FixtureBackend**: snapshot records with failure injection

pub mod cim;
pub mod error;
pub mod fixture;
pub mod sysfs;

use serde::{Deserialize, Serialize};

use crate::query::{PropertyRecord, QueryRequest};

pub use cim::CimBackend;
pub use error::BackendError;
pub use fixture::{FixtureBackend, FixtureSnapshot, ResourceLedger};
pub use sysfs::SysfsBackend;

/// Namespace holding the standard hardware classes
pub const DEFAULT_NAMESPACE: &str = r"root\cimv2";

// ============================================================================
// Security Context
// ============================================================================

/// Authentication level requested from the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthenticationLevel {
    #[default]
    Default,
    Connect,
    PacketPrivacy,
}

/// Impersonation level granted to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImpersonationLevel {
    Identify,
    #[default]
    Impersonate,
}

/// Descriptor of the security context a backend established
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    /// Mechanism that carries the session (e.g. "powershell-cim", "procfs")
    pub mechanism: String,
    pub authentication: AuthenticationLevel,
    pub impersonation: ImpersonationLevel,
}

impl SecurityContext {
    pub fn new(mechanism: impl Into<String>) -> Self {
        Self {
            mechanism: mechanism.into(),
            authentication: AuthenticationLevel::default(),
            impersonation: ImpersonationLevel::default(),
        }
    }
}

// ============================================================================
// Backend Traits
// ============================================================================

/// Forward-only source of records produced by one query
///
/// `next_record` may block for a backend round-trip. Dropping the stream
/// releases whatever the backend holds for the enumeration.
pub trait RecordStream {
    /// Next record, `Ok(None)` at end of results
    fn next_record(&mut self) -> Result<Option<PropertyRecord>, BackendError>;
}

/// A management-instrumentation backend
///
/// Stages are driven by `QuerySession`; implementations may assume they are
/// called in order and that `disconnect`/`release_security` are called at most
/// once per successful `connect`/`initialize_security`.
pub trait ManagementBackend: Send {
    /// Short backend name for logging
    fn name(&self) -> &'static str;

    /// Configure the security/communication layer
    fn initialize_security(&mut self) -> Result<SecurityContext, BackendError>;

    /// Connect to an object namespace
    fn connect(&mut self, namespace: &str) -> Result<(), BackendError>;

    /// Issue a query and return a stream over its results
    fn exec_query<'a>(
        &'a mut self,
        request: &QueryRequest,
    ) -> Result<Box<dyn RecordStream + 'a>, BackendError>;

    /// Release the namespace connection
    fn disconnect(&mut self);

    /// Tear down the security context
    fn release_security(&mut self);
}

/// Stream over records that are already materialised
pub struct VecRecordStream {
    records: std::vec::IntoIter<PropertyRecord>,
}

impl VecRecordStream {
    pub fn new(records: Vec<PropertyRecord>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

impl RecordStream for VecRecordStream {
    fn next_record(&mut self) -> Result<Option<PropertyRecord>, BackendError> {
        Ok(self.records.next())
    }
}

/// Namespace comparison tolerant of slash direction and case
pub fn same_namespace(a: &str, b: &str) -> bool {
    let normalize = |s: &str| s.trim().replace('/', "\\").to_ascii_lowercase();
    normalize(a) == normalize(b)
}
