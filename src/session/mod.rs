//! Query session management
//!
//! A `QuerySession` owns one connection to a management backend for the
//! duration of an inventory pass.
//!
//! # Architecture
//!
//! - **QuerySession**: security context → namespace connection, torn down in
//!   reverse order by `close()` or on drop
//! - **EnumeratorCursor**: borrows the session; dropping it releases the
//!   backend enumerator
//! - **SessionError**: stage-specific failures
//!
//! # Usage
//!
//! ```no_run
//! # use hwinventory::backend::{DEFAULT_NAMESPACE, SysfsBackend};
//! # use hwinventory::query::QueryRequest;
//! # use hwinventory::session::QuerySession;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = QuerySession::open(Box::new(SysfsBackend::new()), DEFAULT_NAMESPACE)?;
//! let record = session
//!     .execute(&QueryRequest::select("Win32_BaseBoard", "SerialNumber"))?
//!     .first()?;
//! session.close();
//! # let _ = record;
//! # Ok(())
//! # }
//! ```

pub mod cursor;
pub mod error;

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::{ManagementBackend, SecurityContext};
use crate::query::QueryRequest;

pub use cursor::EnumeratorCursor;
pub use error::SessionError;

/// Connection state of a query session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    SecurityConfigured,
    Connected,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::SecurityConfigured => "security-configured",
            Self::Connected => "connected",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Scoped connection to a management backend namespace
pub struct QuerySession {
    backend: Box<dyn ManagementBackend>,
    namespace: String,
    state: SessionState,
    security: Option<SecurityContext>,
    opened_at: Instant,
}

impl QuerySession {
    /// Configure security and connect to `namespace`
    ///
    /// If this returns an error nothing stays acquired: the partially opened
    /// session is dropped, and dropping releases whatever stage was reached.
    pub fn open(
        backend: Box<dyn ManagementBackend>,
        namespace: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let namespace = namespace.into();
        let backend_name = backend.name();
        info!(
            "Opening {} query session on namespace {}",
            backend_name, namespace
        );

        let mut session = Self {
            backend,
            namespace,
            state: SessionState::Uninitialized,
            security: None,
            opened_at: Instant::now(),
        };

        debug!("Configuring backend security context");
        let security = session
            .backend
            .initialize_security()
            .map_err(|source| SessionError::BackendInit {
                backend: backend_name.to_string(),
                source,
            })?;
        debug!("Security context established: {:?}", security);
        session.security = Some(security);
        session.state = SessionState::SecurityConfigured;

        debug!("Connecting to namespace {}", session.namespace);
        if let Err(source) = session.backend.connect(&session.namespace) {
            return Err(SessionError::Connection {
                namespace: session.namespace.clone(),
                source,
            });
        }
        session.state = SessionState::Connected;
        session.opened_at = Instant::now();

        info!("Query session connected");
        Ok(session)
    }

    /// Issue a query and return a cursor over its results
    pub fn execute(
        &mut self,
        request: &QueryRequest,
    ) -> Result<EnumeratorCursor<'_>, SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::query(format!(
                "session is not connected (state: {})",
                self.state
            )));
        }
        if !request.is_wql() {
            return Err(SessionError::query(format!(
                "unsupported query language: {}",
                request.language
            )));
        }

        debug!("Executing query: {}", request.text);
        let stream = self
            .backend
            .exec_query(request)
            .map_err(|e| SessionError::query(e.to_string()))?;
        Ok(EnumeratorCursor::new(stream, request.text.clone()))
    }

    /// Release the connection and security context
    ///
    /// Idempotent: closing a closed (or never opened) session does nothing.
    pub fn close(&mut self) {
        match self.state {
            SessionState::Connected => {
                debug!("Disconnecting from namespace {}", self.namespace);
                self.backend.disconnect();
                self.backend.release_security();
            }
            SessionState::SecurityConfigured => {
                self.backend.release_security();
            }
            SessionState::Uninitialized | SessionState::Closed => return,
        }
        self.security = None;
        self.state = SessionState::Closed;
        info!(
            "Query session on {} closed after {:?}",
            self.namespace,
            self.uptime()
        );
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn security_context(&self) -> Option<&SecurityContext> {
        self.security.as_ref()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn uptime(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

/// Drop releases anything `close()` has not
impl Drop for QuerySession {
    fn drop(&mut self) {
        if matches!(
            self.state,
            SessionState::Connected | SessionState::SecurityConfigured
        ) {
            if self.state == SessionState::Connected {
                warn!("QuerySession dropped without calling close() - releasing");
            }
            self.close();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        DEFAULT_NAMESPACE, FixtureBackend, FixtureSnapshot, ResourceLedger,
    };
    use crate::query::PropertyRecord;

    #[cfg(feature = "test-logging")]
    #[ctor::ctor]
    fn init_test_logging() {
        crate::test_utils::logging::init();
    }

    fn board_snapshot() -> FixtureSnapshot {
        FixtureSnapshot::new().with_instance(
            "Win32_BaseBoard",
            PropertyRecord::new().with("SerialNumber", "ABC123"),
        )
    }

    #[test]
    fn test_open_execute_close() {
        let backend = FixtureBackend::new(board_snapshot());
        let ledger = backend.ledger();

        let mut session = QuerySession::open(Box::new(backend), DEFAULT_NAMESPACE).unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.security_context().unwrap().mechanism, "fixture");

        let record = session
            .execute(&QueryRequest::select("Win32_BaseBoard", "SerialNumber"))
            .unwrap()
            .first()
            .unwrap()
            .unwrap();
        assert_eq!(record.get("SerialNumber").unwrap().to_string(), "ABC123");

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_close_twice_is_idempotent() {
        let backend = FixtureBackend::new(board_snapshot());
        let ledger = backend.ledger();

        let mut session = QuerySession::open(Box::new(backend), DEFAULT_NAMESPACE).unwrap();
        session.close();
        session.close();
        drop(session);

        assert_eq!(ResourceLedger::count(&ledger.security_released), 1);
        assert_eq!(ResourceLedger::count(&ledger.connections_closed), 1);
    }

    #[test]
    fn test_security_failure_is_backend_init_error() {
        let backend = FixtureBackend::new(board_snapshot()).fail_security("COM not initialized");
        let ledger = backend.ledger();

        let result = QuerySession::open(Box::new(backend), DEFAULT_NAMESPACE);
        assert!(matches!(result, Err(SessionError::BackendInit { .. })));
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_connection_failure_releases_security() {
        let backend = FixtureBackend::new(board_snapshot()).fail_connect("access denied");
        let ledger = backend.ledger();

        let result = QuerySession::open(Box::new(backend), DEFAULT_NAMESPACE);
        assert!(matches!(result, Err(SessionError::Connection { .. })));
        assert_eq!(ResourceLedger::count(&ledger.security_initialized), 1);
        assert_eq!(ResourceLedger::count(&ledger.security_released), 1);
    }

    #[test]
    fn test_unknown_namespace_is_connection_error() {
        let backend = FixtureBackend::new(board_snapshot());
        let result = QuerySession::open(Box::new(backend), "root\\securitycenter2");
        assert!(matches!(result, Err(SessionError::Connection { .. })));
    }

    #[test]
    fn test_execute_after_close_fails() {
        let backend = FixtureBackend::new(board_snapshot());
        let mut session = QuerySession::open(Box::new(backend), DEFAULT_NAMESPACE).unwrap();
        session.close();
        let result = session.execute(&QueryRequest::select("Win32_BaseBoard", "SerialNumber"));
        assert!(matches!(result, Err(SessionError::Query { .. })));
    }

    #[test]
    fn test_rejected_query_and_language() {
        let backend = FixtureBackend::new(board_snapshot());
        let mut session = QuerySession::open(Box::new(backend), DEFAULT_NAMESPACE).unwrap();

        let bad_syntax = QueryRequest::wql("SELEKT * FROM Win32_BaseBoard", "SerialNumber");
        assert!(matches!(
            session.execute(&bad_syntax),
            Err(SessionError::Query { .. })
        ));

        let mut other_language = QueryRequest::select("Win32_BaseBoard", "SerialNumber");
        other_language.language = "CQL".to_string();
        assert!(matches!(
            session.execute(&other_language),
            Err(SessionError::Query { .. })
        ));
    }

    #[test]
    fn test_drop_without_close_releases_everything() {
        let backend = FixtureBackend::new(board_snapshot());
        let ledger = backend.ledger();
        {
            let mut session = QuerySession::open(Box::new(backend), DEFAULT_NAMESPACE).unwrap();
            let _cursor = session
                .execute(&QueryRequest::select("Win32_BaseBoard", "SerialNumber"))
                .unwrap();
        }
        assert!(ledger.is_balanced());
    }
}
