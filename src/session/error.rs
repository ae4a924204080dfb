//! Error types for query sessions

use crate::backend::BackendError;

/// Failures surfaced by `QuerySession` and `EnumeratorCursor`
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Security or communication layer could not be configured
    #[error("Backend initialization failed ({backend}): {source}")]
    BackendInit {
        backend: String,
        #[source]
        source: BackendError,
    },

    /// The namespace connection was refused
    #[error("Connection to namespace '{namespace}' failed: {source}")]
    Connection {
        namespace: String,
        #[source]
        source: BackendError,
    },

    /// Query rejected, issued on a session that is not connected, or
    /// enumeration failed
    #[error("Query failed: {reason}")]
    Query { reason: String },
}

impl SessionError {
    pub fn query(reason: impl Into<String>) -> Self {
        Self::Query {
            reason: reason.into(),
        }
    }

    /// Whether the error happened while acquiring the session
    pub fn is_acquisition_failure(&self) -> bool {
        matches!(self, Self::BackendInit { .. } | Self::Connection { .. })
    }
}
