//! Error types for management backends
//!
//! These are the low-level failures a backend reports. The query session
//! translates them into `SessionError` with the stage they occurred in.

/// Failures reported by a management backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend's security or communication layer cannot be used
    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },

    /// The namespace connection was refused
    #[error("Namespace '{namespace}' refused: {reason}")]
    Refused { namespace: String, reason: String },

    /// The backend rejected the query (syntax, unknown class, provider failure)
    #[error("Query rejected: {reason}")]
    Rejected { reason: String },

    /// I/O error while talking to the backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend produced output that could not be decoded
    #[error("Malformed backend output: {reason}")]
    Parse { reason: String },
}

impl BackendError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn refused(namespace: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Refused {
            namespace: namespace.into(),
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(error: serde_json::Error) -> Self {
        Self::parse(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation_helpers() {
        assert!(matches!(
            BackendError::refused("root\\nope", "no such namespace"),
            BackendError::Refused { .. }
        ));
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(
            BackendError::from(json_error),
            BackendError::Parse { .. }
        ));
    }
}
