//! Store-side errors.

use thiserror::Error;

/// Failures reported by the store or its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The driver gave up waiting for a response
    #[error("timed out: {0}")]
    Timeout(String),

    /// Not enough replicas were reachable
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The store refused the statement (bad query, oversized key, ...)
    #[error("rejected: {0}")]
    Rejected(String),

    /// A bound value could not be encoded
    #[error("invalid value for column {column}: {reason}")]
    InvalidValue {
        /// Column being bound
        column: String,
        /// What was wrong with it
        reason: String,
    },

    /// Table or keyspace metadata missing or malformed
    #[error("metadata: {0}")]
    Metadata(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Whether the same statement may succeed if sent again.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Unavailable(_))
    }
}

impl From<StoreError> for spanstore_core::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Metadata(msg) => spanstore_core::Error::Metadata(msg),
            StoreError::InvalidValue { column, reason } => {
                spanstore_core::Error::Validation(format!("{}: {}", column, reason))
            }
            other => spanstore_core::Error::Dispatch {
                statement: String::from("<unbound>"),
                transient: other.is_transient(),
                source: Box::new(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Timeout("read".into()).is_transient());
        assert!(StoreError::Unavailable("1 of 3".into()).is_transient());
        assert!(!StoreError::Rejected("syntax".into()).is_transient());
        assert!(!StoreError::Metadata("no table".into()).is_transient());
    }

    #[test]
    fn test_metadata_maps_to_core_metadata() {
        let e: spanstore_core::Error = StoreError::Metadata("traces missing".into()).into();
        assert!(matches!(e, spanstore_core::Error::Metadata(_)));
    }

    #[test]
    fn test_store_failure_kept_as_source() {
        let e: spanstore_core::Error = StoreError::Unavailable("1 of 3".into()).into();
        assert!(e.is_retryable());
        let source = std::error::Error::source(&e).unwrap();
        assert_eq!(
            source.downcast_ref::<StoreError>(),
            Some(&StoreError::Unavailable("1 of 3".into()))
        );
    }
}
