//! Error types for span ingestion.
//!
//! Every failure the write path can produce is a variant of [`Error`]. The
//! variants split into three groups:
//!
//! | Group | Variants | Meaning |
//! |-------|----------|---------|
//! | Input | `Validation`, `ValueTooLarge`, `Codec` | The caller supplied something unwritable |
//! | Store | `Dispatch`, `Batch` | The store rejected or failed a write |
//! | Setup | `Metadata`, `Config`, `Io` | Construction could not complete |
//!
//! Input errors are never sent to the store. Store errors are reported per
//! statement and folded into one batch outcome; they are not retried here.

use thiserror::Error;

/// A failure reported by a store implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while encoding, deriving or writing spans.
#[derive(Debug, Error)]
pub enum Error {
    /// A required name was empty
    #[error("validation failed: {0}")]
    Validation(String),

    /// An annotation key is larger than the store can index
    #[error("annotation key of {size} bytes exceeds indexable limit of {limit} bytes")]
    ValueTooLarge {
        /// Size of the rejected key in bytes
        size: usize,
        /// Configured limit in bytes
        limit: usize,
    },

    /// The store failed to execute a bound statement
    #[error("failed {statement}: {source}")]
    Dispatch {
        /// Statement with all parameters substituted
        statement: String,
        /// Store-reported failure
        #[source]
        source: BoxError,
        /// Whether the store flagged the failure as transient
        transient: bool,
    },

    /// At least one write of an accepted batch failed
    #[error("{dispatched} writes dispatched, at least one failed: {first}")]
    Batch {
        /// Number of writes dispatched for the batch
        dispatched: usize,
        /// The first failure observed
        first: Box<Error>,
    },

    /// Schema metadata was missing or malformed
    #[error("schema metadata error: {0}")]
    Metadata(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Span payload could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for spanstore operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether reissuing the same `accept` call may succeed.
    ///
    /// Input and setup errors fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Dispatch { .. } => true,
            Error::Batch { first, .. } => first.is_retryable(),
            _ => false,
        }
    }

    /// Whether the error was caused by the caller's input rather than the store.
    pub fn is_input_error(&self) -> bool {
        match self {
            Error::Validation(_) | Error::ValueTooLarge { .. } | Error::Codec(_) => true,
            Error::Batch { first, .. } => first.is_input_error(),
            _ => false,
        }
    }

    /// The first per-statement failure behind a batch error, or `self`.
    pub fn root(&self) -> &Error {
        match self {
            Error::Batch { first, .. } => first.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}
