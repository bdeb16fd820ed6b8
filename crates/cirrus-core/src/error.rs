//! Error types and result aliases for Cirrus.
//!
//! Absence is never an error in Cirrus: reads of missing paths return `None`
//! and lost compare-and-swap races return `false`. The variants here cover
//! invalid input and genuine backend failures.

/// The result type used throughout Cirrus.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Cirrus operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier could not be used as a path segment.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A precondition for the operation was not met after all retries.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Description of the failed precondition.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a serialization error from a `serde_json` failure.
    #[must_use]
    pub fn serialization(context: &str, err: &serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("{context}: {err}"),
        }
    }
}
