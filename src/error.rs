use thiserror::Error;

/// Enum with all errors in this crate.
#[derive(Error, Debug)]
pub enum KdError {
    /// Bad key pattern, unknown field type, or an invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while reading or writing index artifacts.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An index artifact is corrupt or does not match the expected layout.
    #[error("Index format error: {0}")]
    Format(String),

    /// The predicate document cannot be translated into a query.
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    /// The operation is not implemented for this build-once index.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A device received a request it cannot execute.
    #[error("Unsupported request: {0}")]
    UnsupportedRequest(String),

    /// The device arena cannot hold the working set of a single batch.
    #[error("Resource exhausted: {required} bytes required, {available} bytes available")]
    ResourceExhausted { required: usize, available: usize },

    /// The worker that owned a request went away before completing it.
    #[error("Request was not completed: {0}")]
    Disconnected(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, KdError>;
