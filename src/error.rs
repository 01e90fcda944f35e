//! Error types for the event processor.

use thiserror::Error;

/// Boxed error from an external collaborator (store, transport, user handler).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for processor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the event processor.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration or invalid use of the processor lifecycle.
    #[error("config error: {0}")]
    Config(String),

    /// Another instance holds (or has taken) the ownership record for a
    /// partition. Local to that partition; never fatal to the processor.
    #[error("ownership lost for partition {partition_id}")]
    OwnershipLost { partition_id: String },

    /// A checkpoint store call failed. Transient store failures during a
    /// balancing round are reported through the error handler and the next
    /// round proceeds normally.
    #[error("store error: {0}")]
    Store(#[source] BoxError),

    /// A transport-level failure on a partition consumer.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// A user-supplied handler returned an error.
    #[error("handler error: {0}")]
    Handler(#[source] BoxError),
}

impl Error {
    /// Wrap an external store failure.
    pub fn store(err: impl Into<BoxError>) -> Self {
        Self::Store(err.into())
    }

    /// Wrap an external transport failure.
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }

    /// Wrap a user handler failure, unwrapping a crate error if the handler
    /// simply propagated one (a checkpoint-write race surfaces this way).
    pub fn handler(err: BoxError) -> Self {
        match err.downcast::<Error>() {
            Ok(inner) => *inner,
            Err(err) => Self::Handler(err),
        }
    }

    /// Whether this error is an ownership-lost signal.
    pub fn is_ownership_lost(&self) -> bool {
        matches!(self, Self::OwnershipLost { .. })
    }
}
