//! Unified error types for the instrumentation engine.
//!
//! Every public operation returns [`Result`], whose error type [`HlError`]
//! carries the small outcome taxonomy callers branch on. Failures reported by
//! a [`CounterBackend`](crate::backend::CounterBackend) are described by
//! [`BackendError`] and wrapped in [`HlError::SubsystemFailure`] when they
//! cross the engine boundary.
//!
//! # Example
//!
//! ```rust
//! use regioni::{HlError, Result};
//!
//! fn instrumented() -> Result<()> {
//!     match regioni::region_end("never_started") {
//!         Err(HlError::InvalidArgument(_)) => Ok(()),
//!         other => other,
//!     }
//! }
//! ```

use thiserror::Error;

/// Error type for all engine operations.
#[derive(Debug, Error)]
pub enum HlError {
    /// The engine has not been initialized yet.
    #[error("instrumentation is not initialized")]
    NotInitialized,

    /// `init` was called on an engine that is already initialized.
    #[error("instrumentation is already initialized")]
    AlreadyInitialized,

    /// An argument could not be used, e.g. a region end without a matching begin.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An allocation failed while mutating shared state. Deactivates the engine.
    #[error("out of memory")]
    OutOfMemory,

    /// The counter subsystem rejected an operation.
    #[error("counter subsystem failure: {0}")]
    SubsystemFailure(#[from] BackendError),

    /// The engine is deactivated, finalized, or the calling thread has no session.
    #[error("instrumentation is not running")]
    NotRunning,

    /// Re-initialization of a finalized engine was attempted.
    #[error("instrumentation was already running and cannot be restarted")]
    AlreadyRunning,

    /// Writing the report failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing the report failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HlError {
    /// Returns `true` for errors that leave shared state possibly inconsistent
    /// and therefore deactivate the whole engine.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HlError::OutOfMemory | HlError::SubsystemFailure(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, HlError>;

/// Error type reported by counter subsystem adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The counter name or code is unknown on this machine.
    #[error("counter not found: {0}")]
    NotFound(String),

    /// The counter cannot be combined with the counters already in the event set.
    #[error("incompatible counter combination: {0}")]
    Incompatible(String),

    /// The event set is not counting.
    #[error("event set is not running")]
    NotRunning,

    /// Any other failure (resource exhaustion, invalid handle, ...).
    #[error("{0}")]
    Failure(String),
}
