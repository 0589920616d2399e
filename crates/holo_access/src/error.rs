//! Error types shared by the batching reactor, observations and read pipeline.
//!
//! Backend collaborators report failures as `anyhow::Error`. Those are wrapped
//! once in an `Arc` so the very same error value can be handed to every waiter
//! of a batch or page.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// All errors surfaced by `holo_access`.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// `perform` was called before the reactor was started.
    #[error("batch reactor is not started")]
    NotStarted,

    /// `start` was called on a reactor that is already running.
    #[error("batch reactor is already started")]
    AlreadyStarted,

    /// The reactor (or owning client) has been stopped.
    #[error("batch reactor is stopped")]
    Stopped,

    /// The backend reported no destinations, so nothing can be routed.
    #[error("cluster topology has no destinations")]
    EmptyTopology,

    /// Backend execution failed. Shared verbatim by every waiter.
    #[error("execution failed: {0}")]
    Execution(Arc<anyhow::Error>),

    /// Backend execution did not finish within the configured deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A save was attempted without every primary-key column.
    #[error("table '{table}' is missing key parts: {}", .columns.join(", "))]
    MissingKeyParts { table: String, columns: Vec<String> },

    /// A composite routing key component does not fit its `u16` length prefix.
    #[error("table '{table}' key part '{column}' is {len} bytes, above the routing key limit")]
    KeyPartTooLong {
        table: String,
        column: String,
        len: usize,
    },

    /// The producing side of an observation went away without resolving it.
    #[error("observation abandoned before resolution")]
    Abandoned,

    /// An observation was resolved twice.
    #[error("observation already resolved")]
    AlreadyResolved,

    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Wraps a backend failure so it can be shared across waiters.
    pub fn execution(err: anyhow::Error) -> Self {
        Self::Execution(Arc::new(err))
    }

    /// Returns `true` for errors produced by misuse of the reactor lifecycle.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::NotStarted | Self::AlreadyStarted | Self::Stopped)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::execution(err)
    }
}

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_parts_lists_columns() {
        let err = Error::MissingKeyParts {
            table: "events".to_string(),
            columns: vec!["tenant".to_string(), "bucket".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "table 'events' is missing key parts: tenant, bucket"
        );
    }

    #[test]
    fn cloned_execution_errors_share_source() {
        let err = Error::execution(anyhow::anyhow!("coordinator unavailable"));
        let copy = err.clone();
        match (&err, &copy) {
            (Error::Execution(a), Error::Execution(b)) => assert!(Arc::ptr_eq(a, b)),
            other => panic!("unexpected variants: {other:?}"),
        }
        assert_eq!(copy.to_string(), "execution failed: coordinator unavailable");
    }

    #[test]
    fn lifecycle_classification() {
        assert!(Error::NotStarted.is_lifecycle());
        assert!(Error::Stopped.is_lifecycle());
        assert!(!Error::EmptyTopology.is_lifecycle());
    }
}
