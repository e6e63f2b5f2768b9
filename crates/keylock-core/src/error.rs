//! Error types for keyed lock acquisition

use std::time::Duration;
use thiserror::Error;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Errors delivered to callers of the lock manager
///
/// Every acquisition receives exactly one of these (or a value) through its
/// completion channel, except [`LockError::EmptyKeySet`], which is returned
/// synchronously before anything is queued.
#[derive(Error, Debug)]
pub enum LockError {
    /// The key's wait queue is at capacity; the request was never queued
    #[error("too many pending tasks: key '{key}' already has {limit} waiters")]
    TooManyPending { key: String, limit: usize },

    /// A queued waiter was not started before its timeout elapsed
    #[error("timed out: key '{key}' was not acquired within {}ms", .timeout.as_millis())]
    TimedOut { key: String, timeout: Duration },

    /// The task body reported an error
    #[error("task failed: {0}")]
    Task(#[source] anyhow::Error),

    /// The task body panicked while being started or polled
    #[error("task panicked: {0}")]
    Panicked(String),

    /// A callback task dropped its completion handle without reporting
    #[error("task for key '{0}' finished without reporting completion")]
    Abandoned(String),

    /// A batch acquisition was requested with no keys
    #[error("invalid input: at least one key is required")]
    EmptyKeySet,

    /// The manager was used outside a Tokio runtime
    #[error("no Tokio runtime is available to run lock timers and tasks")]
    RuntimeUnavailable,
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::TooManyPending { .. } => "E300",
            Self::TimedOut { .. } => "E301",
            Self::Task(_) => "E302",
            Self::Panicked(_) => "E303",
            Self::Abandoned(_) => "E304",
            Self::EmptyKeySet => "E305",
            Self::RuntimeUnavailable => "E306",
        }
    }

    /// Whether the error came from admission control or queueing rather than
    /// from the task body itself
    pub fn is_acquisition_error(&self) -> bool {
        matches!(self, Self::TooManyPending { .. } | Self::TimedOut { .. })
    }

    /// Build a [`LockError::Panicked`] from a caught panic payload
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }
}
