//! Lock configuration and snapshot types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cap on the number of waiters queued behind a single key
pub const DEFAULT_MAX_PENDING: usize = 1000;

/// Configuration for the lock manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Default time a waiter may spend queued before failing.
    /// `Duration::ZERO` disables the timeout.
    pub timeout: Duration,

    /// Maximum wait queue length per key before new requests are rejected
    pub max_pending: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

impl LockConfig {
    /// Set the default timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the default timeout in milliseconds (0 disables it)
    pub fn with_timeout_ms(self, timeout_ms: u64) -> Self {
        self.with_timeout(Duration::from_millis(timeout_ms))
    }

    /// Set the pending-waiter limit
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }
}

/// Per-call acquisition options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Overrides [`LockConfig::timeout`] for this call only
    pub timeout: Option<Duration>,
}

impl AcquireOptions {
    /// Options overriding the manager's default timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// The timeout that applies to this call, `None` when disabled
    pub(crate) fn effective_timeout(&self, config: &LockConfig) -> Option<Duration> {
        let timeout = self.timeout.unwrap_or(config.timeout);
        (!timeout.is_zero()).then_some(timeout)
    }
}

/// Point-in-time view of the lock table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStats {
    /// Keys with a table entry (held, possibly with waiters)
    pub held_keys: usize,
    /// Waiters across all keys, including timed-out entries not yet skipped
    pub queued_waiters: usize,
}
