//! keylock Core Library
//!
//! This crate provides keyed mutual exclusion for asynchronous tasks within
//! a single process, including:
//! - Single-key acquisition with FIFO queueing
//! - Per-key admission limits and per-request queue timeouts
//! - Ordered multi-key (batch) acquisition
//! - Lock lifecycle events
//! - File-backed configuration

pub mod config;
pub mod error;
pub mod locking;

pub use error::{LockError, LockResult};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{LockError, LockResult};
    pub use crate::locking::{AcquireOptions, Completion, KeyedLockManager, LockConfig, Task};
}
