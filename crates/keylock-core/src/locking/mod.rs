//! Keyed locking for concurrent tasks
//!
//! This module serialises asynchronous tasks per key: callers name the
//! resource they need, and the manager makes sure only one task per key runs
//! at a time while later requests wait their turn.
//!
//! # Architecture
//!
//! - **Manager**: `KeyedLockManager` owns the lock table and runs the
//!   admission / queueing / hand-off logic
//! - **Tasks**: `Task::Callback` (explicit `Completion`) or `Task::Value`
//!   (future output is the outcome)
//! - **Batches**: `acquire_many` nests single-key acquisitions in a fixed order
//! - **Events**: lifecycle events for observers via `subscribe`
//!
//! # Example
//!
//! ```no_run
//! use keylock_core::locking::{AcquireOptions, KeyedLockManager, LockConfig, Task};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), keylock_core::LockError> {
//! let manager = KeyedLockManager::new(LockConfig::default().with_timeout(Duration::from_secs(5)));
//!
//! let total = manager
//!     .acquire("account:42", Task::value(|| async { Ok(100) }), AcquireOptions::default())
//!     .await?;
//!
//! let moved = manager
//!     .acquire_many(
//!         ["account:1", "account:2"],
//!         Task::value(move || async move { Ok(total) }),
//!         AcquireOptions::default(),
//!     )?
//!     .await?;
//! # let _ = moved;
//! # Ok(())
//! # }
//! ```

mod batch;
pub mod completion;
pub mod event;
pub mod manager;
pub mod task;
pub mod types;

// Re-export main types
pub use completion::{Acquisition, Completion};
pub use event::{LockEvent, LockEventType};
pub use manager::KeyedLockManager;
pub use task::Task;
pub use types::{AcquireOptions, LockConfig, LockStats, DEFAULT_MAX_PENDING};
