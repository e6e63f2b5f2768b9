//! Units of work run under a key

use super::completion::Completion;
use crate::error::LockError;
use futures_util::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use tokio::runtime::Handle;

type CallbackBody<T> = Box<dyn FnOnce(Completion<T>) + Send>;
type ValueBody<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// A task to run while holding a key.
///
/// There are two completion styles:
/// - [`Task::Callback`] receives a [`Completion`] and reports through it
///   whenever it is done, possibly from another thread or task.
/// - [`Task::Value`] returns a future; its output is the outcome.
///
/// Panics raised by either style are captured and reported as
/// [`LockError::Panicked`]; they never reach the caller of `acquire`.
pub enum Task<T: Send + 'static> {
    Callback(CallbackBody<T>),
    Value(ValueBody<T>),
}

impl<T: Send + 'static> Task<T> {
    /// A task that signals completion explicitly
    pub fn callback<F>(body: F) -> Self
    where
        F: FnOnce(Completion<T>) + Send + 'static,
    {
        Self::Callback(Box::new(body))
    }

    /// A task whose future's output is the outcome
    pub fn value<F, Fut>(body: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::Value(Box::new(move || body().boxed()))
    }

    /// Start the task body. Callback bodies run on the current thread;
    /// value futures are spawned onto `runtime`.
    pub(crate) fn run(self, completion: Completion<T>, runtime: &Handle) {
        match self {
            Self::Callback(body) => {
                // Unwinding drops `completion`, which reports the panic.
                let _ = panic::catch_unwind(AssertUnwindSafe(move || body(completion)));
            }
            Self::Value(body) => match panic::catch_unwind(AssertUnwindSafe(body)) {
                Ok(future) => {
                    runtime.spawn(async move {
                        let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                            Ok(result) => result.map_err(LockError::Task),
                            Err(payload) => Err(LockError::from_panic(payload)),
                        };
                        completion.resolve(outcome);
                    });
                }
                Err(payload) => completion.resolve(Err(LockError::from_panic(payload))),
            },
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Task::Callback"),
            Self::Value(_) => f.write_str("Task::Value"),
        }
    }
}
