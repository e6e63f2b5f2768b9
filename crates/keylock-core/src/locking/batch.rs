//! Ordered multi-key acquisition
//!
//! A batch is a chain of single-key acquisitions: the first key is acquired,
//! then the second while holding the first, and so on, and the task runs once
//! every key is held. Releases unwind the chain innermost first.
//!
//! Keys are taken in exactly the order given. Two call sites that request
//! overlapping keys in different relative orders can deadlock, and so does a
//! list that repeats a key; neither is detected.

use super::completion::{Acquisition, Completion, Sink};
use super::manager::KeyedLockManager;
use super::task::Task;
use super::types::AcquireOptions;
use crate::error::{LockError, LockResult};
use tokio::sync::oneshot;

impl KeyedLockManager {
    /// Acquire every key in `keys`, in order, and run `task` while all are
    /// held.
    ///
    /// Fails synchronously with [`LockError::EmptyKeySet`] if `keys` is
    /// empty. Otherwise the returned future resolves to the task's outcome,
    /// or to the first acquisition error in the chain.
    pub fn acquire_many<T, K>(
        &self,
        keys: impl IntoIterator<Item = K>,
        task: Task<T>,
        options: AcquireOptions,
    ) -> LockResult<Acquisition<T>>
    where
        T: Send + 'static,
        K: Into<String>,
    {
        let (outer, rest) = split_keys(keys)?;
        let label = outer.clone();
        let (tx, rx) = oneshot::channel();
        self.submit_chain(outer, rest, task, options, Sink::Channel(tx));
        Ok(Acquisition::new(label, rx))
    }

    /// Like [`acquire_many`](Self::acquire_many), delivering the outcome to
    /// `callback`.
    pub fn acquire_many_with<T, K, F>(
        &self,
        keys: impl IntoIterator<Item = K>,
        task: Task<T>,
        options: AcquireOptions,
        callback: F,
    ) -> LockResult<()>
    where
        T: Send + 'static,
        K: Into<String>,
        F: FnOnce(LockResult<T>) + Send + 'static,
    {
        let (outer, rest) = split_keys(keys)?;
        self.submit_chain(outer, rest, task, options, Sink::Callback(Box::new(callback)));
        Ok(())
    }

    fn submit_chain<T: Send + 'static>(
        &self,
        outer: String,
        rest: Vec<String>,
        task: Task<T>,
        options: AcquireOptions,
        sink: Sink<T>,
    ) {
        let chained = rest
            .into_iter()
            .rev()
            .fold(task, |inner, key| nest(key, inner, options));
        self.submit(outer, chained, options, sink);
    }
}

/// Separate the outermost key from the ones nested inside it
fn split_keys<K: Into<String>>(
    keys: impl IntoIterator<Item = K>,
) -> LockResult<(String, Vec<String>)> {
    let mut keys = keys.into_iter().map(Into::into);
    let outer = keys.next().ok_or(LockError::EmptyKeySet)?;
    Ok((outer, keys.collect()))
}

/// Wrap `inner` so that it only runs once `key` is held too. The wrapper's
/// own key is released when the nested acquisition reports back.
fn nest<T: Send + 'static>(key: String, inner: Task<T>, options: AcquireOptions) -> Task<T> {
    Task::callback(move |outer: Completion<T>| {
        let manager = outer.manager().clone();
        manager.submit(
            key,
            inner,
            options,
            Sink::Callback(Box::new(move |result| outer.resolve(result))),
        );
    })
}
