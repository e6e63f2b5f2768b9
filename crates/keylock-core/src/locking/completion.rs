//! Completion plumbing: single-delivery sinks, the caller-side future, and
//! the handle a running task uses to report its outcome.

use super::manager::KeyedLockManager;
use crate::error::{LockError, LockResult};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Caller-supplied completion callback
pub(crate) type Callback<T> = Box<dyn FnOnce(LockResult<T>) + Send>;

/// Where an acquisition's outcome goes
pub(crate) enum Sink<T> {
    Channel(oneshot::Sender<LockResult<T>>),
    Callback(Callback<T>),
}

/// Per-acquisition delivery guard.
///
/// The slot is emptied by the first delivery; every later attempt finds it
/// empty and does nothing. Timeout, rejection and normal completion all go
/// through here, so the caller hears exactly once.
pub(crate) struct CompletionSink<T> {
    slot: Mutex<Option<Sink<T>>>,
}

impl<T> CompletionSink<T> {
    pub(crate) fn new(sink: Sink<T>) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Some(sink)),
        })
    }

    /// Deliver an outcome. Returns `false` if one was already delivered.
    pub(crate) fn deliver(&self, result: LockResult<T>) -> bool {
        let sink = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sink {
            Some(Sink::Channel(tx)) => {
                // The receiver may be gone; the caller stopped listening.
                let _ = tx.send(result);
                true
            }
            Some(Sink::Callback(callback)) => {
                callback(result);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_delivered(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Future resolving to the outcome of an acquisition.
///
/// The acquisition is already submitted when this is returned: dropping it
/// does not withdraw the request, it only discards the outcome.
#[must_use = "the outcome of the acquisition is only observable by awaiting it"]
pub struct Acquisition<T> {
    key: String,
    rx: oneshot::Receiver<LockResult<T>>,
}

impl<T> Acquisition<T> {
    pub(crate) fn new(key: String, rx: oneshot::Receiver<LockResult<T>>) -> Self {
        Self { key, rx }
    }

    /// The key (or, for batches, the outermost key) this acquisition targets
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<T> Future for Acquisition<T> {
    type Output = LockResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(LockError::Abandoned(this.key.clone()))))
    }
}

impl<T> fmt::Debug for Acquisition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquisition").field("key", &self.key).finish()
    }
}

/// Handle given to a running task; reporting through it releases the key.
///
/// Completion is consumed by [`complete`](Self::complete), so it can only be
/// reported once. Dropping the handle without reporting releases the key
/// with [`LockError::Abandoned`], or [`LockError::Panicked`] if the drop
/// happens while the task is unwinding.
pub struct Completion<T: Send + 'static> {
    key: String,
    manager: KeyedLockManager,
    sink: Arc<CompletionSink<T>>,
    runtime: Handle,
    finished: bool,
}

impl<T: Send + 'static> Completion<T> {
    pub(crate) fn new(
        manager: KeyedLockManager,
        key: String,
        sink: Arc<CompletionSink<T>>,
        runtime: Handle,
    ) -> Self {
        Self {
            key,
            manager,
            sink,
            runtime,
            finished: false,
        }
    }

    /// The key this task holds
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Report the task's outcome and release the key
    pub fn complete(self, result: anyhow::Result<T>) {
        self.resolve(result.map_err(LockError::Task));
    }

    /// Report an already-classified outcome and release the key
    pub fn resolve(mut self, result: LockResult<T>) {
        self.finished = true;
        self.manager.release(&self.key, &*self.sink, result);
    }

    pub(crate) fn manager(&self) -> &KeyedLockManager {
        &self.manager
    }
}

impl<T: Send + 'static> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if std::thread::panicking() {
            // Releasing starts the next waiter, which must not run on a
            // thread that is already unwinding.
            let manager = self.manager.clone();
            let sink = Arc::clone(&self.sink);
            let key = std::mem::take(&mut self.key);
            self.runtime.spawn(async move {
                let error = LockError::Panicked(format!(
                    "task for key '{key}' panicked before reporting completion"
                ));
                manager.release(&key, &*sink, Err(error));
            });
        } else {
            let error = LockError::Abandoned(self.key.clone());
            self.manager.release(&self.key, &*self.sink, Err(error));
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("key", &self.key)
            .field("delivered", &self.sink.is_delivered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_sink_delivers_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sink = CompletionSink::new(Sink::Callback(Box::new(move |result: LockResult<u32>| {
            assert_eq!(result.ok(), Some(7));
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        assert!(!sink.is_delivered());
        assert!(sink.deliver(Ok(7)));
        assert!(sink.is_delivered());
        assert!(!sink.deliver(Ok(8)));
        assert!(!sink.deliver(Err(LockError::EmptyKeySet)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_channel_sink_feeds_acquisition() {
        let (tx, rx) = oneshot::channel();
        let sink = CompletionSink::new(Sink::Channel(tx));
        let acquisition = Acquisition::new("k".to_string(), rx);

        assert!(sink.deliver(Ok("done")));
        assert_eq!(acquisition.key(), "k");
        let result = acquisition.now_or_never().expect("outcome should be ready");
        assert_eq!(result.ok(), Some("done"));
    }

    #[test]
    fn test_dropped_sink_resolves_as_abandoned() {
        let (tx, rx) = oneshot::channel::<LockResult<()>>();
        drop(CompletionSink::new(Sink::Channel(tx)));

        let result = Acquisition::new("orphan".to_string(), rx)
            .now_or_never()
            .expect("closed channel should resolve immediately");
        assert!(matches!(result, Err(LockError::Abandoned(key)) if key == "orphan"));
    }

    #[test]
    fn test_delivery_to_dropped_receiver_still_counts() {
        let (tx, rx) = oneshot::channel::<LockResult<()>>();
        drop(rx);
        let sink = CompletionSink::new(Sink::Channel(tx));

        assert!(sink.deliver(Ok(())));
        assert!(!sink.deliver(Ok(())));
    }
}
