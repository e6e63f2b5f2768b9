//! Keyed lock manager
//!
//! The lock manager owns a table from key to a FIFO queue of waiters. It
//! handles:
//! - Running a task immediately when its key is free
//! - Queueing contenders in arrival order, up to `max_pending` per key
//! - Failing queued waiters whose timeout fires before they start
//! - Handing the key to the next live waiter when the holder completes
//!
//! The table is guarded by a mutex that is only ever held for bookkeeping.
//! Task bodies, completion callbacks and outcome delivery always run with the
//! mutex released, so a task may re-enter the manager freely.
//!
//! Hand-offs are drained by a per-thread loop. A release that happens while
//! this thread is already starting a waiter only queues the next waiter, so
//! a long line of tasks that complete synchronously runs in constant stack.

use super::completion::{Acquisition, Completion, CompletionSink, Sink};
use super::event::LockEvent;
use super::task::Task;
use super::types::{AcquireOptions, LockConfig, LockStats};
use crate::error::{LockError, LockResult};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of the lock event channel; slow subscribers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 256;

const QUEUED: u8 = 0;
const STARTED: u8 = 1;
const TIMED_OUT: u8 = 2;

/// Phase of a queued request, shared with its timeout timer.
///
/// Only one of `Queued -> Started` and `Queued -> TimedOut` can happen.
#[derive(Debug, Default)]
struct WaiterPhase(AtomicU8);

impl WaiterPhase {
    fn try_start(&self) -> bool {
        self.transition(STARTED)
    }

    fn try_time_out(&self) -> bool {
        self.transition(TIMED_OUT)
    }

    fn transition(&self, to: u8) -> bool {
        self.0
            .compare_exchange(QUEUED, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

type StartFn = Box<dyn FnOnce(&KeyedLockManager) + Send>;

/// A queued request. A waiter whose timer fired stays in place as a ghost
/// and is skipped when it reaches the head of the queue.
struct Waiter {
    phase: Arc<WaiterPhase>,
    start: StartFn,
    timer: Option<JoinHandle<()>>,
}

type LockTable = HashMap<String, VecDeque<Waiter>>;

/// A waiter that has been handed a key but not started yet
struct Handoff {
    manager: KeyedLockManager,
    key: String,
    waiter: Waiter,
}

thread_local! {
    /// `Some` while this thread is draining hand-offs
    static HANDOFFS: RefCell<Option<VecDeque<Handoff>>> = const { RefCell::new(None) };
}

/// Marks the current thread as draining until dropped
struct Draining;

impl Draining {
    fn enter() -> Self {
        HANDOFFS.with(|cell| *cell.borrow_mut() = Some(VecDeque::new()));
        Draining
    }

    fn next() -> Option<Handoff> {
        HANDOFFS.with(|cell| cell.borrow_mut().as_mut().and_then(VecDeque::pop_front))
    }
}

impl Drop for Draining {
    fn drop(&mut self) {
        let leftover = HANDOFFS.with(|cell| cell.borrow_mut().take());
        drop(leftover);
    }
}

struct Inner {
    config: LockConfig,
    /// key -> waiters. The holder is not stored; an entry with an empty
    /// queue means "held, nobody waiting".
    table: Mutex<LockTable>,
    events: broadcast::Sender<LockEvent>,
}

impl Inner {
    fn lock_table(&self) -> MutexGuard<'_, LockTable> {
        // Tasks never run under this mutex, so a poisoned table is still
        // consistent.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keyed mutual exclusion for asynchronous tasks.
///
/// At most one task holds a key at a time; contenders are served in arrival
/// order. Cloning is cheap and clones share the same lock table.
///
/// Must be used from within a Tokio runtime: value tasks and waiter timers
/// are spawned onto the runtime that submitted them.
#[derive(Clone)]
pub struct KeyedLockManager {
    inner: Arc<Inner>,
}

impl KeyedLockManager {
    /// Create a new lock manager with the given configuration
    pub fn new(config: LockConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                config,
                table: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Create a lock manager with default configuration
    pub fn with_defaults() -> Self {
        Self::new(LockConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    /// Acquire `key` and run `task` while holding it.
    ///
    /// Returns immediately; the returned future resolves to the task's
    /// outcome or to the acquisition error.
    pub fn acquire<T: Send + 'static>(
        &self,
        key: impl Into<String>,
        task: Task<T>,
        options: AcquireOptions,
    ) -> Acquisition<T> {
        let key = key.into();
        let (tx, rx) = oneshot::channel();
        self.submit(key.clone(), task, options, Sink::Channel(tx));
        Acquisition::new(key, rx)
    }

    /// Like [`acquire`](Self::acquire), delivering the outcome to `callback`
    /// instead of a future.
    pub fn acquire_with<T, F>(
        &self,
        key: impl Into<String>,
        task: Task<T>,
        options: AcquireOptions,
        callback: F,
    ) where
        T: Send + 'static,
        F: FnOnce(LockResult<T>) + Send + 'static,
    {
        self.submit(key.into(), task, options, Sink::Callback(Box::new(callback)));
    }

    /// Run an async closure while holding `key`, with default options
    pub async fn run_exclusive<T, F, Fut>(&self, key: impl Into<String>, body: F) -> LockResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.acquire(key, Task::value(body), AcquireOptions::default())
            .await
    }

    /// Whether `key` is held or has waiters; with no key, whether any key is
    pub fn is_busy(&self, key: Option<&str>) -> bool {
        let table = self.inner.lock_table();
        match key {
            Some(key) => table.contains_key(key),
            None => !table.is_empty(),
        }
    }

    /// Number of waiters queued behind the holder of `key`, or `None` if the
    /// key is free. Timed-out waiters count until they are skipped.
    pub fn queue_len(&self, key: &str) -> Option<usize> {
        self.inner.lock_table().get(key).map(VecDeque::len)
    }

    /// Snapshot of the lock table
    pub fn stats(&self) -> LockStats {
        let table = self.inner.lock_table();
        LockStats {
            held_keys: table.len(),
            queued_waiters: table.values().map(VecDeque::len).sum(),
        }
    }

    /// Subscribe to lock events
    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.inner.events.subscribe()
    }

    // ========== Internal Methods ==========

    /// Admit a request: run it now, queue it, or reject it.
    pub(crate) fn submit<T: Send + 'static>(
        &self,
        key: String,
        task: Task<T>,
        options: AcquireOptions,
        sink: Sink<T>,
    ) {
        let sink = CompletionSink::new(sink);

        let Ok(runtime) = Handle::try_current() else {
            warn!(key = %key, "Lock requested outside a Tokio runtime");
            sink.deliver(Err(LockError::RuntimeUnavailable));
            return;
        };

        let mut table = self.inner.lock_table();

        let Some(queue) = table.get_mut(&key) else {
            table.insert(key.clone(), VecDeque::new());
            drop(table);

            debug!(key = %key, "Lock acquired");
            self.emit(LockEvent::acquired(&key));
            self.start(key, task, sink, runtime);
            return;
        };

        let limit = self.inner.config.max_pending;
        if queue.len() >= limit {
            drop(table);

            warn!(key = %key, limit, "Rejecting lock request: too many pending tasks");
            self.emit(LockEvent::rejected(&key, limit));
            sink.deliver(Err(LockError::TooManyPending { key, limit }));
            return;
        }

        let phase = Arc::new(WaiterPhase::default());
        let timer = options
            .effective_timeout(&self.inner.config)
            .map(|timeout| {
                runtime.spawn(expire(
                    key.clone(),
                    timeout,
                    Arc::clone(&phase),
                    Arc::clone(&sink),
                    self.inner.events.clone(),
                ))
            });

        let start: StartFn = {
            let key = key.clone();
            Box::new(move |manager: &KeyedLockManager| manager.start(key, task, sink, runtime))
        };

        queue.push_back(Waiter {
            phase,
            start,
            timer,
        });
        let pending = queue.len();
        drop(table);

        debug!(key = %key, pending, "Lock busy, request queued");
        self.emit(LockEvent::queued(&key, pending));
    }

    fn start<T: Send + 'static>(
        &self,
        key: String,
        task: Task<T>,
        sink: Arc<CompletionSink<T>>,
        runtime: Handle,
    ) {
        // Hand-offs can arrive on threads outside the runtime; nested
        // submits from the task body still need it.
        let _entered = runtime.enter();
        let completion = Completion::new(self.clone(), key, sink, runtime.clone());
        task.run(completion, &runtime);
    }

    /// Completion path of a holder: hand the key on (or free it), deliver the
    /// outcome, then start whichever waiter was handed the key.
    pub(crate) fn release<T>(&self, key: &str, sink: &CompletionSink<T>, result: LockResult<T>) {
        let next = self.take_next(key);
        sink.deliver(result);
        if let Some(waiter) = next {
            self.hand_off(key, waiter);
        }
    }

    /// Start `waiter` now, or queue it for the drain loop already running on
    /// this thread.
    fn hand_off(&self, key: &str, waiter: Waiter) {
        let handoff = Handoff {
            manager: self.clone(),
            key: key.to_string(),
            waiter,
        };

        let handoff = HANDOFFS.with(move |cell| match cell.borrow_mut().as_mut() {
            Some(pending) => {
                pending.push_back(handoff);
                None
            }
            None => Some(handoff),
        });
        let Some(first) = handoff else {
            return;
        };

        let _draining = Draining::enter();
        let mut next = Some(first);
        while let Some(Handoff {
            manager,
            key,
            waiter,
        }) = next
        {
            manager.run_waiters(&key, waiter);
            next = Draining::next();
        }
    }

    /// Pop the next waiter for `key`, removing the key once nobody waits.
    fn take_next(&self, key: &str) -> Option<Waiter> {
        let mut table = self.inner.lock_table();

        let Some(queue) = table.get_mut(key) else {
            warn!(key = %key, "Completion reported for a key that is not held");
            return None;
        };

        if let Some(waiter) = queue.pop_front() {
            return Some(waiter);
        }

        table.remove(key);
        drop(table);

        debug!(key = %key, "Lock released");
        self.emit(LockEvent::released(key));
        None
    }

    /// Start `waiter`, skipping over timed-out ghosts until a live waiter
    /// starts or the queue runs dry.
    fn run_waiters(&self, key: &str, mut waiter: Waiter) {
        loop {
            if let Some(timer) = waiter.timer.take() {
                timer.abort();
            }

            if waiter.phase.try_start() {
                debug!(key = %key, "Lock handed to next waiter");
                self.emit(LockEvent::acquired(key));
                (waiter.start)(self);
                return;
            }

            // Its timeout already told the caller; just give up the slot.
            debug!(key = %key, "Skipping timed-out waiter");
            self.emit(LockEvent::skipped(key));
            drop(waiter);

            match self.take_next(key) {
                Some(next) => waiter = next,
                None => return,
            }
        }
    }

    fn emit(&self, event: LockEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

/// Timer armed for a queued waiter
async fn expire<T: Send + 'static>(
    key: String,
    timeout: Duration,
    phase: Arc<WaiterPhase>,
    sink: Arc<CompletionSink<T>>,
    events: broadcast::Sender<LockEvent>,
) {
    tokio::time::sleep(timeout).await;

    if !phase.try_time_out() {
        return;
    }

    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    warn!(key = %key, timeout_ms, "Lock acquisition timed out");
    let _ = events.send(LockEvent::timed_out(&key, timeout_ms));
    sink.deliver(Err(LockError::TimedOut { key, timeout }));
}

impl fmt::Debug for KeyedLockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLockManager")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
