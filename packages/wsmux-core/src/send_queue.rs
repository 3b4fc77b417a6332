//! Bounded outbound buffer owned by a single connection, with a flush
//! loop and the three enqueue modes from spec §4.2.
//!
//! The buffer itself is a plain `VecDeque` behind a `parking_lot::Mutex`
//! (grounded on the short-critical-section style of
//! `server-rust/src/network/connection.rs`'s `ConnectionRegistry`, which
//! guards its `DashMap` the same way) rather than a bounded
//! `tokio::sync::mpsc`, because the async-with-callback mode needs to
//! inspect and requeue items after a flush in ways an `mpsc::Receiver`
//! does not expose.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::EnqueueError;

/// An enqueue that failed hands the item back to the caller, mirroring
/// `tokio::sync::mpsc::error::TrySendError`.
#[derive(Debug)]
pub struct EnqueueRejected<T> {
    pub item: T,
    pub kind: EnqueueError,
}

type WriteFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type WriteFn<T> = Arc<dyn Fn(T) -> WriteFuture + Send + Sync>;
/// Fires with `(Ok(()), None)` once the item has moved into the buffer,
/// or `(Err(kind), Some(item))` handing the item back on timeout/close --
/// `enqueue_blocking` needs the item back to satisfy its `Result<(),
/// EnqueueRejected<T>>` contract, `enqueue_async`'s public callback just
/// discards it.
type AsyncCallback<T> = Box<dyn FnOnce(Result<(), EnqueueError>, Option<T>) + Send>;

/// Point-in-time counters for a [`SendQueue`] (spec §4.2's stats list).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendQueueStats {
    pub depth: usize,
    pub enqueued: u64,
    pub sent: u64,
    pub dropped: u64,
    pub errors: u64,
}

struct WaiterInner<T> {
    item: Option<T>,
    callback: Option<AsyncCallback<T>>,
}

/// A registered async-with-callback waiter. Whichever of {a flush
/// freeing space, the deadline timer} observes `item.is_some()` first
/// claims the fire -- the other sees `None` and is a no-op, giving
/// exactly-once delivery (spec §3 invariant 4's shape, applied to
/// enqueue waiters).
struct Waiter<T> {
    inner: StdMutex<WaiterInner<T>>,
}

impl<T> Waiter<T> {
    fn claim(&self) -> Option<(T, AsyncCallback<T>)> {
        let mut inner = self.inner.lock().unwrap();
        match (inner.item.take(), inner.callback.take()) {
            (Some(item), Some(cb)) => Some((item, cb)),
            _ => None,
        }
    }

    fn fire_timeout(&self) {
        if let Some((item, cb)) = self.claim() {
            cb(Err(EnqueueError::Timeout), Some(item));
        }
    }
}

struct QueueState<T> {
    buffer: VecDeque<T>,
    waiters: VecDeque<Arc<Waiter<T>>>,
    stopped: bool,
}

struct Stats {
    enqueued: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

impl Stats {
    fn new() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

struct Inner<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
    stats: Stats,
}

/// A bounded, FIFO outbound buffer with non-blocking, blocking-with-
/// deadline, and async-with-callback enqueue modes.
pub struct SendQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SendQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> SendQueue<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                state: Mutex::new(QueueState {
                    buffer: VecDeque::with_capacity(capacity.min(1024)),
                    waiters: VecDeque::new(),
                    stopped: false,
                }),
                stats: Stats::new(),
            }),
        }
    }

    #[must_use]
    pub fn stats(&self) -> SendQueueStats {
        let depth = self.inner.state.lock().buffer.len();
        SendQueueStats {
            depth,
            enqueued: self.inner.stats.enqueued.load(Ordering::Relaxed),
            sent: self.inner.stats.sent.load(Ordering::Relaxed),
            dropped: self.inner.stats.dropped.load(Ordering::Relaxed),
            errors: self.inner.stats.errors.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    /// Non-blocking enqueue. Never suspends the caller.
    ///
    /// # Errors
    /// Returns the item back with [`EnqueueError::Rejected`] if the queue
    /// is full, or [`EnqueueError::Closed`] if `stop()` has run.
    pub fn try_enqueue(&self, item: T) -> Result<(), EnqueueRejected<T>> {
        let mut state = self.inner.state.lock();
        if state.stopped {
            return Err(EnqueueRejected {
                item,
                kind: EnqueueError::Closed,
            });
        }
        if state.buffer.len() >= self.inner.capacity {
            self.inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(EnqueueRejected {
                item,
                kind: EnqueueError::Rejected,
            });
        }
        state.buffer.push_back(item);
        self.inner.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Waits until space is available or `timeout` expires, without
    /// polling: registers a waiter woken by the next flush (or the
    /// timeout task) and awaits its notification, the same machinery
    /// [`enqueue_async`](Self::enqueue_async) uses.
    ///
    /// # Errors
    /// Returns the item back with [`EnqueueError::Timeout`] if the
    /// deadline expires, or [`EnqueueError::Closed`] if stopped.
    pub async fn enqueue_blocking(
        &self,
        item: T,
        timeout: Duration,
    ) -> Result<(), EnqueueRejected<T>> {
        match self.try_enqueue(item) {
            Ok(()) => Ok(()),
            Err(EnqueueRejected {
                item,
                kind: EnqueueError::Rejected,
            }) => {
                let (tx, rx) = tokio::sync::oneshot::channel();
                self.spawn_waiter(
                    item,
                    timeout,
                    Box::new(move |result, item| {
                        let _ = tx.send((result, item));
                    }),
                );
                match rx.await {
                    Ok((Ok(()), _)) => Ok(()),
                    Ok((Err(kind), item)) => Err(EnqueueRejected {
                        item: item.expect("error outcomes always hand the item back"),
                        kind,
                    }),
                    Err(_) => unreachable!("the waiter callback always fires before its sender drops"),
                }
            }
            Err(other) => Err(other),
        }
    }

    /// Registers a waiter and returns immediately. `callback` fires
    /// exactly once: with `Ok(())` when a post-flush retry succeeds,
    /// with `Err(Timeout)` if `timeout` expires first, or with
    /// `Err(Closed)` if `stop()` runs before either.
    pub fn enqueue_async(
        &self,
        item: T,
        timeout: Duration,
        callback: impl FnOnce(Result<(), EnqueueError>) + Send + 'static,
    ) {
        self.spawn_waiter(item, timeout, Box::new(move |result, _item| callback(result)));
    }

    /// Shared waiter registration used by both [`enqueue_async`](Self::enqueue_async)
    /// and [`enqueue_blocking`](Self::enqueue_blocking): pushes a waiter,
    /// arms its timeout task, then gives the current flush a chance to
    /// claim it immediately if the queue already has room.
    fn spawn_waiter(&self, item: T, timeout: Duration, callback: AsyncCallback<T>) {
        let waiter = Arc::new(Waiter {
            inner: StdMutex::new(WaiterInner {
                item: Some(item),
                callback: Some(callback),
            }),
        });

        {
            let mut state = self.inner.state.lock();
            if state.stopped {
                drop(state);
                if let Some((item, cb)) = waiter.claim() {
                    cb(Err(EnqueueError::Closed), Some(item));
                }
                return;
            }
            state.waiters.push_back(Arc::clone(&waiter));
        }

        let inner = Arc::clone(&self.inner);
        let timeout_waiter = Arc::clone(&waiter);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timeout_waiter.fire_timeout();
            let mut state = inner.state.lock();
            state
                .waiters
                .retain(|w| !Arc::ptr_eq(w, &timeout_waiter));
        });

        // A waiter may find space immediately if the queue already has
        // room; try once without waiting for the next flush tick.
        self.process_waiters();
    }

    /// Attempts to move as many waiting items into the buffer as there
    /// is room for, in registration order. Called after every flush and
    /// once at async-enqueue time.
    fn process_waiters(&self) {
        loop {
            let next = {
                let mut state = self.inner.state.lock();
                if state.buffer.len() >= self.inner.capacity {
                    None
                } else {
                    state.waiters.pop_front()
                }
            };
            let Some(waiter) = next else {
                break;
            };
            let Some((item, cb)) = waiter.claim() else {
                continue; // already timed out; drop and move on
            };
            {
                let mut state = self.inner.state.lock();
                state.buffer.push_back(item);
            }
            self.inner.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            cb(Ok(()), None);
        }
    }

    /// Drains the whole buffer (FIFO order preserved) into a `Vec`.
    fn drain(&self) -> Vec<T> {
        let mut state = self.inner.state.lock();
        state.buffer.drain(..).collect()
    }

    /// Spawns the flush loop: every `flush_interval`, drains the buffer
    /// and writes each message via `writer`, in acceptance order. A
    /// write error is counted and reported through `on_error`; it is
    /// never re-counted as sent.
    pub fn start(
        &self,
        flush_interval: Duration,
        writer: WriteFn<T>,
        on_error: Arc<dyn Fn(String) + Send + Sync>,
    ) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if queue.inner.state.lock().stopped {
                    break;
                }
                let batch = queue.drain();
                for item in batch {
                    match writer(item).await {
                        Ok(()) => {
                            queue.inner.stats.sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(reason) => {
                            queue.inner.stats.errors.fetch_add(1, Ordering::Relaxed);
                            on_error(reason);
                        }
                    }
                }
                queue.process_waiters();
            }
        })
    }

    /// Stops the queue: marks it closed (further enqueues fail with
    /// `Closed`), fires `Closed` to every outstanding waiter, and
    /// returns whatever remained in the buffer un-sent.
    pub fn stop(&self) -> Vec<T> {
        let (remaining, waiters) = {
            let mut state = self.inner.state.lock();
            state.stopped = true;
            let remaining = state.buffer.drain(..).collect();
            let waiters = std::mem::take(&mut state.waiters);
            (remaining, waiters)
        };
        for waiter in waiters {
            if let Some((item, cb)) = waiter.claim() {
                cb(Err(EnqueueError::Closed), Some(item));
            }
        }
        remaining
    }
}
