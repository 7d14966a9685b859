//! Reusable countdown barrier.
//!
//! Producers `increment` before starting units of work and `decrement` as
//! each finishes. Callbacks registered with [`CompletionBarrier::on_drain`]
//! fire exactly once, in registration order, when the count returns to zero;
//! the barrier is then ready for the next wave.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Countdown barrier handle. Cloning shares the same counter.
#[derive(Clone, Default)]
pub struct CompletionBarrier {
    inner: Arc<Mutex<BarrierState>>,
}

#[derive(Default)]
struct BarrierState {
    count: usize,
    pending: Vec<Callback>,
    // Set while a drain is running its callbacks.
    firing: bool,
}

impl CompletionBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of outstanding units.
    pub fn count(&self) -> usize {
        self.inner.lock().count
    }

    /// Register `delta` outstanding units.
    pub fn increment(&self, delta: usize) {
        self.inner.lock().count += delta;
    }

    /// Mark one unit finished. Never goes below zero.
    ///
    /// On the transition to zero every pending callback fires, outside the
    /// lock, so callbacks may touch the barrier again. Callbacks registered
    /// while the drain is running queue behind the ones already pending.
    pub fn decrement(&self) {
        {
            let mut state = self.inner.lock();
            if state.count == 0 {
                return;
            }
            state.count -= 1;
            if state.count > 0 || state.firing {
                return;
            }
            state.firing = true;
        }
        self.fire_pending();
    }

    fn fire_pending(&self) {
        loop {
            let batch = {
                let mut state = self.inner.lock();
                // A callback may have started the next wave.
                if state.count > 0 || state.pending.is_empty() {
                    state.firing = false;
                    return;
                }
                std::mem::take(&mut state.pending)
            };
            for callback in batch {
                callback();
            }
        }
    }

    /// Run `callback` when the count next reaches zero, or right away if it
    /// already is zero and no drain is in progress.
    pub fn on_drain<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.inner.lock();
            if state.count > 0 || state.firing {
                state.pending.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Same as [`on_drain`](Self::on_drain); used on the invocation-wide I/O
    /// barrier to wait until nothing at all is outstanding.
    pub fn when_idle<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_drain(callback);
    }

    /// Wait until the count reaches zero.
    pub async fn drained(&self) {
        let (tx, rx) = oneshot::channel();
        self.on_drain(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }
}

impl std::fmt::Debug for CompletionBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("CompletionBarrier")
            .field("count", &state.count)
            .field("pending", &state.pending.len())
            .field("firing", &state.firing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let cb_hits = Arc::clone(&hits);
        (hits, move || {
            cb_hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fires_after_last_decrement() {
        let barrier = CompletionBarrier::new();
        barrier.increment(3);
        let (hits, cb) = counter();
        barrier.on_drain(cb);

        barrier.decrement();
        barrier.decrement();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        barrier.decrement();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Extra decrements neither go negative nor refire.
        barrier.decrement();
        assert_eq!(barrier.count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fires_immediately_when_idle() {
        let barrier = CompletionBarrier::new();
        let (hits, cb) = counter();
        barrier.when_idle(cb);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fifo_order_and_reuse() {
        let barrier = CompletionBarrier::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        barrier.increment(1);
        for i in 0..3 {
            let order = Arc::clone(&order);
            barrier.on_drain(move || order.lock().push(i));
        }
        barrier.decrement();
        assert_eq!(*order.lock(), vec![0, 1, 2]);

        // Second wave only fires its own callbacks.
        barrier.increment(2);
        let second = Arc::clone(&order);
        barrier.on_drain(move || second.lock().push(10));
        barrier.decrement();
        barrier.decrement();
        assert_eq!(*order.lock(), vec![0, 1, 2, 10]);
    }

    #[test]
    fn test_interleaved_increments() {
        let barrier = CompletionBarrier::new();
        let (hits, cb) = counter();
        barrier.increment(1);
        barrier.on_drain(cb);
        barrier.increment(2);
        barrier.decrement();
        barrier.decrement();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        barrier.decrement();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_register_on_same_barrier() {
        let barrier = CompletionBarrier::new();
        let (hits, cb) = counter();
        barrier.increment(1);
        let nested = barrier.clone();
        barrier.on_drain(move || nested.on_drain(cb));
        barrier.decrement();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registration_during_drain_keeps_order() {
        let barrier = CompletionBarrier::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        barrier.increment(1);

        let first = Arc::clone(&order);
        let late = Arc::clone(&order);
        let nested = barrier.clone();
        barrier.on_drain(move || {
            first.lock().push("a");
            nested.on_drain(move || late.lock().push("c"));
        });
        let second = Arc::clone(&order);
        barrier.on_drain(move || second.lock().push("b"));

        barrier.decrement();
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
        assert!(format!("{:?}", barrier).contains("firing: false"));
    }

    #[test]
    fn test_new_wave_started_by_callback_waits() {
        let barrier = CompletionBarrier::new();
        let (hits, cb) = counter();
        barrier.increment(1);
        let nested = barrier.clone();
        barrier.on_drain(move || {
            nested.increment(1);
            nested.on_drain(cb);
        });
        barrier.decrement();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(barrier.count(), 1);

        barrier.decrement();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_registration_keeps_order() {
        for _ in 0..50 {
            let barrier = CompletionBarrier::new();
            let order = Arc::new(Mutex::new(Vec::new()));
            barrier.increment(1);
            for i in 0..4 {
                let order = Arc::clone(&order);
                barrier.on_drain(move || {
                    std::thread::yield_now();
                    order.lock().push(i);
                });
            }
            let racer = {
                let barrier = barrier.clone();
                let order = Arc::clone(&order);
                std::thread::spawn(move || {
                    barrier.on_drain(move || order.lock().push(99));
                })
            };
            barrier.decrement();
            racer.join().unwrap();

            // A late registration never overtakes the pending callbacks.
            assert_eq!(*order.lock(), vec![0, 1, 2, 3, 99]);
        }
    }

    #[tokio::test]
    async fn test_drained_waits_for_workers() {
        let barrier = CompletionBarrier::new();
        let finished = Arc::new(AtomicUsize::new(0));
        barrier.increment(5);
        for _ in 0..5 {
            let barrier = barrier.clone();
            let finished = Arc::clone(&finished);
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                finished.fetch_add(1, Ordering::SeqCst);
                barrier.decrement();
            });
        }
        barrier.drained().await;
        assert_eq!(finished.load(Ordering::SeqCst), 5);
    }
}
