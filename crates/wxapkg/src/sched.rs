//! Bounded task scheduler.
//!
//! At most `limit` tasks run at once; the rest wait in a FIFO queue and are
//! started as running tasks finish. The limit is a safety ceiling for the
//! number of open files, not a throughput knob.
//!
//! Every admitted task owns a [`Slot`]; dropping it (normal completion or a
//! panic unwinding through the task) releases the slot and starts the next
//! queued task, so admission and release are always paired.

use crate::error::UnpackError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type Job = Box<dyn FnOnce(Slot) -> BoxFuture + Send + 'static>;

/// Scheduler handle. Cloning shares the same limit and queue.
#[derive(Clone)]
pub struct BoundedScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    limit: usize,
    handle: Handle,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    running: usize,
    queue: VecDeque<Job>,
}

/// Admission token for one running task.
struct Slot {
    inner: Arc<Inner>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        Inner::on_task_finished(&self.inner);
    }
}

impl BoundedScheduler {
    /// Create a scheduler bound to the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, like `tokio::spawn`.
    pub fn new(limit: usize) -> Self {
        Self::with_handle(limit, Handle::current())
    }

    pub fn with_handle(limit: usize, handle: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                limit: limit.max(1),
                handle,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Number of tasks currently admitted.
    pub fn running(&self) -> usize {
        self.inner.state.lock().running
    }

    /// Number of tasks waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Submit a task. It starts immediately if a slot is free, otherwise it
    /// is queued behind earlier submissions.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.push(Box::new(move |slot| {
            Box::pin(async move {
                task.await;
                drop(slot);
            })
        }));
    }

    /// Submit a task and hand its output to `on_done` once it finishes.
    ///
    /// The slot is released before `on_done` runs, so a callback that submits
    /// follow-up work never competes with the task it is reporting on.
    pub fn run_with_completion<F, T, D>(&self, task: F, on_done: D)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        D: FnOnce(T) + Send + 'static,
    {
        self.push(Box::new(move |slot| {
            Box::pin(async move {
                let output = task.await;
                drop(slot);
                on_done(output);
            })
        }));
    }

    /// Submit a task now and return a future resolving to its output.
    pub fn run<F, T>(&self, task: F) -> impl Future<Output = Result<T, UnpackError>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.run_with_completion(task, move |output| {
            let _ = tx.send(output);
        });
        async move { rx.await.map_err(|_| UnpackError::TaskAborted) }
    }

    fn push(&self, job: Job) {
        let mut state = self.inner.state.lock();
        if state.running < self.inner.limit {
            state.running += 1;
            drop(state);
            Inner::launch(&self.inner, job);
        } else {
            state.queue.push_back(job);
        }
    }
}

impl std::fmt::Debug for BoundedScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("BoundedScheduler")
            .field("limit", &self.inner.limit)
            .field("running", &state.running)
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl Inner {
    fn launch(inner: &Arc<Inner>, job: Job) {
        let slot = Slot {
            inner: Arc::clone(inner),
        };
        inner.handle.spawn(job(slot));
    }

    fn on_task_finished(inner: &Arc<Inner>) {
        let next = {
            let mut state = inner.state.lock();
            state.running = state.running.saturating_sub(1);
            let next = state.queue.pop_front();
            if next.is_some() {
                state.running += 1;
            }
            next
        };
        if let Some(job) = next {
            Inner::launch(inner, job);
        }
    }
}
