//! Single-flight task execution.
//!
//! [`TaskGate::run`] hands a task to the runtime and returns immediately. The
//! task then waits for the gate, so at most one gated task executes at a time.
//! Every dispatched task is counted until it finishes, which lets shutdown
//! [`drain`](TaskGate::drain) outstanding work instead of abandoning it.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
};

#[derive(Clone, Default)]
pub struct TaskGate {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    lock: Mutex<()>,
    outstanding: AtomicUsize,
    idle: Notify,
}

/// Counts one outstanding task, released on drop so that a panicking task is
/// still accounted for.
struct Outstanding {
    inner: Arc<Inner>,
}

impl Outstanding {
    fn new(inner: &Arc<Inner>) -> Self {
        inner.outstanding.fetch_add(1, Ordering::AcqRel);
        Self { inner: inner.clone() }
    }
}

impl Drop for Outstanding {
    fn drop(&mut self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl TaskGate {
    pub fn new() -> Self { Self::default() }

    /// Schedule `task` behind the gate. The returned handle may be dropped to
    /// detach the task; it keeps running and is still tracked for draining.
    pub fn run<F, Fut>(&self, task: F) -> JoinHandle<Fut::Output>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let outstanding = Outstanding::new(&self.inner);
        tokio::spawn(async move {
            let _guard = outstanding.inner.lock.lock().await;
            task().await
        })
    }

    /// Number of dispatched tasks that haven't finished yet, including those
    /// still waiting for the gate.
    pub fn outstanding(&self) -> usize { self.inner.outstanding.load(Ordering::Acquire) }

    /// Wait until every dispatched task has finished.
    pub async fn drain(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking the counter so a concurrent final
            // release can't slip in between.
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}
