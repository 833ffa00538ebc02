//! Effect Runner
//!
//! Effect bodies never run inside a step. When an effect starts, its body is
//! handed to an [`EffectRunner`], which executes it on the host's async
//! runtime. The body settles by launching a fresh step on the graph.
//!
//! The contract a runner must honour:
//!
//! - run every task exactly once
//! - never poll the task synchronously inside `spawn`
//!
//! [`TokioRunner`] is the implementation used by default.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::error::{Error, Result};

/// Host-side executor for effect bodies.
pub trait EffectRunner: Send + Sync + 'static {
    /// Schedule a task to run later.
    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<()>;

    /// Resolves once every task spawned so far has finished.
    fn idle(&self) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

#[derive(Debug, Default)]
struct Tracker {
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count when the task ends, even by panic.
struct InFlight(Arc<Tracker>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Runs effect bodies as Tokio tasks.
///
/// Without an explicit handle the runtime is looked up when a task is
/// spawned, so a graph can be built outside of any runtime and used from
/// inside one.
#[derive(Debug, Clone, Default)]
pub struct TokioRunner {
    handle: Option<Handle>,
    tracker: Arc<Tracker>,
}

impl TokioRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn onto a specific runtime.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
            tracker: Arc::default(),
        }
    }

    /// Number of spawned tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight.load(Ordering::SeqCst)
    }
}

impl EffectRunner for TokioRunner {
    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<()> {
        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|err| Error::Runner(err.to_string()))?,
        };

        self.tracker.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(Arc::clone(&self.tracker));
        handle.spawn(async move {
            let _guard = guard;
            task.await;
        });
        Ok(())
    }

    fn idle(&self) -> BoxFuture<'static, ()> {
        let tracker = Arc::clone(&self.tracker);
        Box::pin(async move {
            loop {
                // Register before checking so a wakeup between the check and
                // the await is not lost.
                let notified = tracker.idle.notified();
                if tracker.in_flight.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        })
    }
}
