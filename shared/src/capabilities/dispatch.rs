//! Execution contexts for completions.
//!
//! Completion-style APIs in this crate never call back on the thread that
//! produced a result. They hand a [`Job`] to a [`Dispatcher`] chosen by the
//! caller, which decides where it runs. [`MainQueue`] models the UI run loop:
//! jobs pile up until the owner of the [`MainLoop`] drains them.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::warn;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job);
}

impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    fn dispatch(&self, job: Job) {
        (**self).dispatch(job);
    }
}

/// Runs the job on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Dispatcher for Immediate {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Runs the job as a task on a Tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    handle: Handle,
}

impl TokioDispatcher {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is currently running on.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Dispatcher for TokioDispatcher {
    fn dispatch(&self, job: Job) {
        self.handle.spawn(async move { job() });
    }
}

/// Sending half of the main queue. Cheap to clone and share with background work.
#[derive(Debug, Clone)]
pub struct MainQueue {
    tx: mpsc::UnboundedSender<Job>,
}

/// Receiving half, owned by whoever plays the role of the UI thread.
#[derive(Debug)]
pub struct MainLoop {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl MainQueue {
    pub fn new() -> (Self, MainLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, MainLoop { rx })
    }
}

impl Dispatcher for MainQueue {
    fn dispatch(&self, job: Job) {
        if self.tx.send(job).is_err() {
            warn!("main loop dropped, discarding completion");
        }
    }
}

impl MainLoop {
    /// Runs every job queued so far and returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Waits for the next job and runs it. Returns `false` once every
    /// [`MainQueue`] handle is gone and nothing is left to run.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }
}
