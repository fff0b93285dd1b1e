//! Single-worker executor for task bodies.
//!
//! Bodies run one at a time on a dedicated thread. The runner submits work
//! and blocks on [`Dispatcher::wait_idle`] until the in-flight count drops to
//! zero, so shared simulation state is never touched by two bodies at once.

use crate::error::ExecutionError;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() -> Result<(), ExecutionError> + Send>;

/// Runs submitted bodies on one worker thread and signals when idle.
pub struct Dispatcher {
    jobs: Option<Sender<Job>>,
    idle: Receiver<()>,
    in_flight: Arc<AtomicUsize>,
    /// First error raised by a body since the last [`Dispatcher::take_error`].
    error: Arc<Mutex<Option<ExecutionError>>>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the worker thread.
    pub fn new() -> Self {
        let (job_tx, job_rx) = channel::unbounded::<Job>();
        let (idle_tx, idle_rx) = channel::unbounded();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let error = Arc::new(Mutex::new(None));

        let worker = {
            let in_flight = Arc::clone(&in_flight);
            let error = Arc::clone(&error);
            thread::Builder::new()
                .name("distcheck-dispatcher".into())
                .spawn(move || worker_loop(job_rx, idle_tx, in_flight, error))
                .map_err(|e| warn!(error = %e, "Failed to spawn dispatcher worker"))
                .ok()
        };

        Self {
            jobs: Some(job_tx),
            idle: idle_rx,
            in_flight,
            error,
            worker,
        }
    }

    /// Queue a body for execution.
    pub fn submit<F>(&self, job: F) -> Result<(), ExecutionError>
    where
        F: FnOnce() -> Result<(), ExecutionError> + Send + 'static,
    {
        let jobs = self.jobs.as_ref().ok_or(ExecutionError::DispatcherClosed)?;
        if self.worker.is_none() {
            return Err(ExecutionError::DispatcherClosed);
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if jobs.send(Box::new(job)).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(ExecutionError::DispatcherClosed);
        }
        Ok(())
    }

    /// Block until every submitted body has finished or `deadline` passes.
    ///
    /// On timeout the running body is abandoned, not interrupted.
    pub fn wait_idle(&self, deadline: Instant) -> Result<(), ExecutionError> {
        loop {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                // Swallow signals from bodies we already observed finishing.
                while self.idle.try_recv().is_ok() {}
                return Ok(());
            }
            match self.idle.recv_deadline(deadline) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => return Err(ExecutionError::Timeout),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ExecutionError::DispatcherClosed)
                }
            }
        }
    }

    /// Number of bodies submitted but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Take the first error raised by a body, if any.
    pub fn take_error(&self) -> Option<ExecutionError> {
        self.error.lock().take()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Closing the channel stops the worker once its queue is empty.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                let _ = worker.join();
            } else {
                debug!("Abandoning dispatcher worker with a body still running");
            }
        }
    }
}

fn worker_loop(
    jobs: Receiver<Job>,
    idle: Sender<()>,
    in_flight: Arc<AtomicUsize>,
    error: Arc<Mutex<Option<ExecutionError>>>,
) {
    for job in jobs.iter() {
        let failure = match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(ExecutionError::Panic(panic_message(payload.as_ref()))),
        };
        if let Some(e) = failure {
            let mut slot = error.lock();
            if slot.is_none() {
                *slot = Some(e);
            }
        }
        if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = idle.send(());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
