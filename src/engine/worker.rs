//! Single-concurrency executor backing the command engine.
//!
//! One named OS thread owns the worker state and runs jobs strictly in FIFO
//! order. Callers get a [`PendingResult`] they can `.await` from async code or
//! [`PendingResult::wait`] on from a plain thread. Blocking on a result from
//! the worker thread itself is rejected instead of deadlocking.

use crate::error::{constants, EngineError, EngineResult};
use crate::utils::listeners::panic_message;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

pub(crate) struct Worker<S> {
    tx: Mutex<Option<mpsc::UnboundedSender<Job<S>>>>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Send + 'static> Worker<S> {
    pub(crate) fn spawn(name: &str, state: S) -> EngineResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<Job<S>>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_jobs(state, rx))
            .map_err(EngineError::WorkerSpawn)?;
        debug!(worker = name, "engine worker started");
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub(crate) fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Queues `job`; its result is delivered through the returned handle.
    pub(crate) fn submit<T, F>(&self, job: F) -> PendingResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> EngineResult<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let boxed: Job<S> = Box::new(move |state| {
            // The caller may have dropped its handle (fire-and-forget).
            let _ = reply_tx.send(job(state));
        });

        let sent = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|tx| tx.send(boxed).is_ok())
            .unwrap_or(false);

        if sent {
            PendingResult::waiting(reply_rx, self.thread_id)
        } else {
            PendingResult::ready(Err(EngineError::Shutdown), self.thread_id)
        }
    }

    /// Stops accepting jobs and, unless called from the worker, waits for
    /// the queued jobs to drain.
    pub(crate) fn shutdown(&self) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(tx);

        if self.is_worker_thread() {
            return;
        }
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("engine worker terminated abnormally");
            }
        }
    }
}

fn run_jobs<S>(mut state: S, mut rx: mpsc::UnboundedReceiver<Job<S>>) {
    while let Some(job) = rx.blocking_recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(&mut state))) {
            error!(panic = %panic_message(&payload), "engine job panicked");
        }
    }
    debug!("engine worker stopped");
}

enum Pending<T> {
    Waiting(oneshot::Receiver<EngineResult<T>>),
    Ready(Option<EngineResult<T>>),
}

/// Result of a queued engine job.
#[must_use = "dropping the handle turns the submission into fire-and-forget"]
pub struct PendingResult<T> {
    pending: Pending<T>,
    worker: ThreadId,
}

impl<T> Unpin for PendingResult<T> {}

impl<T> PendingResult<T> {
    fn waiting(rx: oneshot::Receiver<EngineResult<T>>, worker: ThreadId) -> Self {
        Self {
            pending: Pending::Waiting(rx),
            worker,
        }
    }

    fn ready(result: EngineResult<T>, worker: ThreadId) -> Self {
        Self {
            pending: Pending::Ready(Some(result)),
            worker,
        }
    }

    /// Blocks the current thread until the job completes.
    ///
    /// Must not be called from inside an async runtime; use `.await` there.
    /// Called from the engine worker it fails with
    /// [`EngineError::WorkerReentry`].
    pub fn wait(self) -> EngineResult<T> {
        if thread::current().id() == self.worker {
            error!("{}", constants::ERR_WORKER_REENTRY);
            return Err(EngineError::WorkerReentry);
        }
        match self.pending {
            Pending::Waiting(rx) => rx.blocking_recv().unwrap_or(Err(EngineError::Shutdown)),
            Pending::Ready(result) => result.unwrap_or(Err(EngineError::Shutdown)),
        }
    }
}

impl<T> Future for PendingResult<T> {
    type Output = EngineResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.pending {
            Pending::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(EngineError::Shutdown))),
            Pending::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(EngineError::Shutdown)))
            }
        }
    }
}
