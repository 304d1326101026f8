//! Job definitions
//!
//! A [`Job`] is the read-only handle to one unit of work. The executing side
//! is a [`JobCompletion`], which owns the task's join handle and publishes the
//! outcome exactly once.

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{BoxError, JobError};

/// Job Identifier
pub type JobId = Uuid;

/// Job Status
#[derive(Debug, Clone)]
pub enum JobStatus {
    /// Still executing
    Running,
    /// Returned normally
    Succeeded,
    /// Returned an error, panicked, or was interrupted
    Failed(JobError),
}

impl JobStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Handle to a unit of work started by a [`Worker`](crate::Worker)
///
/// Cloning is cheap. Holders may only observe the job, never alter it.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    status: watch::Receiver<JobStatus>,
}

impl Job {
    /// Start `future` on its own task and return the handle plus its completion side
    pub fn start<F, E>(future: F) -> (Job, JobCompletion)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let handle = tokio::spawn(async move { future.await.map_err(Into::into) });
        Self::from_handle(handle)
    }

    /// Start a synchronous callable on the blocking pool
    pub fn start_blocking<F, E>(f: F) -> (Job, JobCompletion)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let handle = tokio::task::spawn_blocking(move || f().map_err(Into::into));
        Self::from_handle(handle)
    }

    fn from_handle(handle: JoinHandle<Result<(), BoxError>>) -> (Job, JobCompletion) {
        let id = Uuid::new_v4();
        let (tx, rx) = watch::channel(JobStatus::Running);
        tracing::debug!(job_id = %id, "Job started");

        (
            Job { id, status: rx },
            JobCompletion {
                id,
                handle,
                status: tx,
            },
        )
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Current status snapshot
    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        !self.status.borrow().is_running()
    }

    /// Captured error, `None` while running or after success
    pub fn error(&self) -> Option<JobError> {
        match &*self.status.borrow() {
            JobStatus::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Wait until the outcome has been published
    pub async fn finished(&self) -> Result<(), JobError> {
        let mut rx = self.status.clone();
        let status = match rx.wait_for(|status| !status.is_running()).await {
            Ok(status) => (*status).clone(),
            // Completion side dropped without publishing: the task never ran to the end.
            Err(_) => JobStatus::Failed(JobError::Aborted),
        };
        match status {
            JobStatus::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }
}

/// Executing side of a [`Job`]. Consumed by [`JobCompletion::wait`].
#[derive(Debug)]
pub struct JobCompletion {
    id: JobId,
    handle: JoinHandle<Result<(), BoxError>>,
    status: watch::Sender<JobStatus>,
}

impl JobCompletion {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Block until the task finishes or `interrupt` fires, whichever comes first.
    ///
    /// An interruption reports [`JobError::Interrupted`] while the task keeps
    /// running in the background. `finalize` runs exactly once, after the
    /// outcome is published, even if this future is dropped early.
    pub async fn wait<F>(self, interrupt: &CancellationToken, finalize: F) -> Result<(), JobError>
    where
        F: FnOnce(),
    {
        let _finalizer = Finalizer(Some(finalize));
        let JobCompletion { id, handle, status } = self;

        let outcome = tokio::select! {
            biased;
            joined = handle => match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(JobError::failed(err)),
                Err(join_err) => Err(JobError::from_join_error(join_err)),
            },
            _ = interrupt.cancelled() => Err(JobError::Interrupted),
        };

        match &outcome {
            Ok(()) => {
                tracing::debug!(job_id = %id, "Job completed");
                status.send_replace(JobStatus::Succeeded);
            }
            Err(err) => {
                tracing::warn!(job_id = %id, error = %err, "Job failed");
                status.send_replace(JobStatus::Failed(err.clone()));
            }
        }

        outcome
    }
}

struct Finalizer<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for Finalizer<F> {
    fn drop(&mut self) {
        if let Some(finalize) = self.0.take() {
            finalize();
        }
    }
}
