//! Worker for running jobs in parallel under a hard limit

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{BoxError, WorkerError};
use crate::job::{Job, JobCompletion, JobId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Maximum number of live jobs
    pub max_parallelism: usize,
    /// How long [`Worker::stop`] waits for live jobs. Zero waits without bound.
    pub exit_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 100,
            exit_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs jobs concurrently, never more than `max_parallelism` at once.
///
/// Submissions beyond the limit are rejected, not queued. Cloning yields
/// another handle to the same worker.
///
/// All submission methods spawn Tokio tasks and must be called from within a
/// Tokio runtime.
#[derive(Debug, Clone)]
pub struct Worker {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: WorkerConfig,
    accepting: AtomicBool,
    jobs: Mutex<HashMap<JobId, Job>>,
    live: watch::Sender<usize>,
    interrupt: CancellationToken,
}

impl Inner {
    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Interrupted waits free their slot while the task keeps running, so an
    /// interrupted worker must not take new jobs.
    fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire) && !self.interrupt.is_cancelled()
    }

    fn register<S>(&self, start: S) -> Result<(Job, JobCompletion), WorkerError>
    where
        S: FnOnce() -> (Job, JobCompletion),
    {
        if !self.is_accepting() {
            return Err(WorkerError::Exiting);
        }

        let mut jobs = self.jobs();
        // stop() clears the flag under this lock
        if !self.is_accepting() {
            return Err(WorkerError::Exiting);
        }
        if jobs.len() >= self.config.max_parallelism {
            return Err(WorkerError::LimitReached(self.config.max_parallelism));
        }

        let (job, completion) = start();
        jobs.insert(job.id(), job.clone());
        self.live.send_replace(jobs.len());

        Ok((job, completion))
    }

    fn remove(&self, id: JobId) {
        let mut jobs = self.jobs();
        jobs.remove(&id);
        self.live.send_replace(jobs.len());
    }
}

impl Worker {
    /// Create a worker that is never interrupted externally
    pub fn new(max_parallelism: usize, exit_timeout: Duration) -> Self {
        Self::with_config(
            WorkerConfig {
                max_parallelism,
                exit_timeout,
            },
            CancellationToken::new(),
        )
    }

    /// Create a worker whose job waits are preempted when `interrupt` is cancelled.
    /// From then on submissions are rejected with [`WorkerError::Exiting`].
    pub fn with_config(config: WorkerConfig, interrupt: CancellationToken) -> Self {
        let (live, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                config,
                accepting: AtomicBool::new(true),
                jobs: Mutex::new(HashMap::new()),
                live,
                interrupt,
            }),
        }
    }

    /// Run `future` as a new job and return its handle without waiting
    pub fn run<F>(&self, future: F) -> Result<Job, WorkerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.try_run(async move {
            future.await;
            Ok::<(), Infallible>(())
        })
    }

    /// Run a fallible `future` as a new job. An `Err` is captured on the job.
    pub fn try_run<F, E>(&self, future: F) -> Result<Job, WorkerError>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let (job, completion) = self.inner.register(|| Job::start(future))?;
        self.supervise(completion);
        Ok(job)
    }

    /// Run a synchronous callable as a new job on the blocking pool
    pub fn run_blocking<F>(&self, f: F) -> Result<Job, WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (job, completion) = self.inner.register(|| {
            Job::start_blocking(move || {
                f();
                Ok::<(), Infallible>(())
            })
        })?;
        self.supervise(completion);
        Ok(job)
    }

    fn supervise(&self, completion: JobCompletion) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let id = completion.id();
            let interrupt = inner.interrupt.clone();
            let _ = completion.wait(&interrupt, || inner.remove(id)).await;
        });
    }

    /// Wait until no job is live. Returns immediately when idle.
    pub async fn wait_all(&self) {
        let mut live = self.inner.live.subscribe();
        let _ = live.wait_for(|count| *count == 0).await;
    }

    /// Stop accepting jobs, then wait for live jobs up to the exit timeout.
    ///
    /// Jobs still running at the deadline are left alone; the caller decides
    /// what to do with [`WorkerError::ExitTimeout`].
    pub async fn stop(&self) -> Result<(), WorkerError> {
        {
            let _jobs = self.inner.jobs();
            self.inner.accepting.store(false, Ordering::Release);
        }

        let timeout = self.inner.config.exit_timeout;
        info!(
            jobs_in_progress = self.jobs_in_progress(),
            timeout_ms = timeout.as_millis() as u64,
            "Worker stopped accepting jobs, draining"
        );

        if timeout.is_zero() {
            self.wait_all().await;
            info!("Worker drained");
            return Ok(());
        }

        match tokio::time::timeout(timeout, self.wait_all()).await {
            Ok(()) => {
                info!("Worker drained");
                Ok(())
            }
            Err(_) => {
                warn!(
                    jobs_in_progress = self.jobs_in_progress(),
                    "Worker exit timeout exceeded"
                );
                Err(WorkerError::ExitTimeout)
            }
        }
    }

    /// Number of live jobs at the time of the call
    pub fn jobs_in_progress(&self) -> usize {
        self.inner.jobs().len()
    }

    pub fn is_job_alive(&self, id: JobId) -> bool {
        self.inner.jobs().contains_key(&id)
    }

    /// False once stopped or interrupted
    pub fn is_accepting(&self) -> bool {
        self.inner.is_accepting()
    }

    pub fn config(&self) -> WorkerConfig {
        self.inner.config
    }
}
