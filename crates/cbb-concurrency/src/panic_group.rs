//! Group of tasks that fails fast on the first failure

use std::convert::Infallible;
use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, JobError};

/// Runs tasks concurrently; [`PanicGroup::wait`] returns on the first task
/// failure, on interruption, or once every task has finished.
///
/// Tasks still running when `wait` returns early keep running until the group
/// is dropped. Dropping the group aborts them.
#[derive(Debug)]
pub struct PanicGroup {
    tasks: JoinSet<Result<(), BoxError>>,
    interrupt: CancellationToken,
}

impl PanicGroup {
    pub fn new(interrupt: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            interrupt,
        }
    }

    /// Spawn an infallible task
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.try_spawn(async move {
            future.await;
            Ok::<(), Infallible>(())
        });
    }

    /// Spawn a task whose `Err` counts as a failure of the group
    pub fn try_spawn<F, E>(&mut self, future: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.tasks
            .spawn(async move { future.await.map_err(Into::into) });
    }

    /// Spawn a synchronous callable on the blocking pool
    pub fn spawn_blocking<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.tasks.spawn_blocking(move || {
            f();
            Ok(())
        });
    }

    /// Number of tasks not yet observed by [`PanicGroup::wait`]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the first failure, an interruption, or completion of all tasks
    pub async fn wait(&mut self) -> Result<(), JobError> {
        if self.tasks.is_empty() {
            return Ok(());
        }

        loop {
            tokio::select! {
                biased;
                _ = self.interrupt.cancelled() => return Err(JobError::Interrupted),
                joined = self.tasks.join_next() => match joined {
                    None => return Ok(()),
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(err))) => return Err(JobError::failed(err)),
                    Some(Err(join_err)) => return Err(JobError::from_join_error(join_err)),
                },
            }
        }
    }
}
