//! Movement observer
//!
//! Each poll cycle reads the chain tip, picks the subscriptions lagging behind
//! it and runs one movement check per subscription on the worker. A rejected
//! submission ends the cycle early; the rest is picked up next cycle.

use std::sync::Arc;

use async_trait::async_trait;
use cbb_concurrency::{retry, Job, Worker, WorkerError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ObserverConfig;
use crate::error::ObserverError;
use crate::subscription::{Subscription, SubscriptionSource};

/// Fetches the movements of one subscription and applies them
#[async_trait]
pub trait MovementChecker: Send + Sync {
    async fn check_and_apply(&self, subscription: &Subscription) -> Result<(), ObserverError>;
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    /// Subscriptions due in this cycle
    pub due: usize,
    /// Checks handed to the worker
    pub submitted: usize,
    /// Checks skipped after a rejection
    pub skipped: usize,
    /// Why the cycle ended early, if it did
    pub rejected: Option<WorkerError>,
}

pub struct MovementObserver<S, C> {
    source: Arc<S>,
    checker: Arc<C>,
    config: ObserverConfig,
    worker: Worker,
    /// Interrupts job waits once a drain has timed out
    interrupt: CancellationToken,
    /// Ends the observe loop
    observing: CancellationToken,
}

impl<S, C> MovementObserver<S, C>
where
    S: SubscriptionSource + 'static,
    C: MovementChecker + 'static,
{
    /// Create an observer. Cancelling `shutdown` ends [`MovementObserver::start`];
    /// in-flight checks are drained by [`MovementObserver::stop`].
    pub fn new(
        source: Arc<S>,
        checker: Arc<C>,
        config: ObserverConfig,
        shutdown: &CancellationToken,
    ) -> Self {
        let interrupt = CancellationToken::new();
        Self {
            source,
            checker,
            config,
            worker: Worker::with_config(config.worker_config(), interrupt.clone()),
            interrupt,
            observing: shutdown.child_token(),
        }
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Run a single poll cycle and wait for its checks to finish
    pub async fn observe_once(&self) -> Result<CycleReport, ObserverError> {
        let chain_height = self.source.latest_block_height().await?;
        let threshold = chain_height.saturating_sub(self.config.block_height_margin);
        let due = self.source.subscriptions_below(threshold).await?;

        let mut report = CycleReport {
            due: due.len(),
            ..CycleReport::default()
        };

        for subscription in due {
            let subscription_id = subscription.id.clone();
            match self.submit(subscription) {
                Ok(job) => {
                    debug!(
                        subscription_id = %subscription_id,
                        job_id = %job.id(),
                        "Submitted movement check"
                    );
                    report.submitted += 1;
                }
                Err(err) => {
                    report.skipped = report.due - report.submitted;
                    report.rejected = Some(err);
                    warn!(
                        error = %err,
                        skipped = report.skipped,
                        "Movement check rejected, skipping the rest of this cycle"
                    );
                    break;
                }
            }
        }

        self.worker.wait_all().await;

        info!(
            chain_height,
            due = report.due,
            submitted = report.submitted,
            skipped = report.skipped,
            "Observe cycle finished"
        );
        Ok(report)
    }

    fn submit(&self, subscription: Subscription) -> Result<Job, WorkerError> {
        let checker = Arc::clone(&self.checker);
        let retrial = self.config.check_retrial;

        self.worker.try_run(async move {
            retry(retrial, move || {
                let checker = Arc::clone(&checker);
                let subscription = subscription.clone();
                async move { checker.check_and_apply(&subscription).await }
            })
            .await
        })
    }

    /// Observe until [`MovementObserver::stop`] is called or the shutdown token fires
    pub async fn start(&self) {
        info!(
            interval_secs = self.config.observe_interval.as_secs(),
            max_parallelism = self.config.max_parallelism,
            "Starting movement observer"
        );

        while !self.observing.is_cancelled() {
            if let Err(err) = self.observe_once().await {
                error!(error = %err, "Error while observing");
            }

            tokio::select! {
                _ = self.observing.cancelled() => break,
                _ = tokio::time::sleep(self.config.observe_interval) => {}
            }
        }

        info!("Movement observer stopped");
    }

    /// Stop observing and drain in-flight checks within the exit timeout.
    ///
    /// On timeout the remaining checks are reported as interrupted and the
    /// error is returned so the caller can exit anyway.
    pub async fn stop(&self) -> Result<(), ObserverError> {
        self.observing.cancel();

        match self.worker.stop().await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(
                    error = %err,
                    jobs_in_progress = self.worker.jobs_in_progress(),
                    "Movement checks did not drain in time"
                );
                self.interrupt.cancel();
                Err(err.into())
            }
        }
    }
}
