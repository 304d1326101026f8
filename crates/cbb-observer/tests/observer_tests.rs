//! Integration tests for the movement observer

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cbb_concurrency::{Retrial, WorkerError};
use cbb_observer::{
    InMemorySubscriptionSource, MovementChecker, MovementObserver, ObserverConfig, ObserverError,
    Subscription, SubscriptionSource,
};
use tokio_util::sync::CancellationToken;

/// Checker that applies movements up to the chain tip and records every attempt
struct RecordingChecker {
    source: Arc<InMemorySubscriptionSource>,
    latency: Duration,
    /// Failures to report per subscription before succeeding
    failures: Mutex<HashMap<String, u32>>,
    attempts: Mutex<Vec<String>>,
}

impl RecordingChecker {
    fn new(source: Arc<InMemorySubscriptionSource>, latency: Duration) -> Self {
        Self {
            source,
            latency,
            failures: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    fn failing(self, id: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(id.to_string(), times);
        self
    }

    fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl MovementChecker for RecordingChecker {
    async fn check_and_apply(&self, subscription: &Subscription) -> Result<(), ObserverError> {
        self.attempts.lock().unwrap().push(subscription.id.clone());
        tokio::time::sleep(self.latency).await;

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&subscription.id) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(ObserverError::Check(format!(
                "explorer timeout for {}",
                subscription.id
            )));
        }

        let tip = self.source.latest_block_height().await?;
        self.source.update_block_height(&subscription.id, tip).await
    }
}

/// Route observer logs to the test output; `RUST_LOG` overrides the level
fn setup_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

fn subscription(id: &str, block_height: u64) -> Subscription {
    Subscription {
        id: id.to_string(),
        user_id: format!("user-{id}"),
        currency: "btc".to_string(),
        block_height,
    }
}

fn config(max_parallelism: usize) -> ObserverConfig {
    ObserverConfig {
        observe_interval: Duration::from_millis(50),
        max_parallelism,
        exit_timeout: Duration::from_secs(1),
        block_height_margin: 0,
        check_retrial: Retrial::new(2, Duration::from_millis(10)),
    }
}

async fn seeded_source(chain_height: u64, heights: &[(&str, u64)]) -> Arc<InMemorySubscriptionSource> {
    setup_logging();
    let source = Arc::new(InMemorySubscriptionSource::new(chain_height));
    for (id, height) in heights {
        source.insert(subscription(id, *height)).await;
    }
    source
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cycle_checks_every_due_subscription() {
    let source = seeded_source(100, &[("a", 10), ("b", 50), ("c", 100)]).await;
    let checker = Arc::new(RecordingChecker::new(source.clone(), Duration::from_millis(20)));
    let observer = MovementObserver::new(
        source.clone(),
        checker.clone(),
        config(10),
        &CancellationToken::new(),
    );

    let report = observer.observe_once().await.unwrap();

    assert_eq!(report.due, 2);
    assert_eq!(report.submitted, 2);
    assert_eq!(report.skipped, 0);
    assert!(report.rejected.is_none());
    assert_eq!(observer.worker().jobs_in_progress(), 0);

    let mut attempts = checker.attempts();
    attempts.sort();
    assert_eq!(attempts, vec!["a", "b"]);
    assert_eq!(source.get("a").await.unwrap().block_height, 100);
}

#[tokio::test]
async fn test_block_height_margin_skips_recent_subscriptions() {
    let source = seeded_source(100, &[("a", 10), ("b", 95)]).await;
    let checker = Arc::new(RecordingChecker::new(source.clone(), Duration::ZERO));
    let observer = MovementObserver::new(
        source.clone(),
        checker.clone(),
        ObserverConfig {
            block_height_margin: 6,
            ..config(10)
        },
        &CancellationToken::new(),
    );

    let report = observer.observe_once().await.unwrap();

    assert_eq!(report.due, 1);
    assert_eq!(checker.attempts(), vec!["a"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_rejection_skips_rest_of_cycle() {
    let source = seeded_source(100, &[("a", 1), ("b", 1), ("c", 1), ("d", 1), ("e", 1)]).await;
    let checker = Arc::new(RecordingChecker::new(source.clone(), Duration::from_millis(100)));
    let observer = MovementObserver::new(
        source.clone(),
        checker.clone(),
        config(2),
        &CancellationToken::new(),
    );

    let first = observer.observe_once().await.unwrap();
    assert_eq!(first.due, 5);
    assert_eq!(first.submitted, 2);
    assert_eq!(first.skipped, 3);
    assert_eq!(first.rejected, Some(WorkerError::LimitReached(2)));

    // The skipped subscriptions are still due on the next cycle
    let second = observer.observe_once().await.unwrap();
    assert_eq!(second.due, 3);
    assert_eq!(second.submitted, 2);
}

#[tokio::test]
async fn test_failed_check_is_retried() {
    let source = seeded_source(100, &[("a", 10)]).await;
    let checker = Arc::new(
        RecordingChecker::new(source.clone(), Duration::ZERO).failing("a", 2),
    );
    let observer = MovementObserver::new(
        source.clone(),
        checker.clone(),
        config(4),
        &CancellationToken::new(),
    );

    observer.observe_once().await.unwrap();

    assert_eq!(checker.attempts(), vec!["a", "a", "a"]);
    assert_eq!(source.get("a").await.unwrap().block_height, 100);
}

#[tokio::test]
async fn test_exhausted_check_leaves_subscription_due() {
    let source = seeded_source(100, &[("a", 10)]).await;
    let checker = Arc::new(
        RecordingChecker::new(source.clone(), Duration::ZERO).failing("a", 10),
    );
    let observer = MovementObserver::new(
        source.clone(),
        checker.clone(),
        config(4),
        &CancellationToken::new(),
    );

    let report = observer.observe_once().await.unwrap();

    assert_eq!(report.submitted, 1);
    assert_eq!(checker.attempts().len(), 3, "initial attempt plus 2 retries");
    assert_eq!(source.get("a").await.unwrap().block_height, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_and_stop() {
    let source = seeded_source(100, &[("a", 10)]).await;
    let checker = Arc::new(RecordingChecker::new(source.clone(), Duration::from_millis(10)));
    let observer = Arc::new(MovementObserver::new(
        source.clone(),
        checker.clone(),
        config(4),
        &CancellationToken::new(),
    ));

    let running = {
        let observer = observer.clone();
        tokio::spawn(async move { observer.start().await })
    };

    tokio::time::sleep(Duration::from_millis(120)).await;
    // Advance the chain so the next cycle has work again
    source.set_chain_height(200);
    tokio::time::sleep(Duration::from_millis(120)).await;

    observer.stop().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), running)
        .await
        .expect("observe loop should exit after stop")
        .unwrap();

    assert_eq!(source.get("a").await.unwrap().block_height, 200);
    assert!(!observer.worker().is_accepting());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_token_ends_observe_loop() {
    let source = seeded_source(100, &[]).await;
    let checker = Arc::new(RecordingChecker::new(source.clone(), Duration::ZERO));
    let shutdown = CancellationToken::new();
    let observer = Arc::new(MovementObserver::new(
        source,
        checker,
        ObserverConfig {
            observe_interval: Duration::from_secs(60),
            ..config(4)
        },
        &shutdown,
    ));

    let running = {
        let observer = observer.clone();
        tokio::spawn(async move { observer.start().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(1), running)
        .await
        .expect("shutdown should interrupt the sleep between cycles")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_reports_drain_timeout_and_interrupts_checks() {
    let source = seeded_source(100, &[("slow", 10)]).await;
    let checker = Arc::new(RecordingChecker::new(source.clone(), Duration::from_secs(2)));
    let observer = Arc::new(MovementObserver::new(
        source.clone(),
        checker,
        ObserverConfig {
            exit_timeout: Duration::from_millis(100),
            ..config(4)
        },
        &CancellationToken::new(),
    ));

    let cycle = {
        let observer = observer.clone();
        tokio::spawn(async move { observer.observe_once().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let err = observer.stop().await.unwrap_err();
    assert!(matches!(err, ObserverError::Worker(WorkerError::ExitTimeout)));

    // Interrupted checks release the cycle long before the checker finishes
    let report = tokio::time::timeout(Duration::from_millis(500), cycle)
        .await
        .expect("cycle should be released by the interruption")
        .unwrap()
        .unwrap();
    assert_eq!(report.submitted, 1);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(observer.worker().jobs_in_progress(), 0);
}
