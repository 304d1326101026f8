//! Fixed-delay retry with an attempt budget

use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::RetryError;

/// How many retries follow the first failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    Limited(u32),
    /// Retry forever. Callers must bound total wall-clock time themselves.
    Unlimited,
}

/// Retrial parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retrial {
    pub limit: RetryLimit,
    /// Delay between attempts
    pub delay: Duration,
}

impl Retrial {
    pub fn new(limit: u32, delay: Duration) -> Self {
        Self {
            limit: RetryLimit::Limited(limit),
            delay,
        }
    }

    pub fn unlimited(delay: Duration) -> Self {
        Self {
            limit: RetryLimit::Unlimited,
            delay,
        }
    }

    /// Build from a raw limit where any negative value means unlimited
    pub fn from_raw(limit: i64, delay: Duration) -> Self {
        match u32::try_from(limit) {
            Ok(limit) => Self::new(limit, delay),
            Err(_) if limit < 0 => Self::unlimited(delay),
            Err(_) => Self::new(u32::MAX, delay),
        }
    }

    /// Whether another attempt is allowed after `failures` failed attempts
    fn allows_retry(&self, failures: u64) -> bool {
        match self.limit {
            RetryLimit::Limited(limit) => failures <= u64::from(limit),
            RetryLimit::Unlimited => true,
        }
    }

    fn exhausted<E: StdError + 'static>(&self, last: E) -> RetryError<E> {
        let limit = match self.limit {
            RetryLimit::Limited(limit) => limit,
            RetryLimit::Unlimited => u32::MAX,
        };
        RetryError::LimitReached { limit, last }
    }
}

impl Default for Retrial {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Call `operation` until it succeeds or the retrial budget is spent.
///
/// With `Retrial::new(n, _)` the operation runs at most `n + 1` times.
pub async fn retry<T, E, F, Fut>(retrial: Retrial, mut operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: StdError + 'static,
{
    let operation_name = std::any::type_name::<F>();
    let mut failures: u64 = 0;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        failures = failures.saturating_add(1);
        warn!(
            attempt = failures,
            operation = operation_name,
            error = %err,
            "Operation failed"
        );

        if !retrial.allows_retry(failures) {
            error!(attempts = failures, operation = operation_name, "Retry limit reached");
            return Err(retrial.exhausted(err));
        }

        debug!(
            attempt = failures,
            operation = operation_name,
            delay_ms = retrial.delay.as_millis() as u64,
            "Retrying operation"
        );
        tokio::time::sleep(retrial.delay).await;
    }
}

/// Blocking variant of [`retry`] for synchronous operations
pub fn retry_blocking<T, E, F>(retrial: Retrial, mut operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Result<T, E>,
    E: StdError + 'static,
{
    let operation_name = std::any::type_name::<F>();
    let mut failures: u64 = 0;

    loop {
        let err = match operation() {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        failures = failures.saturating_add(1);
        warn!(
            attempt = failures,
            operation = operation_name,
            error = %err,
            "Operation failed"
        );

        if !retrial.allows_retry(failures) {
            error!(attempts = failures, operation = operation_name, "Retry limit reached");
            return Err(retrial.exhausted(err));
        }

        debug!(attempt = failures, operation = operation_name, "Retrying operation");
        std::thread::sleep(retrial.delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_negative_is_unlimited() {
        let retrial = Retrial::from_raw(-1, Duration::from_millis(10));
        assert_eq!(retrial.limit, RetryLimit::Unlimited);

        let retrial = Retrial::from_raw(5, Duration::from_millis(10));
        assert_eq!(retrial.limit, RetryLimit::Limited(5));
    }

    #[test]
    fn test_allows_retry_budget() {
        let retrial = Retrial::new(2, Duration::ZERO);
        assert!(retrial.allows_retry(1));
        assert!(retrial.allows_retry(2));
        assert!(!retrial.allows_retry(3));

        let retrial = Retrial::unlimited(Duration::ZERO);
        assert!(retrial.allows_retry(u64::MAX));
    }

    #[test]
    fn test_largest_limit_is_still_finite() {
        let retrial = Retrial::from_raw(i64::MAX, Duration::ZERO);
        assert_eq!(retrial.limit, RetryLimit::Limited(u32::MAX));

        let limit = u64::from(u32::MAX);
        assert!(retrial.allows_retry(limit));
        assert!(!retrial.allows_retry(limit + 1));
    }
}
