//! Error taxonomy shared by jobs, the worker and the retry helpers

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinError;

/// Boxed error accepted from fallible units of work
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure captured on a [`Job`](crate::Job)
///
/// Cloneable so every holder of a job handle observes the same value.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The unit of work returned an error, or panicked with an error value.
    /// The underlying error is surfaced unchanged.
    #[error(transparent)]
    Failed(Arc<dyn StdError + Send + Sync + 'static>),
    /// The unit of work panicked with a non-error payload
    #[error("{0}")]
    Panicked(String),
    /// An external termination request preempted the wait
    #[error("interrupt signal has been received")]
    Interrupted,
    /// The runtime cancelled the task before it finished
    #[error("job was aborted before completion")]
    Aborted,
}

impl JobError {
    /// Wrap an error returned by a unit of work
    pub fn failed(err: BoxError) -> Self {
        Self::Failed(Arc::from(err))
    }

    /// Convert a recovered panic payload into an error value.
    ///
    /// Error payloads (`BoxError` or `Arc<dyn Error>`) are surfaced as-is,
    /// string payloads become [`JobError::Panicked`] carrying the message.
    ///
    /// A payload is only recognised as an error when it is boxed or shared as a
    /// trait object. `panic_any(MyError)` cannot be told apart from any other
    /// opaque value and is reported as a generic panic; raise
    /// `panic_any(BoxError::from(MyError))` to have `MyError` surfaced unchanged.
    pub fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Self {
        let payload = match payload.downcast::<BoxError>() {
            Ok(err) => return Self::failed(*err),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<Arc<dyn StdError + Send + Sync + 'static>>() {
            Ok(err) => return Self::Failed(*err),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<JobError>() {
            Ok(err) => return *err,
            Err(payload) => payload,
        };
        match payload.downcast::<String>() {
            Ok(msg) => Self::Panicked(*msg),
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(msg) => Self::Panicked((*msg).to_string()),
                Err(_) => Self::Panicked("job panicked with a non-string payload".to_string()),
            },
        }
    }

    /// Convert the failure of a joined task
    pub fn from_join_error(err: JoinError) -> Self {
        if err.is_panic() {
            Self::from_panic(err.into_panic())
        } else {
            Self::Aborted
        }
    }

    /// Borrow the underlying error as `T` when this is [`JobError::Failed`]
    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        match self {
            Self::Failed(err) => err.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Submission and shutdown failures of a [`Worker`](crate::Worker)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("cannot add a new job. worker is exiting")]
    Exiting,
    #[error("parallel execution limit({0}) has been reached")]
    LimitReached(usize),
    #[error("exit timeout exceeded")]
    ExitTimeout,
}

/// Failure of [`retry`](crate::retry)
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: StdError + 'static,
{
    /// The attempt budget ran out. `last` is the error of the final attempt.
    #[error("retry limit reached: {limit}")]
    LimitReached {
        limit: u32,
        #[source]
        last: E,
    },
}

impl<E> RetryError<E>
where
    E: StdError + 'static,
{
    /// Error returned by the final attempt
    pub fn last_error(&self) -> &E {
        match self {
            Self::LimitReached { last, .. } => last,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            Self::LimitReached { last, .. } => last,
        }
    }
}
