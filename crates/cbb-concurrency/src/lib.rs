//! # CBB Concurrency
//!
//! Bounded fan-out of independent units of work for the balance observer.
//!
//! Features:
//! - [`Worker`] with a hard parallelism limit and drain-on-stop
//! - [`Job`] handles that capture panics and errors as values
//! - [`PanicGroup`] for "first failure wins" batches
//! - [`retry`] with a fixed delay and an attempt budget

pub mod error;
pub mod job;
pub mod panic_group;
pub mod retry;
pub mod shutdown;
pub mod worker;

pub use error::{BoxError, JobError, RetryError, WorkerError};
pub use job::{Job, JobId, JobStatus};
pub use panic_group::PanicGroup;
pub use retry::{retry, retry_blocking, Retrial, RetryLimit};
pub use shutdown::install_shutdown_handler;
pub use worker::{Worker, WorkerConfig};
