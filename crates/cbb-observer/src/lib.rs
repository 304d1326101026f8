//! # CBB Observer
//!
//! Periodically checks every due subscription for balance movements, fanning
//! the checks out over a bounded [`Worker`](cbb_concurrency::Worker).
//!
//! The subscription store and the blockchain explorer are reached through the
//! [`SubscriptionSource`] and [`MovementChecker`] traits.

pub mod config;
pub mod error;
pub mod observer;
pub mod subscription;

pub use config::{ConfigError, ObserverConfig};
pub use error::ObserverError;
pub use observer::{CycleReport, MovementChecker, MovementObserver};
pub use subscription::{InMemorySubscriptionSource, Subscription, SubscriptionSource};
