//! Subscriptions and where they come from

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::ObserverError;

/// A user's request to be notified about movements of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    /// Currency symbol, e.g. `btc`
    pub currency: String,
    /// Last block height whose movements have been applied
    pub block_height: u64,
}

/// Read access to the subscription store
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// Height of the chain tip
    async fn latest_block_height(&self) -> Result<u64, ObserverError>;

    /// Subscriptions whose block height is strictly below `block_height`
    async fn subscriptions_below(&self, block_height: u64)
        -> Result<Vec<Subscription>, ObserverError>;
}

/// In-memory subscription store
#[derive(Debug, Default)]
pub struct InMemorySubscriptionSource {
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
    chain_height: AtomicU64,
}

impl InMemorySubscriptionSource {
    pub fn new(chain_height: u64) -> Self {
        Self {
            subscriptions: Arc::default(),
            chain_height: AtomicU64::new(chain_height),
        }
    }

    /// Build from a JSON array of subscriptions
    pub fn from_json(chain_height: u64, json: &str) -> Result<Self, ObserverError> {
        let subscriptions: Vec<Subscription> = serde_json::from_str(json)?;
        let map = subscriptions
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();

        Ok(Self {
            subscriptions: Arc::new(RwLock::new(map)),
            chain_height: AtomicU64::new(chain_height),
        })
    }

    pub async fn insert(&self, subscription: Subscription) {
        self.subscriptions
            .write()
            .await
            .insert(subscription.id.clone(), subscription);
    }

    pub async fn remove(&self, id: &str) -> Option<Subscription> {
        self.subscriptions.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<Subscription> {
        self.subscriptions.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscriptions.read().await.is_empty()
    }

    /// Record that movements up to `block_height` were applied
    pub async fn update_block_height(&self, id: &str, block_height: u64) -> Result<(), ObserverError> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(id)
            .ok_or_else(|| ObserverError::Source(format!("subscription {id} not found")))?;
        subscription.block_height = block_height;
        Ok(())
    }

    pub fn set_chain_height(&self, block_height: u64) {
        self.chain_height.store(block_height, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubscriptionSource for InMemorySubscriptionSource {
    async fn latest_block_height(&self) -> Result<u64, ObserverError> {
        Ok(self.chain_height.load(Ordering::SeqCst))
    }

    async fn subscriptions_below(
        &self,
        block_height: u64,
    ) -> Result<Vec<Subscription>, ObserverError> {
        let subscriptions = self.subscriptions.read().await;
        let mut due: Vec<Subscription> = subscriptions
            .values()
            .filter(|s| s.block_height < block_height)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(due)
    }
}
