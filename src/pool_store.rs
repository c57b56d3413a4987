//! Pool State Store (spec.md §4.7): in-memory cache of the most recent
//! reserves per pool, slot-monotonically updated. Exposed for synchronous
//! price recovery of AMM trades that arrive without their own reserves.
//!
//! Per spec.md §5's shared-state table, this is owned by a single task and
//! protected by one short-held `tokio::sync::RwLock` — no cross-component
//! locks, and writers never hold the lock across an await point.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::models::PoolState;

#[derive(Clone)]
pub struct PoolStateStore {
    inner: Arc<RwLock<HashMap<String, PoolState>>>,
}

impl PoolStateStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or replace the cached state for a pool, but only if `state`'s
    /// slot is strictly greater than whatever is already cached (spec.md
    /// §4.7: "never overwrite with a lower slot"). Returns `true` if the
    /// cache was updated.
    pub async fn upsert(&self, state: PoolState) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get(&state.pool_address) {
            Some(current) if !state.supersedes(current) => false,
            _ => {
                guard.insert(state.pool_address.clone(), state);
                true
            }
        }
    }

    /// A consistent snapshot read of the latest cached state for a pool.
    pub async fn get(&self, pool_address: &str) -> Option<PoolState> {
        self.inner.read().await.get(pool_address).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for PoolStateStore {
    fn default() -> Self {
        Self::new()
    }
}
