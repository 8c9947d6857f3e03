//! Pool registry - one buffer pool per worker, visited as a whole on reset

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::RwLock;

use crate::pool::{BufferPool, PoolStats};

/// Explicit worker identity for callers that do not want thread-keyed pools
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkerToken(u64);

impl WorkerToken {
    /// Allocate a fresh, process-unique token
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw token value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WorkerToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Key identifying the owner of a pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolKey {
    /// Pool owned by an OS thread
    Thread(ThreadId),
    /// Pool owned by an explicit worker context
    Worker(WorkerToken),
}

impl PoolKey {
    /// Key for the calling thread
    pub fn current_thread() -> Self {
        PoolKey::Thread(thread::current().id())
    }
}

/// Registry of every pool created for a given element type
///
/// Lookups take a shared lock; only the first access from a new worker takes the
/// exclusive lock to register its pool.
pub struct PoolRegistry<T> {
    pools: RwLock<HashMap<PoolKey, Arc<BufferPool<T>>>>,
}

impl<T: Copy + Default> PoolRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Get the pool for `key`, creating and registering it on first use
    pub fn pool(&self, key: PoolKey) -> Arc<BufferPool<T>> {
        if let Some(pool) = self.pools.read().get(&key) {
            return Arc::clone(pool);
        }
        let mut pools = self.pools.write();
        Arc::clone(pools.entry(key).or_insert_with(|| {
            log::trace!("registering buffer pool for {:?}", key);
            BufferPool::new(key)
        }))
    }

    /// Pool owned by the calling thread
    pub fn current(&self) -> Arc<BufferPool<T>> {
        self.pool(PoolKey::current_thread())
    }
}

impl<T> PoolRegistry<T> {
    /// Number of registered pools
    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    /// Check if no pool has been registered
    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }

    /// Unregister the pool for `key`; buffers it handed out stay valid
    pub fn remove(&self, key: PoolKey) -> bool {
        self.pools.write().remove(&key).is_some()
    }

    /// Clear every registered pool
    ///
    /// Returns the number of buffers that were outstanding across all pools.
    pub fn clear_all(&self) -> usize {
        let pools = self.pools.read();
        let released: usize = pools.values().map(|p| p.clear()).sum();
        log::debug!(
            "cleared {} buffer pools ({} outstanding buffers released)",
            pools.len(),
            released
        );
        released
    }

    /// Total outstanding buffers across all pools
    pub fn outstanding(&self) -> usize {
        self.pools.read().values().map(|p| p.outstanding()).sum()
    }

    /// Per-pool statistics
    pub fn stats(&self) -> Vec<(PoolKey, PoolStats)> {
        self.pools
            .read()
            .iter()
            .map(|(key, pool)| (*key, pool.stats()))
            .collect()
    }
}

impl<T: Copy + Default> Default for PoolRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
