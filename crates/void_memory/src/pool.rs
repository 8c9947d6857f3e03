//! Buffer pool - recycled scratch buffers for transient geometry
//!
//! A pool hands out [`PooledBuffer`]s and takes them back when they drop. Clearing
//! a pool bumps its epoch: buffers handed out before the clear stay valid for their
//! holders, but they no longer count as outstanding and are freed instead of
//! recycled when they come back.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::registry::PoolKey;

/// Pool of reusable `Vec<T>` buffers owned by a single worker
pub struct BufferPool<T> {
    key: PoolKey,
    free: Mutex<Vec<Vec<T>>>,
    epoch: AtomicU64,
    outstanding: AtomicUsize,
    outstanding_elements: AtomicUsize,
    total_takes: AtomicUsize,
    reused: AtomicUsize,
}

impl<T: Copy + Default> BufferPool<T> {
    /// Create an empty pool for the given owner
    pub fn new(key: PoolKey) -> Arc<Self> {
        Arc::new(Self {
            key,
            free: Mutex::new(Vec::new()),
            epoch: AtomicU64::new(0),
            outstanding: AtomicUsize::new(0),
            outstanding_elements: AtomicUsize::new(0),
            total_takes: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        })
    }

    /// Take a buffer of exactly `len` default-initialized elements
    pub fn take(self: &Arc<Self>, len: usize) -> PooledBuffer<T> {
        let recycled = {
            let mut free = self.free.lock();
            free.iter()
                .position(|buf| buf.capacity() >= len)
                .map(|i| free.swap_remove(i))
        };

        let data = match recycled {
            Some(mut buf) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                buf.clear();
                buf.resize(len, T::default());
                buf
            }
            None => vec![T::default(); len],
        };

        self.total_takes.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.outstanding_elements.fetch_add(len, Ordering::AcqRel);

        PooledBuffer {
            data,
            pool: Arc::downgrade(self),
            epoch: self.epoch.load(Ordering::Acquire),
        }
    }
}

impl<T> BufferPool<T> {
    /// Owner of this pool
    pub fn key(&self) -> PoolKey {
        self.key
    }

    /// Forget every outstanding buffer and drop the recycled ones
    ///
    /// Returns how many buffers were outstanding at the time of the clear.
    pub fn clear(&self) -> usize {
        let mut free = self.free.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        free.clear();
        self.outstanding_elements.store(0, Ordering::Release);
        self.outstanding.swap(0, Ordering::AcqRel)
    }

    /// Number of buffers handed out and not yet returned
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Get statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            outstanding_buffers: self.outstanding(),
            outstanding_elements: self.outstanding_elements.load(Ordering::Acquire),
            free_buffers: self.free.lock().len(),
            total_takes: self.total_takes.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            epoch: self.epoch.load(Ordering::Acquire),
        }
    }

    fn give_back(&self, data: Vec<T>, epoch: u64) {
        let mut free = self.free.lock();
        // A clear happened while this buffer was out; it is no longer ours.
        if self.epoch.load(Ordering::Acquire) != epoch {
            return;
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.outstanding_elements.fetch_sub(data.len(), Ordering::AcqRel);
        free.push(data);
    }
}

impl<T> fmt::Debug for BufferPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("key", &self.key)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Pool statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub outstanding_buffers: usize,
    pub outstanding_elements: usize,
    pub free_buffers: usize,
    pub total_takes: usize,
    pub reused: usize,
    pub epoch: u64,
}

/// A buffer borrowed from a [`BufferPool`], returned to it on drop
pub struct PooledBuffer<T> {
    data: Vec<T>,
    pool: Weak<BufferPool<T>>,
    epoch: u64,
}

impl<T> PooledBuffer<T> {
    /// Wrap a plain vector that belongs to no pool
    pub fn unpooled(data: Vec<T>) -> Self {
        Self {
            data,
            pool: Weak::new(),
            epoch: 0,
        }
    }

    /// Owner of the pool this buffer came from, if it is still alive
    pub fn pool_key(&self) -> Option<PoolKey> {
        self.pool.upgrade().map(|p| p.key())
    }

    /// Return the buffer to its pool now
    pub fn release(self) {}

    /// Detach from the pool and keep the storage
    pub fn into_vec(mut self) -> Vec<T> {
        let data = std::mem::take(&mut self.data);
        if let Some(pool) = std::mem::take(&mut self.pool).upgrade() {
            if pool.epoch.load(Ordering::Acquire) == self.epoch {
                pool.outstanding.fetch_sub(1, Ordering::AcqRel);
                pool.outstanding_elements.fetch_sub(data.len(), Ordering::AcqRel);
            }
        }
        data
    }
}

impl<T> Deref for PooledBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for PooledBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> Drop for PooledBuffer<T> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.give_back(std::mem::take(&mut self.data), self.epoch);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PooledBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .field("epoch", &self.epoch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkerToken;

    fn pool() -> Arc<BufferPool<u32>> {
        BufferPool::new(PoolKey::Worker(WorkerToken::new()))
    }

    #[test]
    fn test_take_and_return() {
        let pool = pool();
        let a = pool.take(8);
        let b = pool.take(4);
        assert_eq!(a.len(), 8);
        assert_eq!(pool.outstanding(), 2);
        assert_eq!(pool.stats().outstanding_elements, 12);

        drop(a);
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(pool.stats().free_buffers, 1);

        b.release();
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_recycles_large_enough_buffer() {
        let pool = pool();
        drop(pool.take(64));

        let mut reused = pool.take(16);
        assert!(reused.iter().all(|v| *v == 0));
        reused[0] = 7;
        assert_eq!(pool.stats().reused, 1);
        assert_eq!(pool.stats().free_buffers, 0);
    }

    #[test]
    fn test_clear_forgets_outstanding() {
        let pool = pool();
        let held = pool.take(10);
        assert_eq!(pool.clear(), 1);
        assert_eq!(pool.outstanding(), 0);

        // Still readable by its holder, and not double-counted on return.
        assert_eq!(held.len(), 10);
        drop(held);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.stats().free_buffers, 0);
        assert_eq!(pool.stats().epoch, 1);
    }

    #[test]
    fn test_into_vec_detaches() {
        let pool = pool();
        let buf = pool.take(3);
        let v = buf.into_vec();
        assert_eq!(v.len(), 3);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.stats().free_buffers, 0);
    }
}
