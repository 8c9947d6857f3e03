//! # void_memory - Worker Buffer Pools
//!
//! Recycled scratch buffers for transient data such as mesh triangle arrays:
//! - Pool: per-worker free list of `Vec<T>` buffers, returned on drop
//! - Registry: keyed lookup of every worker's pool so a reset can clear them all

pub mod pool;
pub mod registry;

pub use pool::{BufferPool, PoolStats, PooledBuffer};
pub use registry::{PoolKey, PoolRegistry, WorkerToken};

pub mod prelude {
    pub use crate::{BufferPool, PoolKey, PoolRegistry, PoolStats, PooledBuffer, WorkerToken};
}
