//! # void_core - Void Engine Core
//!
//! Zero-dependency core primitives shared by the engine crates.
//!
//! - **Handles**: generational slot references that detect use-after-remove
//! - **Handle tables**: growable handle-indexed storage mirroring externally
//!   assigned slot indices

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std as alloc;

pub mod handle;

pub use handle::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::handle::{Handle, HandleTable};
}
