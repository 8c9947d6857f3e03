//! Shared shape storage
//!
//! Shapes stored here are handed out as `Arc<Shape>` so many bodies can share one
//! shape. A mesh's triangle buffer goes back to its pool once the last body using
//! it lets go and the shape has been removed from the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{PhysicsError, Result};
use crate::shape::{Shape, ShapeId};

/// Reference-counted shapes keyed by [`ShapeId`]
#[derive(Debug, Default)]
pub struct ShapeStore {
    next_id: AtomicU64,
    shapes: RwLock<HashMap<ShapeId, Arc<Shape>>>,
}

impl ShapeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and keep `shape` for cloning
    pub fn store(&self, shape: impl Into<Shape>) -> Result<ShapeId> {
        let shape = shape.into();
        shape.sanity_check()?;
        let id = ShapeId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.shapes.write().insert(id, Arc::new(shape));
        log::trace!("stored shape {:?}", id);
        Ok(id)
    }

    /// Shared reference to a stored shape
    pub fn get(&self, id: ShapeId) -> Result<Arc<Shape>> {
        self.shapes
            .read()
            .get(&id)
            .cloned()
            .ok_or(PhysicsError::ShapeNotStored(id))
    }

    /// Forget a stored shape; bodies already using it keep their reference
    pub fn remove(&self, id: ShapeId) -> Option<Arc<Shape>> {
        self.shapes.write().remove(&id)
    }

    pub fn contains(&self, id: ShapeId) -> bool {
        self.shapes.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.shapes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.read().is_empty()
    }

    /// Forget every stored shape
    pub fn clear(&self) -> usize {
        let mut shapes = self.shapes.write();
        let count = shapes.len();
        shapes.clear();
        count
    }
}
