//! Deferred add/remove requests, applied at safe points
//!
//! Requests only touch the pending sets. Flushes run while the world lock is held
//! for writing, so no step or query ever observes a half-applied batch.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::body::RigidBodyComponent;
use crate::collider::StaticColliderComponent;
use crate::error::{PhysicsError, Result};
use crate::registry::BodyRegistry;
use crate::world::PhysicsWorld;

/// Anything that can be added to or removed from the simulation
#[derive(Debug, Clone)]
pub enum PhysicsObject {
    Body(Arc<RigidBodyComponent>),
    Static(Arc<StaticColliderComponent>),
}

impl PhysicsObject {
    fn id(&self) -> u64 {
        match self {
            PhysicsObject::Body(body) => body.id(),
            PhysicsObject::Static(collider) => collider.id(),
        }
    }

    /// Whether the object currently has a live handle
    pub fn is_live(&self) -> bool {
        match self {
            PhysicsObject::Body(body) => body.is_live(),
            PhysicsObject::Static(collider) => collider.is_live(),
        }
    }

    /// Reject objects whose shape can no longer back a collider
    pub(crate) fn validate(&self) -> Result<()> {
        let shape = match self {
            PhysicsObject::Body(body) => body.shape(),
            PhysicsObject::Static(collider) => collider.shape(),
        };
        match shape {
            Some(shape) => shape.sanity_check(),
            None => Err(PhysicsError::InvalidShape("shape was disposed".into())),
        }
    }
}

impl From<Arc<RigidBodyComponent>> for PhysicsObject {
    fn from(body: Arc<RigidBodyComponent>) -> Self {
        PhysicsObject::Body(body)
    }
}

impl From<Arc<StaticColliderComponent>> for PhysicsObject {
    fn from(collider: Arc<StaticColliderComponent>) -> Self {
        PhysicsObject::Static(collider)
    }
}

/// Outcome of one flush
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Objects that became live or were taken out
    pub applied: usize,
    /// Objects already in the requested state
    pub skipped: usize,
    /// Entries that failed and were dropped from the batch
    pub failures: Vec<(PhysicsObject, PhysicsError)>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Pending add and remove sets, deduplicated by object identity
#[derive(Debug, Default)]
pub(crate) struct PendingMutations {
    adds: BTreeMap<u64, PhysicsObject>,
    removes: BTreeMap<u64, PhysicsObject>,
}

impl PendingMutations {
    /// Queue an add; a pending remove of the same object is cancelled
    pub(crate) fn request_add(&mut self, object: PhysicsObject) {
        let id = object.id();
        self.removes.remove(&id);
        self.adds.insert(id, object);
    }

    /// Queue a remove; a pending add of the same object is cancelled
    pub(crate) fn request_remove(&mut self, object: PhysicsObject) {
        let id = object.id();
        self.adds.remove(&id);
        self.removes.insert(id, object);
    }

    pub(crate) fn pending_adds(&self) -> usize {
        self.adds.len()
    }

    pub(crate) fn pending_removes(&self) -> usize {
        self.removes.len()
    }

    pub(crate) fn take_adds(&mut self) -> Vec<PhysicsObject> {
        std::mem::take(&mut self.adds).into_values().collect()
    }

    pub(crate) fn take_removes(&mut self) -> Vec<PhysicsObject> {
        std::mem::take(&mut self.removes).into_values().collect()
    }
}

/// Insert every object into the backend and the registry
pub(crate) fn flush_adds(
    objects: Vec<PhysicsObject>,
    world: &mut PhysicsWorld,
    registry: &mut BodyRegistry,
) -> FlushReport {
    let mut report = FlushReport::default();
    for object in objects {
        if object.is_live() {
            report.skipped += 1;
            continue;
        }
        let inserted = match &object {
            PhysicsObject::Body(body) => world.insert_body(body).map(|handle| {
                body.set_handle(Some(handle));
                registry.insert_body(handle, body.clone());
                log::trace!("added body {:?}", handle);
            }),
            PhysicsObject::Static(collider) => world.insert_static(collider).map(|handle| {
                collider.set_handle(Some(handle));
                registry.insert_static(handle, collider.clone());
                log::trace!("added static {:?}", handle);
            }),
        };
        match inserted {
            Ok(()) => report.applied += 1,
            Err(err) => {
                log::warn!("rejected physics object during flush: {}", err);
                report.failures.push((object, err));
            }
        }
    }
    report
}

/// Take every object out of the backend and the registry
pub(crate) fn flush_removes(
    objects: Vec<PhysicsObject>,
    world: &mut PhysicsWorld,
    registry: &mut BodyRegistry,
) -> FlushReport {
    let mut report = FlushReport::default();
    for object in objects {
        match &object {
            PhysicsObject::Body(body) => {
                let Some(handle) = body.handle() else {
                    report.skipped += 1;
                    continue;
                };
                registry.remove_body(handle);
                world.remove_body(handle);
                body.detach(false);
                log::trace!("removed body {:?}", handle);
            }
            PhysicsObject::Static(collider) => {
                let Some(handle) = collider.handle() else {
                    report.skipped += 1;
                    continue;
                };
                registry.remove_static(handle);
                world.remove_static(handle);
                collider.detach(false);
                log::trace!("removed static {:?}", handle);
            }
        }
        report.applied += 1;
    }
    report
}
