//! Body registry - handle-indexed lookup of live bodies and statics
//!
//! Handles mirror the backend's slot indices: a [`BodyHandle`] carries the raw parts
//! of the Rapier rigid-body handle, a [`StaticHandle`] those of the Rapier collider
//! handle. Every backend collider stores its owner as a packed [`Collidable`] in its
//! user data, so a collider resolves to its component with two table lookups.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rapier3d::prelude as rapier;
use void_core::{Handle, HandleTable};

use crate::body::RigidBodyComponent;
use crate::collider::StaticColliderComponent;
use crate::contact::ContactBuffer;
use crate::policy::CollidableInfo;

/// Handle to a live dynamic or kinematic body
pub type BodyHandle = Handle<RigidBodyComponent>;

/// Handle to a live static collider
pub type StaticHandle = Handle<StaticColliderComponent>;

const BODY_TAG: u128 = 1;
const STATIC_TAG: u128 = 2;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity used to deduplicate pending mutations
pub(crate) fn next_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Reference to anything that owns a backend collider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collidable {
    Body(BodyHandle),
    Static(StaticHandle),
}

impl Collidable {
    pub fn as_body(&self) -> Option<BodyHandle> {
        match self {
            Collidable::Body(handle) => Some(*handle),
            Collidable::Static(_) => None,
        }
    }

    pub fn as_static(&self) -> Option<StaticHandle> {
        match self {
            Collidable::Static(handle) => Some(*handle),
            Collidable::Body(_) => None,
        }
    }

    pub fn is_body(&self) -> bool {
        matches!(self, Collidable::Body(_))
    }

    /// Pack into a collider's user data
    pub(crate) fn to_user_data(self) -> u128 {
        match self {
            Collidable::Body(handle) => BODY_TAG << 64 | handle.to_bits() as u128,
            Collidable::Static(handle) => STATIC_TAG << 64 | handle.to_bits() as u128,
        }
    }

    /// Unpack from a collider's user data
    pub(crate) fn from_user_data(data: u128) -> Option<Self> {
        let bits = data as u64;
        match data >> 64 {
            BODY_TAG => Some(Collidable::Body(Handle::from_bits(bits))),
            STATIC_TAG => Some(Collidable::Static(Handle::from_bits(bits))),
            _ => None,
        }
    }

    pub(crate) fn of_collider(collider: &rapier::Collider) -> Option<Self> {
        Self::from_user_data(collider.user_data)
    }
}

pub(crate) fn body_handle(handle: rapier::RigidBodyHandle) -> BodyHandle {
    let (index, generation) = handle.into_raw_parts();
    Handle::new(index, generation)
}

pub(crate) fn rapier_body_handle(handle: BodyHandle) -> rapier::RigidBodyHandle {
    rapier::RigidBodyHandle::from_raw_parts(handle.index(), handle.generation())
}

pub(crate) fn static_handle(handle: rapier::ColliderHandle) -> StaticHandle {
    let (index, generation) = handle.into_raw_parts();
    Handle::new(index, generation)
}

pub(crate) fn rapier_collider_handle(handle: StaticHandle) -> rapier::ColliderHandle {
    rapier::ColliderHandle::from_raw_parts(handle.index(), handle.generation())
}

/// Borrowed owner of a collider
#[derive(Clone, Copy)]
pub enum CollidableRef<'a> {
    Body(&'a Arc<RigidBodyComponent>),
    Static(&'a Arc<StaticColliderComponent>),
}

impl<'a> CollidableRef<'a> {
    pub fn info(&self) -> CollidableInfo {
        match self {
            CollidableRef::Body(body) => body.info(),
            CollidableRef::Static(collider) => collider.info(),
        }
    }

    pub fn group(&self) -> u32 {
        match self {
            CollidableRef::Body(body) => body.settings().filter.group,
            CollidableRef::Static(collider) => collider.filter().group,
        }
    }

    pub fn user_data(&self) -> u128 {
        match self {
            CollidableRef::Body(body) => body.user_data(),
            CollidableRef::Static(collider) => collider.user_data(),
        }
    }

    /// Contact buffer, for collidables that collect contacts
    pub(crate) fn contacts(&self) -> Option<&'a ContactBuffer> {
        match *self {
            CollidableRef::Body(body) => Some(body.contact_buffer()),
            CollidableRef::Static(_) => None,
        }
    }
}

/// Live bodies and statics by handle
#[derive(Default)]
pub struct BodyRegistry {
    bodies: HandleTable<RigidBodyComponent, Arc<RigidBodyComponent>>,
    statics: HandleTable<StaticColliderComponent, Arc<StaticColliderComponent>>,
}

impl BodyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_body(&mut self, handle: BodyHandle, body: Arc<RigidBodyComponent>) {
        if let Some(previous) = self.bodies.insert(handle, body) {
            log::warn!("body slot {} reused while still occupied", handle.index());
            previous.detach(false);
        }
    }

    pub(crate) fn insert_static(
        &mut self,
        handle: StaticHandle,
        collider: Arc<StaticColliderComponent>,
    ) {
        if let Some(previous) = self.statics.insert(handle, collider) {
            log::warn!("static slot {} reused while still occupied", handle.index());
            previous.detach(false);
        }
    }

    pub(crate) fn remove_body(&mut self, handle: BodyHandle) -> Option<Arc<RigidBodyComponent>> {
        self.bodies.remove(handle)
    }

    pub(crate) fn remove_static(
        &mut self,
        handle: StaticHandle,
    ) -> Option<Arc<StaticColliderComponent>> {
        self.statics.remove(handle)
    }

    pub fn body(&self, handle: BodyHandle) -> Option<&Arc<RigidBodyComponent>> {
        self.bodies.get(handle)
    }

    pub fn static_collider(&self, handle: StaticHandle) -> Option<&Arc<StaticColliderComponent>> {
        self.statics.get(handle)
    }

    /// Resolve a collidable to its component
    pub fn resolve(&self, collidable: Collidable) -> Option<CollidableRef<'_>> {
        match collidable {
            Collidable::Body(handle) => self.bodies.get(handle).map(CollidableRef::Body),
            Collidable::Static(handle) => self.statics.get(handle).map(CollidableRef::Static),
        }
    }

    /// Resolve the owner of a backend collider
    pub(crate) fn resolve_collider(
        &self,
        collider: &rapier::Collider,
    ) -> Option<(Collidable, CollidableRef<'_>)> {
        let collidable = Collidable::of_collider(collider)?;
        self.resolve(collidable).map(|owner| (collidable, owner))
    }

    pub fn contains(&self, collidable: Collidable) -> bool {
        self.resolve(collidable).is_some()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn static_count(&self) -> usize {
        self.statics.len()
    }

    /// Number of live handles of either kind
    pub fn len(&self) -> usize {
        self.bodies.len() + self.statics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyHandle, &Arc<RigidBodyComponent>)> {
        self.bodies.iter()
    }

    pub fn statics(&self) -> impl Iterator<Item = (StaticHandle, &Arc<StaticColliderComponent>)> {
        self.statics.iter()
    }

    /// Null every slot and detach every component
    pub(crate) fn clear(&mut self, dispose: bool) -> usize {
        let mut removed = 0;
        for (_, body) in self.bodies.drain() {
            body.detach(dispose);
            removed += 1;
        }
        for (_, collider) in self.statics.drain() {
            collider.detach(dispose);
            removed += 1;
        }
        removed
    }
}

impl std::fmt::Debug for BodyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyRegistry")
            .field("bodies", &self.bodies.len())
            .field("statics", &self.statics.len())
            .finish()
    }
}
