//! Static colliders

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rapier3d::prelude as rapier;
use void_memory::PoolRegistry;

use crate::error::{PhysicsError, Result};
use crate::material::PhysicsMaterial;
use crate::math::Pose;
use crate::mesh::{split_mesh, MeshGeometry};
use crate::policy::{CollidableInfo, CollisionFilter, Mobility};
use crate::registry::{next_object_id, Collidable, StaticHandle};
use crate::shape::{ConvexShape, Shape, Triangle};

/// Description for creating a static collider
#[derive(Debug, Clone)]
pub struct StaticDesc {
    pub shape: Arc<Shape>,
    pub pose: Pose,
    pub filter: CollisionFilter,
    pub material: PhysicsMaterial,
    /// Drop the shape reference when the collider is flushed out
    pub dispose_mesh_on_detach: bool,
    /// Opaque owner data
    pub user_data: u128,
}

impl StaticDesc {
    pub fn new(shape: Arc<Shape>) -> Self {
        Self {
            shape,
            pose: Pose::IDENTITY,
            filter: CollisionFilter::default(),
            material: PhysicsMaterial::default(),
            dispose_mesh_on_detach: false,
            user_data: 0,
        }
    }

    pub fn convex(shape: ConvexShape) -> Self {
        Self::new(Arc::new(Shape::Convex(shape)))
    }

    pub fn at(mut self, position: [f32; 3]) -> Self {
        self.pose.position = position;
        self
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }

    pub fn with_filter(mut self, filter: CollisionFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_material(mut self, material: PhysicsMaterial) -> Self {
        self.material = material;
        self
    }

    pub fn dispose_mesh_on_detach(mut self) -> Self {
        self.dispose_mesh_on_detach = true;
        self
    }

    pub fn with_user_data(mut self, user_data: u128) -> Self {
        self.user_data = user_data;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.shape.sanity_check()?;
        let pose = self.pose.position.iter().chain(&self.pose.rotation);
        if pose.into_iter().any(|v| !v.is_finite()) {
            return Err(PhysicsError::InvalidBody("static pose must be finite".into()));
        }
        Ok(())
    }
}

/// An immobile collider owned by a scene entity
pub struct StaticColliderComponent {
    id: u64,
    shape: RwLock<Option<Arc<Shape>>>,
    pose: Pose,
    filter: RwLock<CollisionFilter>,
    material: RwLock<PhysicsMaterial>,
    handle: AtomicU64,
    dispose_mesh_on_detach: bool,
    user_data: u128,
}

impl StaticColliderComponent {
    /// Validate `desc` and create the component
    pub fn new(desc: StaticDesc) -> Result<Arc<Self>> {
        desc.validate()?;
        Ok(Arc::new(Self {
            id: next_object_id(),
            shape: RwLock::new(Some(desc.shape)),
            pose: desc.pose,
            filter: RwLock::new(desc.filter),
            material: RwLock::new(desc.material),
            handle: AtomicU64::new(StaticHandle::null().to_bits()),
            dispose_mesh_on_detach: desc.dispose_mesh_on_detach,
            user_data: desc.user_data,
        }))
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn handle(&self) -> Option<StaticHandle> {
        let handle = StaticHandle::from_bits(self.handle.load(Ordering::Acquire));
        (!handle.is_null()).then_some(handle)
    }

    pub fn is_live(&self) -> bool {
        self.handle().is_some()
    }

    pub fn collidable(&self) -> Option<Collidable> {
        self.handle().map(Collidable::Static)
    }

    pub(crate) fn set_handle(&self, handle: Option<StaticHandle>) {
        let bits = handle.unwrap_or_else(StaticHandle::null).to_bits();
        self.handle.store(bits, Ordering::Release);
    }

    pub fn shape(&self) -> Option<Arc<Shape>> {
        self.shape.read().clone()
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn filter(&self) -> CollisionFilter {
        *self.filter.read()
    }

    pub fn set_filter(&self, filter: CollisionFilter) {
        *self.filter.write() = filter;
    }

    pub fn material(&self) -> PhysicsMaterial {
        *self.material.read()
    }

    pub fn set_material(&self, material: PhysicsMaterial) {
        *self.material.write() = material;
    }

    pub fn user_data(&self) -> u128 {
        self.user_data
    }

    pub(crate) fn info(&self) -> CollidableInfo {
        CollidableInfo {
            mobility: Mobility::Static,
            filter: self.filter(),
            material: self.material(),
            ghost: false,
            collect_contacts: false,
        }
    }

    /// Backend collider for insertion
    pub(crate) fn to_rapier(&self) -> Result<rapier::ColliderBuilder> {
        let shape = self
            .shape()
            .ok_or_else(|| PhysicsError::InvalidShape("static shape was disposed".into()))?;
        let material = self.material();
        Ok(rapier::ColliderBuilder::new(shape.to_shared_shape()?)
            .position(self.pose.to_isometry())
            .friction(material.friction)
            .restitution(material.restitution)
            .active_hooks(
                rapier::ActiveHooks::FILTER_CONTACT_PAIRS
                    | rapier::ActiveHooks::MODIFY_SOLVER_CONTACTS,
            ))
    }

    pub(crate) fn detach(&self, dispose: bool) {
        self.set_handle(None);
        if dispose || self.dispose_mesh_on_detach {
            self.shape.write().take();
        }
    }
}

impl std::fmt::Debug for StaticColliderComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticColliderComponent")
            .field("id", &self.id)
            .field("handle", &self.handle())
            .field("pose", &self.pose)
            .finish()
    }
}

/// Split a large mesh into several static colliders built in parallel
///
/// Each part gets a copy of `template`'s pose, filter and material and disposes
/// its triangles when it is flushed out.
pub fn build_big_mesh_statics(
    pools: &PoolRegistry<Triangle>,
    geometry: &MeshGeometry,
    scale: [f32; 3],
    template: &StaticDesc,
) -> Result<Vec<Arc<StaticColliderComponent>>> {
    let parts = rayon::current_num_threads();
    split_mesh(pools, geometry, scale, parts)?
        .into_iter()
        .map(|mesh| {
            StaticColliderComponent::new(StaticDesc {
                shape: Arc::new(Shape::Mesh(mesh)),
                dispose_mesh_on_detach: true,
                ..template.clone()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_shape() {
        assert!(StaticColliderComponent::new(StaticDesc::convex(ConvexShape::sphere(0.0))).is_err());
        let ok = StaticColliderComponent::new(StaticDesc::convex(ConvexShape::sphere(1.0))).unwrap();
        assert!(!ok.is_live());
        assert_eq!(ok.info().mobility, Mobility::Static);
    }

    #[test]
    fn test_big_mesh_statics_cover_mesh() {
        let pools = PoolRegistry::new();
        let mut positions = Vec::new();
        let mut indices = Vec::new();
        for i in 0..64u32 {
            let x = i as f32;
            positions.extend([[x, 0.0, 0.0], [x + 1.0, 0.0, 0.0], [x, 0.0, 1.0]]);
            indices.extend([i * 3, i * 3 + 1, i * 3 + 2]);
        }
        let geometry = MeshGeometry::new(positions, indices);
        let template = StaticDesc::convex(ConvexShape::sphere(1.0)).at([0.0, -1.0, 0.0]);
        let statics = build_big_mesh_statics(&pools, &geometry, [1.0; 3], &template).unwrap();

        let total: usize = statics
            .iter()
            .map(|s| s.shape().and_then(|shape| shape.as_mesh().map(|m| m.triangle_count())).unwrap_or(0))
            .sum();
        assert_eq!(total, 64);
        assert!(statics.iter().all(|s| s.pose().position == [0.0, -1.0, 0.0]));

        for s in &statics {
            s.detach(false);
        }
        drop(statics);
        assert_eq!(pools.outstanding(), 0);
    }
}
