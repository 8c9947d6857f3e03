//! Backend world - the Rapier state driven by the simulation context

use std::num::NonZeroUsize;

use rapier3d::prelude as rapier;
use rayon::prelude::*;

use crate::body::RigidBodyComponent;
use crate::collider::StaticColliderComponent;
use crate::config::PhysicsConfig;
use crate::error::Result;
use crate::math::{from_vector, to_vector};
use crate::registry::{
    body_handle, rapier_body_handle, rapier_collider_handle, static_handle, BodyHandle,
    BodyRegistry, Collidable, StaticHandle,
};

/// All mutable Rapier state
///
/// Lives behind the simulation's dynamics mutex. Topology changes happen only
/// while the world lock is held for writing.
pub(crate) struct PhysicsWorld {
    /// Rapier physics pipeline
    pipeline: rapier::PhysicsPipeline,

    /// Integration parameters
    integration_params: rapier::IntegrationParameters,

    /// Island manager
    islands: rapier::IslandManager,

    /// Broad phase
    broad_phase: rapier::DefaultBroadPhase,

    /// Narrow phase
    narrow_phase: rapier::NarrowPhase,

    /// Impulse joint set
    impulse_joints: rapier::ImpulseJointSet,

    /// Multibody joint set
    multibody_joints: rapier::MultibodyJointSet,

    /// CCD solver
    ccd_solver: rapier::CCDSolver,

    /// Rigid body set
    bodies: rapier::RigidBodySet,

    /// Collider set
    colliders: rapier::ColliderSet,

    /// Whether inserted bodies may fall asleep
    sleeping_enabled: bool,
}

impl PhysicsWorld {
    /// Create an empty world
    pub(crate) fn new(config: &PhysicsConfig) -> Self {
        let mut integration_params = rapier::IntegrationParameters::default();
        integration_params.dt = config.timestep;
        integration_params.num_solver_iterations =
            NonZeroUsize::new(config.solver_iterations).unwrap_or(NonZeroUsize::MIN);

        Self {
            pipeline: rapier::PhysicsPipeline::new(),
            integration_params,
            islands: rapier::IslandManager::new(),
            broad_phase: rapier::DefaultBroadPhase::new(),
            narrow_phase: rapier::NarrowPhase::new(),
            impulse_joints: rapier::ImpulseJointSet::new(),
            multibody_joints: rapier::MultibodyJointSet::new(),
            ccd_solver: rapier::CCDSolver::new(),
            bodies: rapier::RigidBodySet::new(),
            colliders: rapier::ColliderSet::new(),
            sleeping_enabled: config.sleeping_enabled,
        }
    }

    // ==================== Topology ====================

    /// Insert a body and its collider, returning the mirrored handle
    pub(crate) fn insert_body(&mut self, body: &RigidBodyComponent) -> Result<BodyHandle> {
        let (rigid_body, collider) = body.to_rapier(self.sleeping_enabled)?;
        let raw = self.bodies.insert(rigid_body);
        let handle = body_handle(raw);

        let collider = collider.user_data(Collidable::Body(handle).to_user_data());
        self.colliders
            .insert_with_parent(collider, raw, &mut self.bodies);

        if let Some(rigid_body) = self.bodies.get_mut(raw) {
            body.apply_commands(rigid_body);
            body.publish_state(rigid_body);
        }
        Ok(handle)
    }

    /// Remove a body and its collider; false if it was already gone
    pub(crate) fn remove_body(&mut self, handle: BodyHandle) -> bool {
        self.bodies
            .remove(
                rapier_body_handle(handle),
                &mut self.islands,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .is_some()
    }

    /// Insert a parentless collider, returning the mirrored handle
    pub(crate) fn insert_static(&mut self, collider: &StaticColliderComponent) -> Result<StaticHandle> {
        let raw = self.colliders.insert(collider.to_rapier()?);
        let handle = static_handle(raw);
        if let Some(inserted) = self.colliders.get_mut(raw) {
            inserted.user_data = Collidable::Static(handle).to_user_data();
        }
        Ok(handle)
    }

    /// Remove a static collider; false if it was already gone
    pub(crate) fn remove_static(&mut self, handle: StaticHandle) -> bool {
        self.colliders
            .remove(
                rapier_collider_handle(handle),
                &mut self.islands,
                &mut self.bodies,
                true,
            )
            .is_some()
    }

    // ==================== Simulation ====================

    /// Apply queued pose, velocity and impulse requests
    pub(crate) fn apply_body_commands(&mut self, registry: &BodyRegistry) {
        for (handle, body) in registry.bodies() {
            if let Some(rigid_body) = self.bodies.get_mut(rapier_body_handle(handle)) {
                body.apply_commands(rigid_body);
            }
        }
    }

    /// Gravity, damping and speed caps for every awake dynamic body
    ///
    /// New velocities are computed in parallel on `dispatcher`, then written back.
    pub(crate) fn integrate_velocities(
        &mut self,
        registry: &BodyRegistry,
        gravity: [f32; 3],
        dt: f32,
        dispatcher: &rayon::ThreadPool,
    ) {
        let bodies = &self.bodies;
        let active = self.islands.active_dynamic_bodies();
        let updates: Vec<_> = dispatcher.install(|| {
            active
                .par_iter()
                .filter_map(|&raw| {
                    let rigid_body = bodies.get(raw)?;
                    if !rigid_body.is_dynamic() {
                        return None;
                    }
                    let body = registry.body(body_handle(raw))?;
                    let velocities = body.settings().integrate(
                        from_vector(rigid_body.linvel()),
                        from_vector(rigid_body.angvel()),
                        gravity,
                        dt,
                    );
                    Some((raw, velocities))
                })
                .collect()
        });

        for (raw, (linear, angular)) in updates {
            if let Some(rigid_body) = self.bodies.get_mut(raw) {
                rigid_body.set_linvel(to_vector(linear), false);
                rigid_body.set_angvel(to_vector(angular), false);
            }
        }
    }

    /// Advance the backend by one substep
    ///
    /// Gravity is zero here; it has already been folded into the velocities.
    pub(crate) fn step(&mut self, dt: f32, hooks: &dyn rapier::PhysicsHooks) {
        self.integration_params.dt = dt;
        self.pipeline.step(
            &rapier::Vector::zeros(),
            &self.integration_params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            hooks,
            &(),
        );
    }

    /// Copy backend poses and velocities into every body's cache
    pub(crate) fn publish_states(&self, registry: &BodyRegistry) {
        for (handle, body) in registry.bodies() {
            if let Some(rigid_body) = self.bodies.get(rapier_body_handle(handle)) {
                body.publish_state(rigid_body);
            }
        }
    }

    /// Copy of the colliders with a fresh acceleration structure, for queries
    pub(crate) fn snapshot(&self) -> QueryScene {
        let colliders = self.colliders.clone();
        let mut pipeline = rapier::QueryPipeline::new();
        pipeline.update(&colliders);
        QueryScene {
            bodies: rapier::RigidBodySet::new(),
            colliders,
            pipeline,
        }
    }

    /// Bring a published scene up to date after a step
    ///
    /// Moved colliders are refit in place. A scene whose collider set no
    /// longer matches the backend is replaced by a fresh snapshot. Returns
    /// the number of colliders republished.
    pub(crate) fn refresh_scene(&self, scene: &mut QueryScene) -> usize {
        if scene.colliders.len() != self.colliders.len() {
            *scene = self.snapshot();
            return self.colliders.len();
        }

        let mut moved = Vec::new();
        for (handle, collider) in self.colliders.iter() {
            let Some(published) = scene.colliders.get(handle) else {
                *scene = self.snapshot();
                return self.colliders.len();
            };
            if published.position() != collider.position() {
                moved.push(handle);
            }
        }

        for &handle in &moved {
            if let (Some(published), Some(collider)) =
                (scene.colliders.get_mut(handle), self.colliders.get(handle))
            {
                published.set_position(*collider.position());
            }
        }
        if !moved.is_empty() {
            scene
                .pipeline
                .update_incremental(&scene.colliders, &moved, &[], true);
        }
        moved.len()
    }

    // ==================== Debug ====================

    /// Get number of rigid bodies
    pub(crate) fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Get number of colliders
    pub(crate) fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    /// Get number of active (awake) bodies
    pub(crate) fn active_body_count(&self) -> usize {
        self.islands.active_dynamic_bodies().len()
    }
}

/// What queries traverse: collider copies plus their acceleration structure
///
/// Guarded by the broadphase mutex and republished after every step and flush.
/// `bodies` stays empty; query filters never consult it.
pub(crate) struct QueryScene {
    pub(crate) bodies: rapier::RigidBodySet,
    pub(crate) colliders: rapier::ColliderSet,
    pub(crate) pipeline: rapier::QueryPipeline,
}

impl Default for QueryScene {
    fn default() -> Self {
        Self {
            bodies: rapier::RigidBodySet::new(),
            colliders: rapier::ColliderSet::new(),
            pipeline: rapier::QueryPipeline::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyDesc;
    use crate::collider::StaticDesc;
    use crate::shape::ConvexShape;

    #[test]
    fn test_create_world() {
        let world = PhysicsWorld::new(&PhysicsConfig::default());
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.collider_count(), 0);
    }

    #[test]
    fn test_insert_and_remove_mirror_handles() {
        let mut world = PhysicsWorld::new(&PhysicsConfig::default());
        let body = RigidBodyComponent::new(BodyDesc::convex(ConvexShape::sphere(1.0))).unwrap();
        let ground =
            StaticColliderComponent::new(StaticDesc::convex(ConvexShape::cuboid(5.0, 0.5, 5.0)))
                .unwrap();

        let b = world.insert_body(&body).unwrap();
        let s = world.insert_static(&ground).unwrap();
        assert_eq!(world.body_count(), 1);
        assert_eq!(world.collider_count(), 2);

        assert!(world.remove_body(b));
        assert!(!world.remove_body(b));
        assert!(world.remove_static(s));
        assert_eq!(world.collider_count(), 0);
    }

    #[test]
    fn test_snapshot_tags_colliders() {
        let mut world = PhysicsWorld::new(&PhysicsConfig::default());
        let ground =
            StaticColliderComponent::new(StaticDesc::convex(ConvexShape::sphere(1.0))).unwrap();
        let handle = world.insert_static(&ground).unwrap();

        let scene = world.snapshot();
        let owners: Vec<_> = scene
            .colliders
            .iter()
            .filter_map(|(_, c)| Collidable::of_collider(c))
            .collect();
        assert_eq!(owners, vec![Collidable::Static(handle)]);
    }

    #[test]
    fn test_refresh_scene_refits_moved_colliders() {
        let mut world = PhysicsWorld::new(&PhysicsConfig::default());
        let body = RigidBodyComponent::new(
            BodyDesc::convex(ConvexShape::sphere(0.5)).with_velocity([6.0, 0.0, 0.0]),
        )
        .unwrap();
        let ground = StaticColliderComponent::new(
            StaticDesc::convex(ConvexShape::cuboid(5.0, 0.5, 5.0)).at([0.0, -5.0, 0.0]),
        )
        .unwrap();
        world.insert_body(&body).unwrap();
        world.insert_static(&ground).unwrap();

        let mut scene = world.snapshot();
        assert_eq!(world.refresh_scene(&mut scene), 0);

        world.step(0.5, &());
        assert_eq!(world.refresh_scene(&mut scene), 1);
        for (handle, collider) in world.colliders.iter() {
            let published = scene.colliders.get(handle).map(|c| *c.position());
            assert_eq!(published, Some(*collider.position()));
        }

        // The refit tree finds the sphere where it moved to
        let ray = rapier::Ray::new(
            rapier::Point::new(3.0, 5.0, 0.0),
            rapier::Vector::new(0.0, -1.0, 0.0),
        );
        let hit = scene.pipeline.cast_ray(
            &scene.bodies,
            &scene.colliders,
            &ray,
            5.0,
            true,
            rapier::QueryFilter::default(),
        );
        assert!(hit.is_some());
        let missed = rapier::Ray::new(
            rapier::Point::new(0.0, 5.0, 0.0),
            rapier::Vector::new(0.0, -1.0, 0.0),
        );
        let stale = scene.pipeline.cast_ray(
            &scene.bodies,
            &scene.colliders,
            &missed,
            5.0,
            true,
            rapier::QueryFilter::default(),
        );
        assert!(stale.is_none());
    }

    #[test]
    fn test_refresh_scene_republishes_after_insert() {
        let mut world = PhysicsWorld::new(&PhysicsConfig::default());
        let mut scene = world.snapshot();
        let ground =
            StaticColliderComponent::new(StaticDesc::convex(ConvexShape::sphere(1.0))).unwrap();
        world.insert_static(&ground).unwrap();

        assert_eq!(world.refresh_scene(&mut scene), 1);
        assert_eq!(scene.colliders.len(), 1);
        assert_eq!(world.refresh_scene(&mut scene), 0);
    }
}
