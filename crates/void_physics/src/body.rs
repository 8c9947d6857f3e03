//! Rigid body descriptions and components

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};

use crate::contact::{ContactBuffer, ContactRecord};
use crate::error::{PhysicsError, Result};
use crate::material::PhysicsMaterial;
use crate::math::{from_vector, length_squared, to_vector, Pose};
use crate::policy::{CollidableInfo, CollisionFilter, Mobility};
use crate::registry::{next_object_id, BodyHandle, Collidable};
use crate::shape::{ConvexShape, Shape};

/// Contact capacity for bodies that do not ask for one
pub const DEFAULT_CONTACT_CAPACITY: usize = 8;

/// Per-body settings that may change while the body is live
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodySettings {
    pub filter: CollisionFilter,
    pub material: PhysicsMaterial,
    /// Replaces world gravity for this body
    pub gravity_override: Option<[f32; 3]>,
    /// Fraction of linear velocity removed per second
    pub linear_damping: f32,
    /// Fraction of angular velocity removed per second
    pub angular_damping: f32,
    /// Linear speed cap (0 = uncapped)
    pub max_speed: f32,
    /// Record contacts without a physical response
    pub ghost: bool,
    /// Write contacts to this body's buffer
    pub collect_contacts: bool,
}

impl Default for BodySettings {
    fn default() -> Self {
        Self {
            filter: CollisionFilter::default(),
            material: PhysicsMaterial::default(),
            gravity_override: None,
            linear_damping: 0.0,
            angular_damping: 0.0,
            max_speed: 0.0,
            ghost: false,
            collect_contacts: true,
        }
    }
}

impl BodySettings {
    /// Advance velocities by `dt`: gravity, then damping, then the speed cap
    pub fn integrate(
        &self,
        linear: [f32; 3],
        angular: [f32; 3],
        world_gravity: [f32; 3],
        dt: f32,
    ) -> ([f32; 3], [f32; 3]) {
        let gravity = self.gravity_override.unwrap_or(world_gravity);
        let mut linear = [
            linear[0] + gravity[0] * dt,
            linear[1] + gravity[1] * dt,
            linear[2] + gravity[2] * dt,
        ];
        let mut angular = angular;

        if self.linear_damping > 0.0 {
            let keep = (1.0 - self.linear_damping * dt).max(0.0);
            linear = linear.map(|v| v * keep);
        }
        if self.angular_damping > 0.0 {
            let keep = (1.0 - self.angular_damping * dt).max(0.0);
            angular = angular.map(|v| v * keep);
        }

        let speed_sq = length_squared(linear);
        if self.max_speed > 0.0 && speed_sq > self.max_speed * self.max_speed {
            let scale = self.max_speed / speed_sq.sqrt();
            linear = linear.map(|v| v * scale);
        }
        (linear, angular)
    }

    fn validate(&self) -> Result<()> {
        let finite = |v: f32| v.is_finite() && v >= 0.0;
        if !finite(self.linear_damping) || !finite(self.angular_damping) {
            return Err(PhysicsError::InvalidBody(format!(
                "damping must be finite and non-negative, got {} / {}",
                self.linear_damping, self.angular_damping
            )));
        }
        if !finite(self.max_speed) {
            return Err(PhysicsError::InvalidBody(format!(
                "max speed must be finite and non-negative, got {}",
                self.max_speed
            )));
        }
        if let Some(g) = self.gravity_override {
            if g.iter().any(|v| !v.is_finite()) {
                return Err(PhysicsError::InvalidBody("gravity override must be finite".into()));
            }
        }
        Ok(())
    }
}

/// Description for creating a rigid body
#[derive(Debug, Clone)]
pub struct BodyDesc {
    pub shape: Arc<Shape>,
    /// Initial pose
    pub pose: Pose,
    /// Mass (ignored for kinematic bodies)
    pub mass: f32,
    /// Initial linear velocity
    pub linear_velocity: [f32; 3],
    /// Initial angular velocity
    pub angular_velocity: [f32; 3],
    /// Move by velocity only
    pub kinematic: bool,
    /// Start awake; a body added asleep stays still until something wakes it
    pub awake: bool,
    /// Enable continuous collision detection
    pub ccd_enabled: bool,
    pub settings: BodySettings,
    /// Contact buffer size (None = simulation default)
    pub contact_capacity: Option<usize>,
    /// Drop the shape reference when the body is flushed out
    pub dispose_mesh_on_detach: bool,
    /// Opaque owner data
    pub user_data: u128,
}

impl BodyDesc {
    pub fn new(shape: Arc<Shape>) -> Self {
        Self {
            shape,
            pose: Pose::IDENTITY,
            mass: 1.0,
            linear_velocity: [0.0; 3],
            angular_velocity: [0.0; 3],
            kinematic: false,
            awake: true,
            ccd_enabled: false,
            settings: BodySettings::default(),
            contact_capacity: None,
            dispose_mesh_on_detach: false,
            user_data: 0,
        }
    }

    /// Body with a single convex shape
    pub fn convex(shape: ConvexShape) -> Self {
        Self::new(Arc::new(Shape::Convex(shape)))
    }

    /// Set the initial position
    pub fn at(mut self, position: [f32; 3]) -> Self {
        self.pose.position = position;
        self
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_velocity(mut self, linear: [f32; 3]) -> Self {
        self.linear_velocity = linear;
        self
    }

    pub fn with_angular_velocity(mut self, angular: [f32; 3]) -> Self {
        self.angular_velocity = angular;
        self
    }

    /// Make this a velocity-driven kinematic body
    pub fn kinematic(mut self) -> Self {
        self.kinematic = true;
        self
    }

    /// Insert the body asleep
    pub fn asleep(mut self) -> Self {
        self.awake = false;
        self
    }

    pub fn with_ccd(mut self) -> Self {
        self.ccd_enabled = true;
        self
    }

    pub fn with_settings(mut self, settings: BodySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_filter(mut self, filter: CollisionFilter) -> Self {
        self.settings.filter = filter;
        self
    }

    pub fn with_material(mut self, material: PhysicsMaterial) -> Self {
        self.settings.material = material;
        self
    }

    pub fn with_gravity_override(mut self, gravity: [f32; 3]) -> Self {
        self.settings.gravity_override = Some(gravity);
        self
    }

    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.settings.linear_damping = linear;
        self.settings.angular_damping = angular;
        self
    }

    pub fn with_max_speed(mut self, max_speed: f32) -> Self {
        self.settings.max_speed = max_speed;
        self
    }

    /// Record contacts but never respond to them
    pub fn ghost(mut self) -> Self {
        self.settings.ghost = true;
        self
    }

    pub fn with_contact_capacity(mut self, capacity: usize) -> Self {
        self.contact_capacity = Some(capacity);
        self
    }

    pub fn without_contacts(mut self) -> Self {
        self.settings.collect_contacts = false;
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

    /// Reject descriptions that could never become a live body
    pub fn validate(&self) -> Result<()> {
        self.shape.sanity_check()?;
        if !self.kinematic {
            if !(self.mass > 0.0 && self.mass.is_finite()) {
                return Err(PhysicsError::InvalidBody(format!(
                    "dynamic body needs a positive mass, got {}",
                    self.mass
                )));
            }
            if !self.shape.supports_dynamic() {
                return Err(PhysicsError::InvalidShape(
                    "kinematic-only compound cannot back a dynamic body".into(),
                ));
            }
        }
        let values = self
            .pose
            .position
            .iter()
            .chain(&self.pose.rotation)
            .chain(&self.linear_velocity)
            .chain(&self.angular_velocity);
        if values.into_iter().any(|v| !v.is_finite()) {
            return Err(PhysicsError::InvalidBody(
                "pose and velocities must be finite".into(),
            ));
        }
        self.settings.validate()
    }
}

/// Pose and velocity as of the last completed step
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BodyState {
    pub pose: Pose,
    pub linear_velocity: [f32; 3],
    pub angular_velocity: [f32; 3],
    pub sleeping: bool,
}

/// State change requested between steps
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BodyCommand {
    SetPose(Pose),
    SetVelocity { linear: [f32; 3], angular: [f32; 3] },
    Impulse([f32; 3]),
    WakeUp,
}

/// A dynamic or kinematic body owned by a scene entity
///
/// Components are created up front, queued with
/// [`crate::simulation::SimulationContext::request_add`] and become live on the
/// next flush.
pub struct RigidBodyComponent {
    id: u64,
    shape: RwLock<Option<Arc<Shape>>>,
    mass: f32,
    kinematic: bool,
    awake: bool,
    ccd_enabled: bool,
    settings: RwLock<BodySettings>,
    state: RwLock<BodyState>,
    commands: Mutex<Vec<BodyCommand>>,
    dirty: AtomicBool,
    handle: AtomicU64,
    contacts: ContactBuffer,
    dispose_mesh_on_detach: bool,
    user_data: u128,
}

impl RigidBodyComponent {
    /// Validate `desc` and create the component
    pub fn new(desc: BodyDesc) -> Result<Arc<Self>> {
        let capacity = desc.contact_capacity.unwrap_or(DEFAULT_CONTACT_CAPACITY);
        Self::with_capacity(desc, capacity)
    }

    /// Create with an explicit contact capacity, ignoring the description's
    pub fn with_capacity(desc: BodyDesc, capacity: usize) -> Result<Arc<Self>> {
        desc.validate()?;
        Ok(Arc::new(Self {
            id: next_object_id(),
            shape: RwLock::new(Some(desc.shape)),
            mass: desc.mass,
            kinematic: desc.kinematic,
            awake: desc.awake,
            ccd_enabled: desc.ccd_enabled,
            settings: RwLock::new(desc.settings),
            state: RwLock::new(BodyState {
                pose: desc.pose,
                linear_velocity: desc.linear_velocity,
                angular_velocity: desc.angular_velocity,
                sleeping: !desc.awake,
            }),
            commands: Mutex::new(Vec::new()),
            dirty: AtomicBool::new(false),
            handle: AtomicU64::new(BodyHandle::null().to_bits()),
            contacts: ContactBuffer::new(capacity),
            dispose_mesh_on_detach: desc.dispose_mesh_on_detach,
            user_data: desc.user_data,
        }))
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Live handle, or None while pending or after removal
    pub fn handle(&self) -> Option<BodyHandle> {
        let handle = BodyHandle::from_bits(self.handle.load(Ordering::Acquire));
        (!handle.is_null()).then_some(handle)
    }

    pub fn is_live(&self) -> bool {
        self.handle().is_some()
    }

    pub fn collidable(&self) -> Option<Collidable> {
        self.handle().map(Collidable::Body)
    }

    pub(crate) fn set_handle(&self, handle: Option<BodyHandle>) {
        let bits = handle.unwrap_or_else(BodyHandle::null).to_bits();
        self.handle.store(bits, Ordering::Release);
    }

    /// Current shape; None once disposed
    pub fn shape(&self) -> Option<Arc<Shape>> {
        self.shape.read().clone()
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn is_kinematic(&self) -> bool {
        self.kinematic
    }

    pub fn mobility(&self) -> Mobility {
        if self.kinematic {
            Mobility::Kinematic
        } else {
            Mobility::Dynamic
        }
    }

    pub fn user_data(&self) -> u128 {
        self.user_data
    }

    pub fn disposes_mesh_on_detach(&self) -> bool {
        self.dispose_mesh_on_detach
    }

    pub fn settings(&self) -> BodySettings {
        *self.settings.read()
    }

    /// Change settings; takes effect from the next contact or integration pass
    pub fn update_settings(&self, f: impl FnOnce(&mut BodySettings)) {
        f(&mut *self.settings.write());
    }

    pub fn set_gravity_override(&self, gravity: Option<[f32; 3]>) {
        self.update_settings(|s| s.gravity_override = gravity);
    }

    pub fn set_damping(&self, linear: f32, angular: f32) {
        self.update_settings(|s| {
            s.linear_damping = linear.max(0.0);
            s.angular_damping = angular.max(0.0);
        });
    }

    pub fn set_max_speed(&self, max_speed: f32) {
        self.update_settings(|s| s.max_speed = max_speed.max(0.0));
    }

    pub fn set_material(&self, material: PhysicsMaterial) {
        self.update_settings(|s| s.material = material);
    }

    pub fn set_filter(&self, filter: CollisionFilter) {
        self.update_settings(|s| s.filter = filter);
    }

    pub fn set_ghost(&self, ghost: bool) {
        self.update_settings(|s| s.ghost = ghost);
    }

    pub fn set_collect_contacts(&self, collect: bool) {
        self.update_settings(|s| s.collect_contacts = collect);
    }

    pub(crate) fn info(&self) -> CollidableInfo {
        let settings = self.settings.read();
        CollidableInfo {
            mobility: self.mobility(),
            filter: settings.filter,
            material: settings.material,
            ghost: settings.ghost,
            collect_contacts: settings.collect_contacts,
        }
    }

    /// State as of the last step
    pub fn state(&self) -> BodyState {
        *self.state.read()
    }

    pub fn pose(&self) -> Pose {
        self.state.read().pose
    }

    pub fn linear_velocity(&self) -> [f32; 3] {
        self.state.read().linear_velocity
    }

    pub fn angular_velocity(&self) -> [f32; 3] {
        self.state.read().angular_velocity
    }

    pub fn is_sleeping(&self) -> bool {
        self.state.read().sleeping
    }

    fn push_command(&self, command: BodyCommand) {
        self.commands.lock().push(command);
        self.dirty.store(true, Ordering::Release);
    }

    /// Teleport the body at the start of the next step
    pub fn set_pose(&self, pose: Pose) {
        if !self.is_live() {
            self.state.write().pose = pose;
        }
        self.push_command(BodyCommand::SetPose(pose));
    }

    /// Replace velocities at the start of the next step
    pub fn set_velocity(&self, linear: [f32; 3], angular: [f32; 3]) {
        if !self.is_live() {
            let mut state = self.state.write();
            state.linear_velocity = linear;
            state.angular_velocity = angular;
        }
        self.push_command(BodyCommand::SetVelocity { linear, angular });
    }

    /// Apply a linear impulse at the centre of mass at the start of the next step
    pub fn apply_impulse(&self, impulse: [f32; 3]) {
        self.push_command(BodyCommand::Impulse(impulse));
    }

    pub fn wake_up(&self) {
        self.push_command(BodyCommand::WakeUp);
    }

    /// Apply queued commands to the backend body
    pub(crate) fn apply_commands(&self, body: &mut rapier::RigidBody) {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return;
        }
        let commands = std::mem::take(&mut *self.commands.lock());
        for command in commands {
            match command {
                BodyCommand::SetPose(pose) => body.set_position(pose.to_isometry(), true),
                BodyCommand::SetVelocity { linear, angular } => {
                    body.set_linvel(to_vector(linear), true);
                    body.set_angvel(to_vector(angular), true);
                }
                BodyCommand::Impulse(impulse) => body.apply_impulse(to_vector(impulse), true),
                BodyCommand::WakeUp => body.wake_up(true),
            }
        }
    }

    /// Copy the backend body's state into the cache
    pub(crate) fn publish_state(&self, body: &rapier::RigidBody) {
        *self.state.write() = BodyState {
            pose: Pose::from_isometry(body.position()),
            linear_velocity: from_vector(body.linvel()),
            angular_velocity: from_vector(body.angvel()),
            sleeping: body.is_sleeping(),
        };
    }

    /// Backend body and collider for insertion
    pub(crate) fn to_rapier(
        &self,
        can_sleep: bool,
    ) -> Result<(rapier::RigidBody, rapier::ColliderBuilder)> {
        let shape = self
            .shape()
            .ok_or_else(|| PhysicsError::InvalidShape("body shape was disposed".into()))?;
        let shared = shape.to_shared_shape()?;
        let state = self.state();
        let settings = self.settings();

        let body_type = if self.kinematic {
            rapier::RigidBodyType::KinematicVelocityBased
        } else {
            rapier::RigidBodyType::Dynamic
        };
        let body = rapier::RigidBodyBuilder::new(body_type)
            .position(state.pose.to_isometry())
            .linvel(to_vector(state.linear_velocity))
            .angvel(to_vector(state.angular_velocity))
            .can_sleep(can_sleep)
            .sleeping(!self.awake && can_sleep)
            .ccd_enabled(self.ccd_enabled)
            .build();

        let mut collider = rapier::ColliderBuilder::new(shared.clone())
            .friction(settings.material.friction)
            .restitution(settings.material.restitution)
            .active_hooks(
                rapier::ActiveHooks::FILTER_CONTACT_PAIRS
                    | rapier::ActiveHooks::MODIFY_SOLVER_CONTACTS,
            );
        if !self.kinematic {
            collider = collider.mass_properties(shape.mass_properties(&shared, self.mass));
        }
        Ok((body, collider))
    }

    pub(crate) fn contact_buffer(&self) -> &ContactBuffer {
        &self.contacts
    }

    /// Contacts recorded during the last step, each seen from this body
    pub fn contacts(&self) -> Vec<ContactRecord> {
        self.contacts.snapshot()
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.count()
    }

    pub fn contact_capacity(&self) -> usize {
        self.contacts.capacity()
    }

    /// Invalidate the handle and contacts; optionally drop the shape
    pub(crate) fn detach(&self, dispose: bool) {
        self.set_handle(None);
        self.contacts.reset();
        if dispose || self.dispose_mesh_on_detach {
            let shape = self.shape.write().take();
            if shape.as_deref().and_then(Shape::as_mesh).is_some() {
                log::trace!("disposed mesh shape of body {}", self.id);
            }
        }
    }
}

impl std::fmt::Debug for RigidBodyComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RigidBodyComponent")
            .field("id", &self.id)
            .field("handle", &self.handle())
            .field("kinematic", &self.kinematic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_integrate_gravity_then_damping_then_cap() {
        let settings = BodySettings::default();
        let (lin, _) = settings.integrate([0.0; 3], [0.0; 3], [0.0, -10.0, 0.0], 0.1);
        assert_relative_eq!(lin[1], -1.0);

        let settings = BodySettings {
            gravity_override: Some([0.0, 0.0, 0.0]),
            linear_damping: 0.5,
            angular_damping: 1.0,
            ..Default::default()
        };
        let (lin, ang) = settings.integrate([4.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, -10.0, 0.0], 0.5);
        assert_relative_eq!(lin[0], 3.0);
        assert_relative_eq!(ang[1], 1.0);

        let settings = BodySettings {
            max_speed: 2.0,
            ..Default::default()
        };
        let (lin, _) = settings.integrate([3.0, 4.0, 0.0], [0.0; 3], [0.0; 3], 0.1);
        assert_relative_eq!(length_squared(lin).sqrt(), 2.0, epsilon = 1e-5);
        assert_relative_eq!(lin[0] / lin[1], 0.75, epsilon = 1e-5);
    }

    #[test]
    fn test_damping_never_reverses_velocity() {
        let settings = BodySettings {
            linear_damping: 100.0,
            ..Default::default()
        };
        let (lin, _) = settings.integrate([5.0, 0.0, 0.0], [0.0; 3], [0.0; 3], 1.0);
        assert_eq!(lin, [0.0; 3]);
    }

    #[test]
    fn test_validate_rejects_bad_bodies() {
        assert!(BodyDesc::convex(ConvexShape::sphere(1.0)).validate().is_ok());
        assert!(BodyDesc::convex(ConvexShape::sphere(-1.0)).validate().is_err());
        assert!(BodyDesc::convex(ConvexShape::sphere(1.0))
            .with_mass(0.0)
            .validate()
            .is_err());
        assert!(BodyDesc::convex(ConvexShape::sphere(1.0))
            .with_mass(0.0)
            .kinematic()
            .validate()
            .is_ok());
        assert!(BodyDesc::convex(ConvexShape::sphere(1.0))
            .with_damping(-1.0, 0.0)
            .validate()
            .is_err());
        assert!(BodyDesc::convex(ConvexShape::sphere(1.0))
            .at([f32::NAN, 0.0, 0.0])
            .validate()
            .is_err());
    }

    #[test]
    fn test_pending_body_takes_pose_directly() {
        let body = RigidBodyComponent::new(BodyDesc::convex(ConvexShape::sphere(1.0))).unwrap();
        assert!(!body.is_live());
        body.set_pose(Pose::at([1.0, 2.0, 3.0]));
        assert_eq!(body.pose().position, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_detach_disposes_shape_when_asked() {
        let body = RigidBodyComponent::new(
            BodyDesc::convex(ConvexShape::sphere(1.0)).dispose_mesh_on_detach(),
        )
        .unwrap();
        body.set_handle(Some(BodyHandle::new(1, 0)));
        body.detach(false);
        assert!(body.handle().is_none());
        assert!(body.shape().is_none());
        assert!(body.to_rapier(true).is_err());
    }

    #[test]
    fn test_settings_update() {
        let body = RigidBodyComponent::new(BodyDesc::convex(ConvexShape::sphere(1.0))).unwrap();
        body.set_ghost(true);
        body.set_max_speed(-3.0);
        let info = body.info();
        assert!(info.ghost);
        assert_eq!(body.settings().max_speed, 0.0);
        assert_eq!(info.mobility, Mobility::Dynamic);
    }
}
