//! Void Physics - Concurrent Rapier 3D Simulation Layer
//!
//! This crate owns a Rapier 3D world and everything needed to drive it from many
//! threads at once: deferred topology changes, collision filtering, per-body
//! contact buffers and spatial queries that run while a step is in flight.
//!
//! # Features
//!
//! - Dynamic, kinematic and static bodies with convex, compound and mesh shapes
//! - Add/remove requests from any thread, applied at safe points
//! - Group/mask filtering with exclusion tags and ghost (sensor) bodies
//! - Bounded per-body contact buffers filled by the narrow phase
//! - Per-body gravity, damping and speed caps
//! - Raycasts and convex sweeps, blocking or best-effort
//! - Mesh extraction from renderer vertex/index buffers into pooled triangles
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  SimulationContext                   │
//! │  ┌───────────────┐  ┌────────────┐  ┌─────────────┐  │
//! │  │ PendingAdds / │  │ StepAction │  │ PoolRegistry│  │
//! │  │ PendingRemoves│  │   queues   │  │ ShapeStore  │  │
//! │  └───────┬───────┘  └────────────┘  └─────────────┘  │
//! │          │ flush (write lock)                        │
//! │  ┌───────▼──────────────────────────────────────────┐│
//! │  │ RwLock<WorldState>                               ││
//! │  │   BodyRegistry                                   ││
//! │  │   Mutex<PhysicsWorld>   ── step (read lock) ──┐  ││
//! │  │   Mutex<QueryScene>     ◄── snapshot ─────────┘  ││
//! │  └──────────────────────────────────────────────────┘│
//! └──────────────────────────────────────────────────────┘
//!          │                 │                  │
//!          ▼                 ▼                  ▼
//!    ┌───────────┐    ┌─────────────┐    ┌────────────┐
//!    │ RigidBody │    │StaticCollider│   │  Queries   │
//!    │ Component │    │  Component   │   │ (raycasts, │
//!    └───────────┘    └─────────────┘    │  sweeps)   │
//!                                        └────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use void_physics::prelude::*;
//!
//! let simulation = SimulationContext::new(PhysicsConfig::default())?;
//!
//! let ground = simulation.create_static(StaticDesc::convex(ConvexShape::cuboid(50.0, 0.5, 50.0)))?;
//! let ball = simulation.create_body(
//!     BodyDesc::convex(ConvexShape::sphere(0.5)).at([0.0, 10.0, 0.0]),
//! )?;
//! simulation.request_add(ground)?;
//! simulation.request_add(ball.clone())?;
//!
//! // Once per frame: flush requests, step, run queued actions
//! simulation.update(1.0 / 60.0);
//!
//! let below = simulation.raycast_closest(ball.pose().position, [0.0, -1.0, 0.0], 20.0, DEFAULT_QUERY_MASK, ball.collidable());
//! ```

pub mod body;
pub mod builder;
pub mod collider;
pub mod config;
pub mod contact;
pub mod error;
mod hooks;
pub mod material;
pub mod math;
pub mod mesh;
pub mod mutation;
pub mod policy;
pub mod query;
pub mod registry;
pub mod shape;
pub mod simulation;
pub mod store;
mod world;

pub mod prelude {
    //! Common imports for physics functionality
    pub use crate::body::{BodyDesc, BodySettings, BodyState, RigidBodyComponent};
    pub use crate::builder::{
        box_of_bounds, build_compound, capsule_of_bounds, cylinder_of_bounds,
        offset_single_shape, sphere_of_bounds, Bounds, CompoundBuilder,
    };
    pub use crate::collider::{build_big_mesh_statics, StaticColliderComponent, StaticDesc};
    pub use crate::config::PhysicsConfig;
    pub use crate::contact::ContactRecord;
    pub use crate::error::{PhysicsError, Result};
    pub use crate::material::{PhysicsMaterial, SpringSettings};
    pub use crate::math::Pose;
    pub use crate::mesh::{
        build_mesh_from_buffers, build_mesh_from_geometry, build_mesh_from_triangles,
        IndexBuffer, IndexFormat, MeshGeometry, VertexBuffer, VertexLayout,
    };
    pub use crate::mutation::{FlushReport, PhysicsObject};
    pub use crate::policy::{
        CollisionFilter, CollisionLayer, Mobility, DEFAULT_QUERY_MASK,
    };
    pub use crate::query::{HitResult, ManagedRaycast};
    pub use crate::registry::{BodyHandle, Collidable, StaticHandle};
    pub use crate::shape::{
        CompoundChild, CompoundShape, ConvexShape, MeshShape, Shape, ShapeId, ShapeKind,
        Triangle,
    };
    pub use crate::simulation::{SimulationContext, StepAction, StepStats};
    pub use crate::store::ShapeStore;
}

pub use prelude::*;
