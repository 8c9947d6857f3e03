//! Physics queries (raycasting, shape sweeps)
//!
//! Every query reads the scene published by the last step or flush. Blocking
//! variants wait for the world and broadphase locks; `try_` variants give up
//! at once when either is taken and leave their output untouched.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use rapier3d::parry::query::{self as parry_query, ShapeCastOptions, ShapeCastStatus};
use rapier3d::prelude as rapier;

use crate::math::{from_point, from_vector, length_squared, sub, to_point, to_vector, Pose};
use crate::policy;
use crate::registry::{BodyRegistry, Collidable};
use crate::shape::ConvexShape;
use crate::simulation::SimulationContext;
use crate::world::QueryScene;

/// Result of a raycast or sweep
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HitResult {
    /// Whether anything was hit
    pub succeeded: bool,
    /// Hit point in world space
    pub point: [f32; 3],
    /// Surface normal at the hit point, facing the query
    pub normal: [f32; 3],
    /// Hit distance divided by the query's maximum distance
    pub fraction: f32,
    /// Distance travelled before the hit
    pub distance: f32,
    /// What was hit
    pub collidable: Option<Collidable>,
    /// The swept shape already overlapped at its start pose
    pub hit_at_zero: bool,
}

impl HitResult {
    /// A result with `succeeded == false`
    pub const MISS: Self = Self {
        succeeded: false,
        point: [0.0; 3],
        normal: [0.0; 3],
        fraction: 0.0,
        distance: 0.0,
        collidable: None,
        hit_at_zero: false,
    };
}

/// Unit direction, or `None` for a zero or non-finite vector
fn normalized(direction: [f32; 3]) -> Option<rapier::Vector<f32>> {
    let len_sq = length_squared(direction);
    if !(len_sq > f32::EPSILON && len_sq.is_finite()) {
        return None;
    }
    Some(to_vector(direction) / len_sq.sqrt())
}

/// Candidate test shared by every query: the owner must exist, pass the group
/// mask and not be the skipped collidable
fn accepts(
    registry: &BodyRegistry,
    collider: &rapier::Collider,
    mask: u32,
    skip: Option<Collidable>,
) -> bool {
    let Some(owner) = Collidable::of_collider(collider) else {
        return false;
    };
    if Some(owner) == skip {
        return false;
    }
    registry
        .resolve(owner)
        .map_or(false, |owner| policy::allow_test(owner.group(), mask))
}

fn ray_hit(
    ray: &rapier::Ray,
    max_distance: f32,
    collidable: Option<Collidable>,
    intersection: &rapier::RayIntersection,
) -> HitResult {
    let distance = intersection.time_of_impact;
    HitResult {
        succeeded: true,
        point: from_point(&ray.point_at(distance)),
        normal: from_vector(&intersection.normal),
        fraction: distance / max_distance,
        distance,
        collidable,
        hit_at_zero: false,
    }
}

fn cast_options(max_distance: f32) -> ShapeCastOptions {
    ShapeCastOptions {
        max_time_of_impact: max_distance,
        target_distance: 0.0,
        stop_at_penetration: true,
        compute_impact_geometry_on_penetration: true,
    }
}

/// Convert a cast hit whose witness and normal 1 are in world space
fn sweep_hit(
    hit: &parry_query::ShapeCastHit,
    max_distance: f32,
    collidable: Option<Collidable>,
) -> HitResult {
    let distance = hit.time_of_impact;
    HitResult {
        succeeded: true,
        point: from_point(&hit.witness1),
        normal: from_vector(&hit.normal1),
        fraction: distance / max_distance,
        distance,
        collidable,
        hit_at_zero: hit.status == ShapeCastStatus::PenetratingOrWithinTargetDist,
    }
}

fn owner_of(scene: &QueryScene, handle: rapier::ColliderHandle) -> Option<Collidable> {
    scene.colliders.get(handle).and_then(Collidable::of_collider)
}

fn raycast_closest_in(
    registry: &BodyRegistry,
    scene: &QueryScene,
    origin: [f32; 3],
    direction: [f32; 3],
    max_distance: f32,
    mask: u32,
    skip: Option<Collidable>,
) -> HitResult {
    let Some(dir) = normalized(direction) else {
        return HitResult::MISS;
    };
    if !(max_distance > 0.0) {
        return HitResult::MISS;
    }
    let ray = rapier::Ray::new(to_point(origin), dir);
    let predicate = |_: rapier::ColliderHandle, collider: &rapier::Collider| {
        accepts(registry, collider, mask, skip)
    };
    let filter = rapier::QueryFilter::new().predicate(&predicate);

    scene
        .pipeline
        .cast_ray_and_get_normal(
            &scene.bodies,
            &scene.colliders,
            &ray,
            max_distance,
            true,
            filter,
        )
        .map_or(HitResult::MISS, |(handle, intersection)| {
            ray_hit(&ray, max_distance, owner_of(scene, handle), &intersection)
        })
}

#[allow(clippy::too_many_arguments)]
fn raycast_all_in(
    registry: &BodyRegistry,
    scene: &QueryScene,
    origin: [f32; 3],
    direction: [f32; 3],
    max_distance: f32,
    mask: u32,
    skip: Option<Collidable>,
    hits: &mut Vec<HitResult>,
) -> usize {
    let Some(dir) = normalized(direction) else {
        return 0;
    };
    if !(max_distance > 0.0) {
        return 0;
    }
    let ray = rapier::Ray::new(to_point(origin), dir);
    let predicate = |_: rapier::ColliderHandle, collider: &rapier::Collider| {
        accepts(registry, collider, mask, skip)
    };
    let filter = rapier::QueryFilter::new().predicate(&predicate);

    let before = hits.len();
    scene.pipeline.intersections_with_ray(
        &scene.bodies,
        &scene.colliders,
        &ray,
        max_distance,
        true,
        filter,
        |handle, intersection| {
            hits.push(ray_hit(&ray, max_distance, owner_of(scene, handle), &intersection));
            true
        },
    );
    hits.len() - before
}

#[allow(clippy::too_many_arguments)]
fn sweep_closest_in(
    registry: &BodyRegistry,
    scene: &QueryScene,
    shape: &ConvexShape,
    pose: Pose,
    direction: [f32; 3],
    max_distance: f32,
    mask: u32,
    skip: Option<Collidable>,
) -> HitResult {
    let Some(dir) = normalized(direction) else {
        return HitResult::MISS;
    };
    if !(max_distance > 0.0) || shape.sanity_check().is_err() {
        return HitResult::MISS;
    }
    let swept = shape.to_shared_shape();
    let predicate = |_: rapier::ColliderHandle, collider: &rapier::Collider| {
        accepts(registry, collider, mask, skip)
    };
    let filter = rapier::QueryFilter::new().predicate(&predicate);

    scene
        .pipeline
        .cast_shape(
            &scene.bodies,
            &scene.colliders,
            &pose.to_isometry(),
            &dir,
            swept.as_ref(),
            cast_options(max_distance),
            filter,
        )
        .map_or(HitResult::MISS, |(handle, hit)| {
            sweep_hit(&hit, max_distance, owner_of(scene, handle))
        })
}

#[allow(clippy::too_many_arguments)]
fn sweep_all_in(
    registry: &BodyRegistry,
    scene: &QueryScene,
    shape: &ConvexShape,
    pose: Pose,
    direction: [f32; 3],
    max_distance: f32,
    mask: u32,
    skip: Option<Collidable>,
    hits: &mut Vec<HitResult>,
) -> usize {
    let Some(dir) = normalized(direction) else {
        return 0;
    };
    if !(max_distance > 0.0) || shape.sanity_check().is_err() {
        return 0;
    }
    let swept = shape.to_shared_shape();
    let start = pose.to_isometry();
    let mut end = start;
    end.translation.vector += dir * max_distance;
    let bounds = swept.compute_swept_aabb(&start, &end);

    let before = hits.len();
    let zero = rapier::Vector::zeros();
    scene
        .pipeline
        .colliders_with_aabb_intersecting_aabb(&bounds, |&handle| {
            let Some(collider) = scene.colliders.get(handle) else {
                return true;
            };
            if !accepts(registry, collider, mask, skip) {
                return true;
            }
            // Collider first, so witness and normal 1 are on the hit surface
            let cast = parry_query::cast_shapes(
                collider.position(),
                &zero,
                collider.shape(),
                &start,
                &dir,
                swept.as_ref(),
                cast_options(max_distance),
            );
            if let Ok(Some(local)) = cast {
                let frame = collider.position();
                let world = parry_query::ShapeCastHit {
                    witness1: frame * local.witness1,
                    normal1: frame.rotation * local.normal1,
                    ..local
                };
                hits.push(sweep_hit(&world, max_distance, Collidable::of_collider(collider)));
            }
            true
        });
    hits.len() - before
}

impl SimulationContext {
    // ==================== Raycasts ====================

    /// Closest hit along a ray, waiting for the query locks
    pub fn raycast_closest(
        &self,
        origin: [f32; 3],
        direction: [f32; 3],
        max_distance: f32,
        mask: u32,
        skip: Option<Collidable>,
    ) -> HitResult {
        self.with_scene(|registry, scene| {
            raycast_closest_in(registry, scene, origin, direction, max_distance, mask, skip)
        })
    }

    /// Closest hit along a ray, or `None` if a step or flush holds the locks
    pub fn try_raycast_closest(
        &self,
        origin: [f32; 3],
        direction: [f32; 3],
        max_distance: f32,
        mask: u32,
        skip: Option<Collidable>,
    ) -> Option<HitResult> {
        self.try_with_scene(|registry, scene| {
            raycast_closest_in(registry, scene, origin, direction, max_distance, mask, skip)
        })
    }

    /// Append every hit along a ray to `hits`, unordered; returns how many
    pub fn raycast_all(
        &self,
        origin: [f32; 3],
        direction: [f32; 3],
        max_distance: f32,
        mask: u32,
        skip: Option<Collidable>,
        hits: &mut Vec<HitResult>,
    ) -> usize {
        self.with_scene(|registry, scene| {
            raycast_all_in(registry, scene, origin, direction, max_distance, mask, skip, hits)
        })
    }

    /// Non-blocking [`raycast_all`](Self::raycast_all); false if the locks were taken
    pub fn try_raycast_all(
        &self,
        origin: [f32; 3],
        direction: [f32; 3],
        max_distance: f32,
        mask: u32,
        skip: Option<Collidable>,
        hits: &mut Vec<HitResult>,
    ) -> bool {
        self.try_with_scene(|registry, scene| {
            raycast_all_in(registry, scene, origin, direction, max_distance, mask, skip, hits)
        })
        .is_some()
    }

    /// Closest hit on the segment from `start` to `end`
    pub fn raycast_between(
        &self,
        start: [f32; 3],
        end: [f32; 3],
        mask: u32,
        skip: Option<Collidable>,
    ) -> HitResult {
        let delta = sub(end, start);
        self.raycast_closest(start, delta, length_squared(delta).sqrt(), mask, skip)
    }

    /// Every hit on the segment from `start` to `end`
    pub fn raycast_all_between(
        &self,
        start: [f32; 3],
        end: [f32; 3],
        mask: u32,
        skip: Option<Collidable>,
        hits: &mut Vec<HitResult>,
    ) -> usize {
        let delta = sub(end, start);
        self.raycast_all(start, delta, length_squared(delta).sqrt(), mask, skip, hits)
    }

    // ==================== Sweeps ====================

    /// First obstruction met by `shape` moving from `pose` along `direction`
    pub fn sweep_closest(
        &self,
        shape: &ConvexShape,
        pose: Pose,
        direction: [f32; 3],
        max_distance: f32,
        mask: u32,
        skip: Option<Collidable>,
    ) -> HitResult {
        self.with_scene(|registry, scene| {
            sweep_closest_in(registry, scene, shape, pose, direction, max_distance, mask, skip)
        })
    }

    /// Non-blocking [`sweep_closest`](Self::sweep_closest)
    pub fn try_sweep_closest(
        &self,
        shape: &ConvexShape,
        pose: Pose,
        direction: [f32; 3],
        max_distance: f32,
        mask: u32,
        skip: Option<Collidable>,
    ) -> Option<HitResult> {
        self.try_with_scene(|registry, scene| {
            sweep_closest_in(registry, scene, shape, pose, direction, max_distance, mask, skip)
        })
    }

    /// Append every obstruction along the sweep to `hits`, unordered
    #[allow(clippy::too_many_arguments)]
    pub fn sweep_all(
        &self,
        shape: &ConvexShape,
        pose: Pose,
        direction: [f32; 3],
        max_distance: f32,
        mask: u32,
        skip: Option<Collidable>,
        hits: &mut Vec<HitResult>,
    ) -> usize {
        self.with_scene(|registry, scene| {
            sweep_all_in(
                registry,
                scene,
                shape,
                pose,
                direction,
                max_distance,
                mask,
                skip,
                hits,
            )
        })
    }

    /// Non-blocking [`sweep_all`](Self::sweep_all); false if the locks were taken
    #[allow(clippy::too_many_arguments)]
    pub fn try_sweep_all(
        &self,
        shape: &ConvexShape,
        pose: Pose,
        direction: [f32; 3],
        max_distance: f32,
        mask: u32,
        skip: Option<Collidable>,
        hits: &mut Vec<HitResult>,
    ) -> bool {
        self.try_with_scene(|registry, scene| {
            sweep_all_in(
                registry,
                scene,
                shape,
                pose,
                direction,
                max_distance,
                mask,
                skip,
                hits,
            )
        })
        .is_some()
    }
}

// ==================== Managed raycasts ====================

struct RayRequest<U> {
    user_data: U,
    start: [f32; 3],
    end: [f32; 3],
    mask: u32,
    skip: Option<Collidable>,
}

/// Raycasts performed after the next step instead of on the calling thread
///
/// Never contends with a running step and never fails to acquire the locks, at
/// the cost of a frame of latency. Results come back oldest first.
pub struct ManagedRaycast<U> {
    requests: (Sender<RayRequest<U>>, Receiver<RayRequest<U>>),
    results: (Sender<(HitResult, Instant, U)>, Receiver<(HitResult, Instant, U)>),
}

impl<U: Send + 'static> ManagedRaycast<U> {
    pub fn new() -> Self {
        Self {
            requests: crossbeam_channel::unbounded(),
            results: crossbeam_channel::unbounded(),
        }
    }

    /// Queue a raycast from `start` to `end`; `user_data` comes back with the result
    pub fn request(
        &self,
        simulation: &SimulationContext,
        user_data: U,
        start: [f32; 3],
        end: [f32; 3],
        mask: u32,
        skip: Option<Collidable>,
    ) {
        let request = RayRequest {
            user_data,
            start,
            end,
            mask,
            skip,
        };
        if self.requests.0.send(request).is_err() {
            return;
        }

        let requests = self.requests.1.clone();
        let results = self.results.0.clone();
        simulation.enqueue_after_step(move |simulation, _| {
            let Ok(request) = requests.try_recv() else {
                return;
            };
            let hit =
                simulation.raycast_between(request.start, request.end, request.mask, request.skip);
            if results.send((hit, Instant::now(), request.user_data)).is_err() {
                log::warn!("Managed raycast result dropped: receiver gone");
            }
        });
    }

    /// Queue a raycast of `length` along `direction`
    #[allow(clippy::too_many_arguments)]
    pub fn request_along(
        &self,
        simulation: &SimulationContext,
        user_data: U,
        start: [f32; 3],
        direction: [f32; 3],
        length: f32,
        mask: u32,
        skip: Option<Collidable>,
    ) {
        let end = match normalized(direction) {
            Some(dir) => from_vector(&(to_vector(start) + dir * length)),
            None => start,
        };
        self.request(simulation, user_data, start, end, mask, skip);
    }

    /// Oldest finished result with its age and user data
    pub fn pop_result(&self) -> Option<(HitResult, Duration, U)> {
        let (hit, produced, user_data) = self.results.1.try_recv().ok()?;
        Some((hit, produced.elapsed(), user_data))
    }

    /// Requests not yet performed
    pub fn pending_requests(&self) -> usize {
        self.requests.1.len()
    }

    /// Results waiting to be popped
    pub fn ready_results(&self) -> usize {
        self.results.1.len()
    }
}

impl<U: Send + 'static> Default for ManagedRaycast<U> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::StaticDesc;
    use crate::config::PhysicsConfig;
    use crate::policy::{CollisionFilter, DEFAULT_QUERY_MASK};
    use approx::assert_relative_eq;

    fn scene_with_sphere(center: [f32; 3]) -> SimulationContext {
        let ctx = SimulationContext::new(PhysicsConfig::default().with_worker_threads(1)).unwrap();
        let sphere = ctx
            .create_static(StaticDesc::convex(ConvexShape::sphere(1.0)).at(center))
            .unwrap();
        ctx.request_add(sphere).unwrap();
        ctx.flush_adds();
        ctx
    }

    #[test]
    fn test_raycast_hits_sphere_front() {
        let ctx = scene_with_sphere([0.0, 0.0, 5.0]);
        let hit = ctx.raycast_closest([0.0; 3], [0.0, 0.0, 1.0], 10.0, DEFAULT_QUERY_MASK, None);
        assert!(hit.succeeded);
        assert_relative_eq!(hit.distance, 4.0, epsilon = 1e-4);
        assert_relative_eq!(hit.fraction, 0.4, epsilon = 1e-4);
        assert_relative_eq!(hit.normal[2], -1.0, epsilon = 1e-4);
        assert!(hit.collidable.is_some());
    }

    #[test]
    fn test_zero_direction_misses() {
        let ctx = scene_with_sphere([0.0, 0.0, 5.0]);
        let hit = ctx.raycast_closest([0.0; 3], [0.0; 3], 10.0, DEFAULT_QUERY_MASK, None);
        assert!(!hit.succeeded);
    }

    #[test]
    fn test_mask_and_skip_filter_candidates() {
        let ctx = SimulationContext::new(PhysicsConfig::default()).unwrap();
        let sphere = ctx
            .create_static(
                StaticDesc::convex(ConvexShape::sphere(1.0))
                    .at([0.0, 0.0, 5.0])
                    .with_filter(CollisionFilter::new(0b10, u32::MAX)),
            )
            .unwrap();
        ctx.request_add(sphere.clone()).unwrap();
        ctx.flush_adds();

        let dir = [0.0, 0.0, 1.0];
        assert!(!ctx.raycast_closest([0.0; 3], dir, 10.0, 0b01, None).succeeded);
        assert!(ctx.raycast_closest([0.0; 3], dir, 10.0, 0b10, None).succeeded);
        assert!(!ctx
            .raycast_closest([0.0; 3], dir, 10.0, 0b10, sphere.collidable())
            .succeeded);
    }

    #[test]
    fn test_raycast_all_reports_every_hit() {
        let ctx = SimulationContext::new(PhysicsConfig::default()).unwrap();
        for z in [3.0, 6.0, 9.0] {
            let s = ctx
                .create_static(StaticDesc::convex(ConvexShape::sphere(0.5)).at([0.0, 0.0, z]))
                .unwrap();
            ctx.request_add(s).unwrap();
        }
        ctx.flush_adds();

        let mut hits = vec![HitResult::MISS];
        let n = ctx.raycast_all_between([0.0; 3], [0.0, 0.0, 7.0], DEFAULT_QUERY_MASK, None, &mut hits);
        assert_eq!(n, 2);
        assert_eq!(hits.len(), 3);
        assert!(hits[1..].iter().all(|h| h.succeeded && h.distance < 7.0));
    }

    #[test]
    fn test_sweep_reports_contact_distance() {
        let ctx = scene_with_sphere([0.0, 0.0, 5.0]);
        let probe = ConvexShape::sphere(0.5);
        let hit = ctx.sweep_closest(
            &probe,
            Pose::IDENTITY,
            [0.0, 0.0, 1.0],
            10.0,
            DEFAULT_QUERY_MASK,
            None,
        );
        assert!(hit.succeeded);
        assert!(!hit.hit_at_zero);
        assert_relative_eq!(hit.distance, 3.5, epsilon = 1e-3);
        assert_relative_eq!(hit.normal[2], -1.0, epsilon = 1e-3);
        assert_relative_eq!(hit.point[2], 4.0, epsilon = 1e-3);

        let mut hits = Vec::new();
        let n = ctx.sweep_all(
            &probe,
            Pose::IDENTITY,
            [0.0, 0.0, 1.0],
            10.0,
            DEFAULT_QUERY_MASK,
            None,
            &mut hits,
        );
        assert_eq!(n, 1);
        assert_relative_eq!(hits[0].distance, 3.5, epsilon = 1e-3);
        assert_relative_eq!(hits[0].point[2], 4.0, epsilon = 1e-3);
        assert_relative_eq!(hits[0].normal[2], -1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_sweep_overlapping_start_hits_at_zero() {
        let ctx = scene_with_sphere([0.0, 0.0, 0.5]);
        let hit = ctx.sweep_closest(
            &ConvexShape::sphere(0.5),
            Pose::IDENTITY,
            [0.0, 0.0, 1.0],
            10.0,
            DEFAULT_QUERY_MASK,
            None,
        );
        assert!(hit.succeeded);
        assert!(hit.hit_at_zero);
        assert_relative_eq!(hit.distance, 0.0);
    }

    #[test]
    fn test_try_variants_fail_without_touching_output() {
        let ctx = scene_with_sphere([0.0, 0.0, 5.0]);
        let mut hits = vec![HitResult::MISS];
        ctx.hold_scene_lock(|| {
            assert!(ctx
                .try_raycast_closest([0.0; 3], [0.0, 0.0, 1.0], 10.0, DEFAULT_QUERY_MASK, None)
                .is_none());
            assert!(!ctx.try_raycast_all(
                [0.0; 3],
                [0.0, 0.0, 1.0],
                10.0,
                DEFAULT_QUERY_MASK,
                None,
                &mut hits
            ));
        });
        assert_eq!(hits, vec![HitResult::MISS]);

        let hit = ctx
            .try_raycast_closest([0.0; 3], [0.0, 0.0, 1.0], 10.0, DEFAULT_QUERY_MASK, None)
            .unwrap();
        assert!(hit.succeeded);
    }

    #[test]
    fn test_managed_raycast_round_trip() {
        let ctx = scene_with_sphere([0.0, 0.0, 5.0]);
        let managed = ManagedRaycast::new();
        managed.request(&ctx, "probe", [0.0; 3], [0.0, 0.0, 10.0], DEFAULT_QUERY_MASK, None);
        assert_eq!(managed.pending_requests(), 1);
        assert!(managed.pop_result().is_none());

        ctx.update(1.0 / 60.0);
        let (hit, _age, tag) = managed.pop_result().unwrap();
        assert_eq!(tag, "probe");
        assert!(hit.succeeded);
        assert_relative_eq!(hit.fraction, 0.4, epsilon = 1e-4);
        assert!(managed.pop_result().is_none());
    }
}
