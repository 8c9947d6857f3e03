//! Invariant tests for void_physics
//!
//! Properties the simulation layer must keep no matter how it is driven

use std::sync::Arc;

use approx::assert_relative_eq;
use void_physics::policy::{allow_pair, CollidableInfo};
use void_physics::prelude::*;

fn simulation() -> SimulationContext {
    let _ = env_logger::builder().is_test(true).try_init();
    SimulationContext::new(PhysicsConfig::default().with_worker_threads(2)).unwrap()
}

fn info(mobility: Mobility, filter: CollisionFilter) -> CollidableInfo {
    CollidableInfo {
        mobility,
        filter,
        ..Default::default()
    }
}

/// INVARIANT: two collidables sharing an exclusion tag never collide
#[test]
fn invariant_shared_exclusion_tag_blocks_pair() {
    let masks = [0u32, 1, 0b1010, u32::MAX];
    for &group in &masks {
        for &mask in &masks {
            let a = info(
                Mobility::Dynamic,
                CollisionFilter::new(group, mask).with_exclusion_tag(7),
            );
            let b = info(
                Mobility::Dynamic,
                CollisionFilter::new(mask, group).with_exclusion_tag(7),
            );
            assert!(!allow_pair(&a, &b));
            assert!(!allow_pair(&b, &a));
        }
    }
}

/// INVARIANT: with distinct tags and a dynamic side, the group/mask test decides
#[test]
fn invariant_bitmask_decides_pair() {
    let values = [0u32, 1, 2, 3, 0x8000_0000, u32::MAX];
    for &group in &values {
        for &mask in &values {
            let a = info(
                Mobility::Dynamic,
                CollisionFilter::new(group, u32::MAX).with_exclusion_tag(1),
            );
            let b = info(
                Mobility::Static,
                CollisionFilter::new(u32::MAX, mask).with_exclusion_tag(2),
            );
            assert_eq!(allow_pair(&a, &b), (group & mask) != 0);
        }
    }

    let untagged = info(Mobility::Dynamic, CollisionFilter::default());
    assert!(allow_pair(&untagged, &untagged));

    let wall = info(Mobility::Static, CollisionFilter::default());
    assert!(!allow_pair(&wall, &wall));
}

/// INVARIANT: repeated adds produce one handle; removing a never-added body is a no-op
#[test]
fn invariant_mutation_requests_are_idempotent() {
    let sim = simulation();
    let body = sim
        .create_body(BodyDesc::convex(ConvexShape::sphere(0.5)))
        .unwrap();

    sim.request_add(body.clone()).unwrap();
    sim.request_add(body.clone()).unwrap();
    assert_eq!(sim.pending_count(), (1, 0));
    let report = sim.flush_adds();
    assert_eq!(report.applied, 1);
    assert_eq!(sim.body_count(), 1);
    let handle = body.handle().unwrap();

    // Already live: nothing changes
    sim.request_add(body.clone()).unwrap();
    assert_eq!(sim.flush_adds().skipped, 1);
    assert_eq!(body.handle(), Some(handle));

    let stranger = sim
        .create_body(BodyDesc::convex(ConvexShape::sphere(0.5)))
        .unwrap();
    sim.request_remove(stranger.clone());
    let report = sim.flush_removes();
    assert_eq!(report.applied, 0);
    assert_eq!(sim.body_count(), 1);
    assert!(!stranger.is_live());
}

/// INVARIANT: swapping a contact twice restores it, and one swap rebases the offset
#[test]
fn invariant_contact_swap_is_an_involution() {
    let record = ContactRecord {
        a: Collidable::Body(BodyHandle::new(1, 0)),
        b: Collidable::Static(StaticHandle::new(4, 2)),
        a_position: [1.0, 2.0, 3.0],
        b_position: [4.0, 0.0, -1.0],
        normal: [0.0, 1.0, 0.0],
        offset: [0.5, -0.5, 0.25],
    };

    let swapped = record.swap();
    assert_eq!(swapped.a, record.b);
    assert_eq!(swapped.b, record.a);
    assert_eq!(swapped.normal, [0.0, -1.0, 0.0]);
    for i in 0..3 {
        // Same world point, expressed from the new side A
        assert_relative_eq!(
            swapped.offset[i],
            record.a_position[i] + record.offset[i] - record.b_position[i]
        );
        assert_relative_eq!(swapped.point()[i], record.point()[i]);
    }

    let back = swapped.swap();
    assert_eq!(back.a, record.a);
    assert_eq!(back.b, record.b);
    assert_eq!(back.normal, record.normal);
    for i in 0..3 {
        assert_relative_eq!(back.offset[i], record.offset[i], epsilon = 1e-6);
    }
}

/// INVARIANT: a body never keeps more contacts than its capacity
#[test]
fn invariant_contact_writes_are_bounded() {
    let sim = simulation();
    sim.set_gravity([0.0; 3]);

    let body = sim
        .create_body(BodyDesc::convex(ConvexShape::sphere(1.0)).with_contact_capacity(2))
        .unwrap();
    sim.request_add(body.clone()).unwrap();

    let around = [
        [1.2, 0.0, 0.0],
        [-1.2, 0.0, 0.0],
        [0.0, 1.2, 0.0],
        [0.0, -1.2, 0.0],
        [0.0, 0.0, 1.2],
    ];
    for position in around {
        let rock = sim
            .create_static(StaticDesc::convex(ConvexShape::sphere(0.5)).at(position))
            .unwrap();
        sim.request_add(rock).unwrap();
    }

    sim.update(1.0 / 60.0);
    assert_eq!(body.contact_capacity(), 2);
    assert_eq!(body.contact_count(), 2);
    assert_eq!(body.contacts().len(), 2);
}

/// INVARIANT: a ray toward a unit sphere reports its front surface
#[test]
fn invariant_raycast_hits_sphere_surface() {
    let sim = simulation();
    let sphere = sim
        .create_static(StaticDesc::convex(ConvexShape::sphere(1.0)).at([0.0, 0.0, 5.0]))
        .unwrap();
    sim.request_add(sphere.clone()).unwrap();
    sim.update(1.0 / 60.0);

    let hit = sim.raycast_closest([0.0; 3], [0.0, 0.0, 1.0], 10.0, DEFAULT_QUERY_MASK, None);
    assert!(hit.succeeded);
    assert_relative_eq!(hit.fraction, 0.4, epsilon = 1e-4);
    assert_relative_eq!(hit.distance, 4.0, epsilon = 1e-4);
    assert_relative_eq!(hit.normal[0], 0.0, epsilon = 1e-4);
    assert_relative_eq!(hit.normal[1], 0.0, epsilon = 1e-4);
    assert_relative_eq!(hit.normal[2], -1.0, epsilon = 1e-4);
    assert_eq!(hit.collidable, sphere.collidable());
}

/// INVARIANT: mesh extraction keeps triangles in index order with their positions
#[test]
fn invariant_quad_extracts_two_triangles() {
    let sim = simulation();
    let positions: [[f32; 3]; 4] = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 0.0, 1.0],
        [0.0, 0.0, 1.0],
    ];
    let indices: [u16; 6] = [0, 1, 2, 0, 2, 3];

    let vertex_bytes: &[u8] = bytemuck::cast_slice(&positions);
    let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
    let vertices = VertexBuffer::new(vertex_bytes, VertexLayout::positions_only(), 0).unwrap();
    let indices = IndexBuffer::packed(index_bytes, IndexFormat::U16);

    let mesh = build_mesh_from_buffers(sim.pools(), &vertices, &indices, [1.0; 3]).unwrap();
    assert_eq!(mesh.triangle_count(), 2);
    assert_eq!(mesh.triangles()[0], [positions[0], positions[1], positions[2]]);
    assert_eq!(mesh.triangles()[1], [positions[0], positions[2], positions[3]]);
}

/// INVARIANT: an immediate clear with disposal leaves no handles and no pooled buffers
#[test]
fn invariant_clear_resets_everything() {
    let sim = simulation();

    let ground: Vec<Triangle> = (0..16)
        .map(|i| {
            let x = i as f32;
            [[x, 0.0, 0.0], [x + 1.0, 0.0, 0.0], [x, 0.0, 1.0]]
        })
        .collect();
    let mesh = build_mesh_from_triangles(sim.pools(), &ground, [1.0; 3]).unwrap();
    let terrain = sim
        .create_static(StaticDesc::new(Arc::new(Shape::Mesh(mesh))).dispose_mesh_on_detach())
        .unwrap();
    sim.request_add(terrain.clone()).unwrap();

    let bodies: Vec<_> = (0..8)
        .map(|i| {
            let body = sim
                .create_body(
                    BodyDesc::convex(ConvexShape::sphere(0.25)).at([i as f32, 2.0, 0.5]),
                )
                .unwrap();
            sim.request_add(body.clone()).unwrap();
            body
        })
        .collect();

    sim.update(1.0 / 60.0);
    assert_eq!(sim.live_handle_count(), 9);
    assert!(sim.pools().outstanding() > 0);

    sim.clear(true, true);

    assert_eq!(sim.live_handle_count(), 0);
    assert_eq!(sim.body_count(), 0);
    assert_eq!(sim.static_count(), 0);
    assert_eq!(sim.pools().outstanding(), 0);
    assert!(bodies.iter().all(|b| !b.is_live() && b.contact_count() == 0));
    assert!(!terrain.is_live());

    let hit = sim.raycast_closest([0.5, 5.0, 0.2], [0.0, -1.0, 0.0], 10.0, DEFAULT_QUERY_MASK, None);
    assert!(!hit.succeeded);
}
