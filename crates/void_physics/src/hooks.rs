//! Narrow-phase callbacks: pair filtering, material combination and contact recording

use rapier3d::prelude as rapier;

use crate::contact::ContactRecord;
use crate::math::{from_point, from_vector, sub};
use crate::policy;
use crate::registry::{BodyRegistry, Collidable};

/// Hooks installed for the duration of one backend substep
pub(crate) struct ContactHooks<'a> {
    pub(crate) registry: &'a BodyRegistry,
    /// Only the last substep of a step writes contact buffers
    pub(crate) record: bool,
}

impl<'a> ContactHooks<'a> {
    pub(crate) fn new(registry: &'a BodyRegistry, record: bool) -> Self {
        Self { registry, record }
    }
}

/// Record of the manifold's deepest point, seen from collider 1
fn manifold_record(
    manifold: &rapier::ContactManifold,
    collider1: &rapier::Collider,
    collider2: &rapier::Collider,
    normal: &rapier::Vector<f32>,
    a: Collidable,
    b: Collidable,
) -> Option<ContactRecord> {
    let deepest = manifold
        .points
        .iter()
        .min_by(|x, y| x.dist.total_cmp(&y.dist))?;
    let frame = match manifold.subshape_pos1 {
        Some(sub_pos) => collider1.position() * sub_pos,
        None => *collider1.position(),
    };
    let point = from_point(&(frame * deepest.local_p1));
    let a_position = from_vector(collider1.translation());

    Some(ContactRecord {
        a,
        b,
        a_position,
        b_position: from_vector(collider2.translation()),
        normal: from_vector(normal),
        offset: sub(point, a_position),
    })
}

impl rapier::PhysicsHooks for ContactHooks<'_> {
    fn filter_contact_pair(&self, context: &rapier::PairFilterContext) -> Option<rapier::SolverFlags> {
        let (_, a) = self
            .registry
            .resolve_collider(context.colliders.get(context.collider1)?)?;
        let (_, b) = self
            .registry
            .resolve_collider(context.colliders.get(context.collider2)?)?;
        let (a, b) = (a.info(), b.info());

        (policy::allow_pair(&a, &b) && policy::allow_manifold(&a, &b))
            .then_some(rapier::SolverFlags::COMPUTE_IMPULSES)
    }

    fn modify_solver_contacts(&self, context: &mut rapier::ContactModificationContext) {
        let colliders = context.colliders;
        let (Some(collider1), Some(collider2)) = (
            colliders.get(context.collider1),
            colliders.get(context.collider2),
        ) else {
            return;
        };
        let (Some((id1, owner1)), Some((id2, owner2))) = (
            self.registry.resolve_collider(collider1),
            self.registry.resolve_collider(collider2),
        ) else {
            return;
        };
        let (a, b) = (owner1.info(), owner2.info());

        // Solver contacts have no per-contact spring or recovery velocity,
        // so only friction and restitution of the combined material apply.
        let material = policy::combine_material(&a, &b);
        for contact in context.solver_contacts.iter_mut() {
            contact.friction = material.friction;
            contact.restitution = material.restitution;
        }

        if self.record
            && policy::allow_manifold(&a, &b)
            && (a.collect_contacts || b.collect_contacts)
        {
            let record =
                manifold_record(context.manifold, collider1, collider2, context.normal, id1, id2);
            if let Some(record) = record {
                if a.collect_contacts {
                    if let Some(buffer) = owner1.contacts() {
                        buffer.push(record);
                    }
                }
                if b.collect_contacts {
                    if let Some(buffer) = owner2.contacts() {
                        buffer.push(record.swap());
                    }
                }
            }
        }

        if !policy::wants_response(&a, &b) {
            context.solver_contacts.clear();
        }
    }
}
