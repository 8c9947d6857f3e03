//! Collision filtering and pairwise material policy
//!
//! Every collidable carries a group bitmask, a collides-with bitmask and an
//! optional exclusion tag. Two collidables sharing a tag never collide, whatever
//! their masks say.

use serde::{Deserialize, Serialize};

use crate::material::{CombinedMaterial, PhysicsMaterial};

/// Mask accepted by queries that do not restrict groups
pub const DEFAULT_QUERY_MASK: u32 = u32::MAX;

/// A collision layer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollisionLayer(pub u32);

impl CollisionLayer {
    /// Default layer
    pub const DEFAULT: Self = Self(0);
    /// Player layer
    pub const PLAYER: Self = Self(1);
    /// Enemy layer
    pub const ENEMIES: Self = Self(2);
    /// Projectile layer
    pub const PROJECTILES: Self = Self(3);
    /// Trigger/sensor layer
    pub const TRIGGERS: Self = Self(4);
    /// Static environment layer
    pub const ENVIRONMENT: Self = Self(5);

    /// Create a custom layer
    pub const fn custom(id: u32) -> Self {
        Self(id)
    }

    /// Get the layer as a bitmask
    pub const fn as_mask(&self) -> u32 {
        1 << self.0
    }
}

/// How a collidable moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mobility {
    /// Fully simulated
    #[default]
    Dynamic,
    /// Moved by its velocity only; never pushed by contacts
    Kinematic,
    /// Never moves
    Static,
}

/// Group membership, collision mask and exclusion tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionFilter {
    /// Groups this collidable belongs to
    pub group: u32,
    /// Groups this collidable generates contacts with
    pub can_collide_with: u32,
    /// Collidables sharing a tag never collide
    pub exclusion_tag: Option<u32>,
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self {
            group: 1,
            can_collide_with: u32::MAX,
            exclusion_tag: None,
        }
    }
}

impl CollisionFilter {
    /// Create a filter with no exclusion tag
    pub fn new(group: u32, can_collide_with: u32) -> Self {
        Self {
            group,
            can_collide_with,
            exclusion_tag: None,
        }
    }

    /// Create from a single layer that collides with specific layers
    pub fn from_layer(layer: CollisionLayer, collides_with: &[CollisionLayer]) -> Self {
        let can_collide_with = collides_with.iter().fold(0u32, |acc, l| acc | l.as_mask());
        Self::new(layer.as_mask(), can_collide_with)
    }

    /// Set the exclusion tag
    pub fn with_exclusion_tag(mut self, tag: u32) -> Self {
        self.exclusion_tag = Some(tag);
        self
    }

    /// Add a layer to the collides-with mask
    pub fn add_filter(mut self, layer: CollisionLayer) -> Self {
        self.can_collide_with |= layer.as_mask();
        self
    }

    /// Remove a layer from the collides-with mask
    pub fn remove_filter(mut self, layer: CollisionLayer) -> Self {
        self.can_collide_with &= !layer.as_mask();
        self
    }
}

/// Everything the policy needs to know about one side of a pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollidableInfo {
    pub mobility: Mobility,
    pub filter: CollisionFilter,
    pub material: PhysicsMaterial,
    /// Records contacts but never receives a physical response
    pub ghost: bool,
    /// Whether contacts are written to this side's buffer
    pub collect_contacts: bool,
}

impl Default for CollidableInfo {
    fn default() -> Self {
        Self {
            mobility: Mobility::Dynamic,
            filter: CollisionFilter::default(),
            material: PhysicsMaterial::default(),
            ghost: false,
            collect_contacts: false,
        }
    }
}

/// Whether `a` and `b` may generate contacts at all
///
/// At least one side must be dynamic, `a`'s group must be accepted by `b`, and the
/// two must not share an exclusion tag.
pub fn allow_pair(a: &CollidableInfo, b: &CollidableInfo) -> bool {
    let any_dynamic = a.mobility == Mobility::Dynamic || b.mobility == Mobility::Dynamic;
    let same_tag = matches!(
        (a.filter.exclusion_tag, b.filter.exclusion_tag),
        (Some(x), Some(y)) if x == y
    );
    any_dynamic && (a.filter.group & b.filter.can_collide_with) != 0 && !same_tag
}

/// Reverse mask check applied before a manifold is recorded
pub fn allow_manifold(a: &CollidableInfo, b: &CollidableInfo) -> bool {
    (a.filter.can_collide_with & b.filter.group) != 0
}

/// Whether a collidable in `group` is visible to a query using `mask`
#[inline]
pub fn allow_test(group: u32, mask: u32) -> bool {
    (group & mask) != 0
}

/// Whether the solver should push the pair apart
#[inline]
pub fn wants_response(a: &CollidableInfo, b: &CollidableInfo) -> bool {
    !a.ghost && !b.ghost
}

/// Material for a contact between `a` and `b`
pub fn combine_material(a: &CollidableInfo, b: &CollidableInfo) -> CombinedMaterial {
    a.material.combine(&b.material)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(mobility: Mobility, group: u32, mask: u32, tag: Option<u32>) -> CollidableInfo {
        CollidableInfo {
            mobility,
            filter: CollisionFilter {
                group,
                can_collide_with: mask,
                exclusion_tag: tag,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_shared_tag_never_collides() {
        for (ga, ma, gb, mb) in [(1, u32::MAX, 1, u32::MAX), (0b10, 0b01, 0b01, 0b10), (0, 0, 0, 0)] {
            let a = info(Mobility::Dynamic, ga, ma, Some(7));
            let b = info(Mobility::Dynamic, gb, mb, Some(7));
            assert!(!allow_pair(&a, &b));
            assert!(!allow_pair(&b, &a));
        }
    }

    #[test]
    fn test_bitmask_decides_untagged_pairs() {
        let a = info(Mobility::Dynamic, 0b01, u32::MAX, Some(1));
        let b = info(Mobility::Static, 0b10, 0b01, Some(2));
        assert!(allow_pair(&a, &b));

        let b = info(Mobility::Static, 0b10, 0b10, None);
        assert!(!allow_pair(&a, &b));
    }

    #[test]
    fn test_no_tag_does_not_suppress() {
        let a = info(Mobility::Dynamic, 1, u32::MAX, None);
        let b = info(Mobility::Dynamic, 1, u32::MAX, None);
        assert!(allow_pair(&a, &b));
    }

    #[test]
    fn test_immobile_pairs_never_tested() {
        let a = info(Mobility::Static, 1, u32::MAX, None);
        let b = info(Mobility::Kinematic, 1, u32::MAX, None);
        assert!(!allow_pair(&a, &b));
        assert!(!allow_pair(&b, &a));
        assert!(allow_pair(&info(Mobility::Dynamic, 1, u32::MAX, None), &b));
    }

    #[test]
    fn test_layer_filter() {
        let player = CollisionFilter::from_layer(
            CollisionLayer::PLAYER,
            &[CollisionLayer::ENEMIES, CollisionLayer::ENVIRONMENT],
        );
        assert_eq!(player.group, 0b10);
        assert_eq!(player.can_collide_with, 0b100100);
        let player = player.remove_filter(CollisionLayer::ENEMIES);
        assert_eq!(player.can_collide_with, 0b100000);
    }

    #[test]
    fn test_query_mask() {
        assert!(allow_test(0b0110, 0b0100));
        assert!(!allow_test(0b0110, 0b1001));
        assert!(allow_test(1, DEFAULT_QUERY_MASK));
    }

    #[test]
    fn test_ghost_blocks_response_only() {
        let mut a = info(Mobility::Dynamic, 1, u32::MAX, None);
        let b = info(Mobility::Static, 1, u32::MAX, None);
        a.ghost = true;
        assert!(allow_pair(&a, &b));
        assert!(!wants_response(&a, &b));
        assert_eq!(combine_material(&a, &b).friction, 0.25);
    }
}
