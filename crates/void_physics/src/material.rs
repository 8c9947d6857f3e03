//! Surface materials and their pairwise combination

use serde::{Deserialize, Serialize};

/// Contact spring stiffness
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpringSettings {
    /// Target oscillation frequency of the contact constraint
    pub frequency: f32,
    /// Twice the damping ratio
    pub twice_damping_ratio: f32,
}

impl Default for SpringSettings {
    fn default() -> Self {
        Self {
            frequency: 30.0,
            twice_damping_ratio: 20.0,
        }
    }
}

/// Surface properties of a body or static collider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsMaterial {
    /// Friction coefficient (0 = frictionless)
    pub friction: f32,
    /// Restitution/bounciness (0 = no bounce, 1 = perfect bounce)
    pub restitution: f32,
    /// Cap on the velocity used to push penetrating bodies apart
    pub max_recovery_velocity: f32,
    /// Contact spring settings
    pub spring: SpringSettings,
}

impl Default for PhysicsMaterial {
    fn default() -> Self {
        Self {
            friction: 0.5,
            restitution: 0.0,
            max_recovery_velocity: 2.0,
            spring: SpringSettings::default(),
        }
    }
}

impl PhysicsMaterial {
    /// Create a new physics material
    pub fn new(friction: f32, restitution: f32) -> Self {
        Self {
            friction,
            restitution,
            ..Default::default()
        }
    }

    /// Frictionless ice-like material
    pub fn ice() -> Self {
        Self {
            friction: 0.05,
            ..Default::default()
        }
    }

    /// Bouncy rubber-like material
    pub fn rubber() -> Self {
        Self {
            friction: 0.8,
            restitution: 0.8,
            max_recovery_velocity: 4.0,
            ..Default::default()
        }
    }

    /// Set friction
    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction.max(0.0);
        self
    }

    /// Set restitution
    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution.clamp(0.0, 1.0);
        self
    }

    /// Set the recovery velocity cap
    pub fn with_max_recovery_velocity(mut self, velocity: f32) -> Self {
        self.max_recovery_velocity = velocity.max(0.0);
        self
    }

    /// Set contact spring settings
    pub fn with_spring(mut self, frequency: f32, twice_damping_ratio: f32) -> Self {
        self.spring = SpringSettings {
            frequency,
            twice_damping_ratio,
        };
        self
    }

    /// Combine with the material on the other side of a contact
    ///
    /// Friction multiplies; everything else is averaged.
    pub fn combine(&self, other: &PhysicsMaterial) -> CombinedMaterial {
        CombinedMaterial {
            friction: self.friction * other.friction,
            restitution: (self.restitution + other.restitution) * 0.5,
            max_recovery_velocity: (self.max_recovery_velocity + other.max_recovery_velocity)
                * 0.5,
            spring: SpringSettings {
                frequency: (self.spring.frequency + other.spring.frequency) * 0.5,
                twice_damping_ratio: (self.spring.twice_damping_ratio
                    + other.spring.twice_damping_ratio)
                    * 0.5,
            },
        }
    }
}

/// Material parameters for one contact pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombinedMaterial {
    pub friction: f32,
    pub restitution: f32,
    pub max_recovery_velocity: f32,
    pub spring: SpringSettings,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_combine_friction_product_rest_mean() {
        let a = PhysicsMaterial::new(0.5, 0.2).with_spring(30.0, 20.0);
        let b = PhysicsMaterial::new(0.8, 0.6)
            .with_spring(10.0, 4.0)
            .with_max_recovery_velocity(4.0);
        let c = a.combine(&b);
        assert_relative_eq!(c.friction, 0.4);
        assert_relative_eq!(c.restitution, 0.4);
        assert_relative_eq!(c.max_recovery_velocity, 3.0);
        assert_relative_eq!(c.spring.frequency, 20.0);
        assert_relative_eq!(c.spring.twice_damping_ratio, 12.0);
    }

    #[test]
    fn test_combine_is_symmetric() {
        let a = PhysicsMaterial::rubber();
        let b = PhysicsMaterial::ice();
        assert_eq!(a.combine(&b), b.combine(&a));
    }
}
