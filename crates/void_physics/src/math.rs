//! Plain-array math types used on the public surface, and their Rapier conversions

use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};

/// Identity rotation as `[x, y, z, w]`
pub const IDENTITY_ROTATION: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// World-space position and orientation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: [f32; 3],
    /// Quaternion as `[x, y, z, w]`
    pub rotation: [f32; 4],
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: [0.0; 3],
        rotation: IDENTITY_ROTATION,
    };

    /// Pose at `position` with no rotation
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            rotation: IDENTITY_ROTATION,
        }
    }

    pub fn new(position: [f32; 3], rotation: [f32; 4]) -> Self {
        Self { position, rotation }
    }

    pub(crate) fn to_isometry(self) -> rapier::Isometry<f32> {
        rapier::Isometry::from_parts(
            Translation3::new(self.position[0], self.position[1], self.position[2]),
            to_rotation(self.rotation),
        )
    }

    pub(crate) fn from_isometry(iso: &rapier::Isometry<f32>) -> Self {
        Self {
            position: from_vector(&iso.translation.vector),
            rotation: from_rotation(&iso.rotation),
        }
    }
}

#[inline]
pub(crate) fn to_vector(v: [f32; 3]) -> rapier::Vector<f32> {
    rapier::Vector::new(v[0], v[1], v[2])
}

#[inline]
pub(crate) fn to_point(v: [f32; 3]) -> rapier::Point<f32> {
    rapier::Point::new(v[0], v[1], v[2])
}

#[inline]
pub(crate) fn from_vector(v: &rapier::Vector<f32>) -> [f32; 3] {
    [v.x, v.y, v.z]
}

#[inline]
pub(crate) fn from_point(p: &rapier::Point<f32>) -> [f32; 3] {
    [p.x, p.y, p.z]
}

/// Unit quaternion from `[x, y, z, w]`; degenerate input becomes identity
pub(crate) fn to_rotation(q: [f32; 4]) -> UnitQuaternion<f32> {
    let raw = Quaternion::new(q[3], q[0], q[1], q[2]);
    if raw.norm_squared() <= f32::EPSILON {
        UnitQuaternion::identity()
    } else {
        UnitQuaternion::from_quaternion(raw)
    }
}

pub(crate) fn from_rotation(q: &UnitQuaternion<f32>) -> [f32; 4] {
    [q.i, q.j, q.k, q.w]
}

#[inline]
pub(crate) fn length_squared(v: [f32; 3]) -> f32 {
    v[0] * v[0] + v[1] * v[1] + v[2] * v[2]
}

#[inline]
pub(crate) fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub(crate) fn add(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub(crate) fn neg(a: [f32; 3]) -> [f32; 3] {
    [-a[0], -a[1], -a[2]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pose_isometry_roundtrip() {
        let half = std::f32::consts::FRAC_1_SQRT_2;
        let pose = Pose::new([1.0, 2.0, 3.0], [0.0, half, 0.0, half]);
        let back = Pose::from_isometry(&pose.to_isometry());
        for i in 0..3 {
            assert_relative_eq!(back.position[i], pose.position[i]);
        }
        for i in 0..4 {
            assert_relative_eq!(back.rotation[i], pose.rotation[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_zero_quaternion_is_identity() {
        assert_eq!(to_rotation([0.0; 4]), UnitQuaternion::identity());
    }
}
