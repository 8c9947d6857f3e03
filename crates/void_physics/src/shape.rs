//! Collision shapes
//!
//! Shapes form a closed set: a single convex primitive, a compound of convex
//! children, or a triangle mesh whose triangles live in a pooled buffer.

use std::fmt;

use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};
use void_memory::PooledBuffer;

use crate::error::{PhysicsError, Result};
use crate::math::{to_point, to_rotation, to_vector};

/// Three world-or-local corners of a triangle
pub type Triangle = [[f32; 3]; 3];

/// Identifier of a shape kept in a [`crate::store::ShapeStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShapeId(pub u64);

/// Convex primitives. Dimensions are half-sizes; capsules and cylinders are Y-aligned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConvexShape {
    Sphere { radius: f32 },
    Box { half_extents: [f32; 3] },
    Capsule { half_height: f32, radius: f32 },
    Cylinder { half_height: f32, radius: f32 },
    Triangle { a: [f32; 3], b: [f32; 3], c: [f32; 3] },
}

fn positive(shape: &'static str, value: f32) -> Result<()> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(PhysicsError::NonPositiveExtent { shape, value })
    }
}

fn check_triangle(index: usize, tri: &Triangle) -> Result<()> {
    if tri[0] == tri[1] || tri[0] == tri[2] || tri[1] == tri[2] {
        return Err(PhysicsError::DegenerateTriangle { index });
    }
    Ok(())
}

impl ConvexShape {
    /// Create a sphere
    pub fn sphere(radius: f32) -> Self {
        ConvexShape::Sphere { radius }
    }

    /// Create a box from half extents
    pub fn cuboid(hx: f32, hy: f32, hz: f32) -> Self {
        ConvexShape::Box {
            half_extents: [hx, hy, hz],
        }
    }

    /// Create a Y-aligned capsule
    pub fn capsule(half_height: f32, radius: f32) -> Self {
        ConvexShape::Capsule { half_height, radius }
    }

    /// Create a Y-aligned cylinder
    pub fn cylinder(half_height: f32, radius: f32) -> Self {
        ConvexShape::Cylinder { half_height, radius }
    }

    /// Reject primitives with non-positive extents and degenerate triangles
    pub fn sanity_check(&self) -> Result<()> {
        match *self {
            ConvexShape::Sphere { radius } => positive("sphere radius", radius),
            ConvexShape::Box { half_extents } => {
                for extent in half_extents {
                    positive("box half extent", extent)?;
                }
                Ok(())
            }
            ConvexShape::Capsule {
                half_height,
                radius,
            } => {
                positive("capsule half height", half_height)?;
                positive("capsule radius", radius)
            }
            ConvexShape::Cylinder {
                half_height,
                radius,
            } => {
                positive("cylinder half height", half_height)?;
                positive("cylinder radius", radius)
            }
            ConvexShape::Triangle { a, b, c } => check_triangle(0, &[a, b, c]),
        }
    }

    pub(crate) fn to_shared_shape(&self) -> rapier::SharedShape {
        match *self {
            ConvexShape::Sphere { radius } => rapier::SharedShape::ball(radius),
            ConvexShape::Box { half_extents: h } => rapier::SharedShape::cuboid(h[0], h[1], h[2]),
            ConvexShape::Capsule {
                half_height,
                radius,
            } => rapier::SharedShape::capsule_y(half_height, radius),
            ConvexShape::Cylinder {
                half_height,
                radius,
            } => rapier::SharedShape::cylinder(half_height, radius),
            ConvexShape::Triangle { a, b, c } => {
                rapier::SharedShape::triangle(to_point(a), to_point(b), to_point(c))
            }
        }
    }
}

/// One convex child of a compound, in the compound's local frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompoundChild {
    pub shape: ConvexShape,
    pub offset: [f32; 3],
    /// Quaternion as `[x, y, z, w]`
    pub rotation: [f32; 4],
    /// Relative mass of this child
    pub weight: f32,
}

impl CompoundChild {
    pub(crate) fn local_isometry(&self) -> rapier::Isometry<f32> {
        rapier::Isometry::from_parts(to_vector(self.offset).into(), to_rotation(self.rotation))
    }
}

/// Compound of convex children
///
/// A dynamic-capable compound carries weighted inertia and may back a dynamic
/// body. A kinematic-only compound may only back statics and kinematic bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundShape {
    pub(crate) children: Vec<CompoundChild>,
    pub(crate) dynamic: bool,
}

impl CompoundShape {
    pub fn children(&self) -> &[CompoundChild] {
        &self.children
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Sum of child weights
    pub fn total_weight(&self) -> f32 {
        self.children.iter().map(|c| c.weight).sum()
    }

    /// Weight-averaged child offset
    pub fn center_of_mass(&self) -> [f32; 3] {
        let total = self.total_weight();
        if total <= 0.0 {
            return [0.0; 3];
        }
        let mut com = [0.0f32; 3];
        for child in &self.children {
            for (axis, value) in com.iter_mut().enumerate() {
                *value += child.offset[axis] * child.weight / total;
            }
        }
        com
    }

    pub(crate) fn sanity_check(&self) -> Result<()> {
        if self.children.is_empty() {
            return Err(PhysicsError::EmptyCompound);
        }
        for child in &self.children {
            child.shape.sanity_check()?;
            if !(child.weight > 0.0) {
                return Err(PhysicsError::NonPositiveExtent {
                    shape: "compound child weight",
                    value: child.weight,
                });
            }
        }
        Ok(())
    }
}

/// Triangle mesh backed by a pooled triangle buffer
pub struct MeshShape {
    triangles: PooledBuffer<Triangle>,
    scale: [f32; 3],
}

impl MeshShape {
    /// Wrap an extracted triangle buffer
    pub fn new(triangles: PooledBuffer<Triangle>, scale: [f32; 3]) -> Result<Self> {
        let mesh = Self { triangles, scale };
        mesh.sanity_check()?;
        Ok(mesh)
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn scale(&self) -> [f32; 3] {
        self.scale
    }

    /// Return the triangle buffer to its pool now
    pub fn release(self) {
        self.triangles.release();
    }

    fn sanity_check(&self) -> Result<()> {
        if self.triangles.is_empty() {
            return Err(PhysicsError::EmptyMesh);
        }
        for (i, axis) in self.scale.iter().enumerate() {
            if *axis == 0.0 || !axis.is_finite() {
                return Err(PhysicsError::InvalidShape(format!(
                    "mesh scale axis {} is {}",
                    i, axis
                )));
            }
        }
        Ok(())
    }

    /// Index of the first triangle with coincident corners
    pub fn first_degenerate(&self) -> Option<usize> {
        self.triangles
            .iter()
            .enumerate()
            .find_map(|(i, tri)| check_triangle(i, tri).err().map(|_| i))
    }

    fn to_shared_shape(&self) -> rapier::SharedShape {
        let s = self.scale;
        let mut vertices = Vec::with_capacity(self.triangles.len() * 3);
        let mut indices = Vec::with_capacity(self.triangles.len());
        for (i, tri) in self.triangles.iter().enumerate() {
            for corner in tri {
                vertices.push(rapier::Point::new(
                    corner[0] * s[0],
                    corner[1] * s[1],
                    corner[2] * s[2],
                ));
            }
            let base = (i * 3) as u32;
            indices.push([base, base + 1, base + 2]);
        }
        rapier::SharedShape::trimesh(vertices, indices)
    }
}

impl fmt::Debug for MeshShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshShape")
            .field("triangles", &self.triangles.len())
            .field("scale", &self.scale)
            .finish()
    }
}

/// Which variant a [`Shape`] is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    Convex,
    Compound,
    Mesh,
}

/// A collision shape
#[derive(Debug)]
pub enum Shape {
    Convex(ConvexShape),
    Compound(CompoundShape),
    Mesh(MeshShape),
}

impl From<ConvexShape> for Shape {
    fn from(shape: ConvexShape) -> Self {
        Shape::Convex(shape)
    }
}

impl From<CompoundShape> for Shape {
    fn from(shape: CompoundShape) -> Self {
        Shape::Compound(shape)
    }
}

impl From<MeshShape> for Shape {
    fn from(shape: MeshShape) -> Self {
        Shape::Mesh(shape)
    }
}

impl Shape {
    pub fn kind(&self) -> ShapeKind {
        match self {
            Shape::Convex(_) => ShapeKind::Convex,
            Shape::Compound(_) => ShapeKind::Compound,
            Shape::Mesh(_) => ShapeKind::Mesh,
        }
    }

    /// Validate extents, triangles and child lists
    pub fn sanity_check(&self) -> Result<()> {
        match self {
            Shape::Convex(convex) => convex.sanity_check(),
            Shape::Compound(compound) => compound.sanity_check(),
            Shape::Mesh(mesh) => mesh.sanity_check(),
        }
    }

    /// Whether this shape may back a dynamic body
    pub fn supports_dynamic(&self) -> bool {
        match self {
            Shape::Compound(compound) => compound.dynamic,
            Shape::Convex(_) | Shape::Mesh(_) => true,
        }
    }

    /// Unwrap the mesh triangles, if this is a mesh
    pub fn as_mesh(&self) -> Option<&MeshShape> {
        match self {
            Shape::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub(crate) fn to_shared_shape(&self) -> Result<rapier::SharedShape> {
        self.sanity_check()?;
        Ok(match self {
            Shape::Convex(convex) => convex.to_shared_shape(),
            Shape::Compound(compound) => rapier::SharedShape::compound(
                compound
                    .children
                    .iter()
                    .map(|c| (c.local_isometry(), c.shape.to_shared_shape()))
                    .collect(),
            ),
            Shape::Mesh(mesh) => mesh.to_shared_shape(),
        })
    }

    /// Mass properties scaled to `mass`
    ///
    /// Compound children contribute in proportion to their weight. Shapes without
    /// volume fall back to a solid sphere's inertia.
    pub(crate) fn mass_properties(
        &self,
        shared: &rapier::SharedShape,
        mass: f32,
    ) -> rapier::MassProperties {
        let mut props = match self {
            Shape::Compound(compound) if compound.dynamic => compound
                .children
                .iter()
                .map(|c| {
                    let mut child = c.shape.to_shared_shape().mass_properties(1.0);
                    if child.mass() > f32::EPSILON {
                        child.set_mass(c.weight, true);
                    }
                    child.transform_by(&c.local_isometry())
                })
                .sum(),
            _ => shared.mass_properties(1.0),
        };

        if props.mass() > f32::EPSILON && props.mass().is_finite() {
            props.set_mass(mass, true);
            props
        } else {
            let inertia = 0.4 * mass;
            rapier::MassProperties::new(
                rapier::Point::origin(),
                mass,
                rapier::Vector::new(inertia, inertia, inertia),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanity_rejects_non_positive_extents() {
        assert!(ConvexShape::sphere(1.0).sanity_check().is_ok());
        assert!(matches!(
            ConvexShape::sphere(0.0).sanity_check(),
            Err(PhysicsError::NonPositiveExtent { .. })
        ));
        assert!(ConvexShape::cuboid(1.0, -1.0, 1.0).sanity_check().is_err());
        assert!(ConvexShape::capsule(0.0, 1.0).sanity_check().is_err());
        assert!(ConvexShape::cylinder(1.0, 0.0).sanity_check().is_err());
    }

    #[test]
    fn test_sanity_rejects_degenerate_triangle() {
        let tri = ConvexShape::Triangle {
            a: [0.0; 3],
            b: [1.0, 0.0, 0.0],
            c: [0.0; 3],
        };
        assert!(matches!(
            tri.sanity_check(),
            Err(PhysicsError::DegenerateTriangle { index: 0 })
        ));
    }

    #[test]
    fn test_empty_compound_rejected() {
        let shape = Shape::Compound(CompoundShape {
            children: Vec::new(),
            dynamic: true,
        });
        assert!(matches!(shape.sanity_check(), Err(PhysicsError::EmptyCompound)));
    }

    #[test]
    fn test_compound_center_of_mass_is_weighted() {
        let child = |x: f32, weight: f32| CompoundChild {
            shape: ConvexShape::sphere(0.5),
            offset: [x, 0.0, 0.0],
            rotation: crate::math::IDENTITY_ROTATION,
            weight,
        };
        let compound = CompoundShape {
            children: vec![child(0.0, 3.0), child(4.0, 1.0)],
            dynamic: true,
        };
        assert_eq!(compound.center_of_mass(), [1.0, 0.0, 0.0]);
        assert_eq!(compound.total_weight(), 4.0);
    }

    #[test]
    fn test_mass_properties_match_requested_mass() {
        let shape = Shape::Convex(ConvexShape::cuboid(1.0, 2.0, 0.5));
        let shared = shape.to_shared_shape().unwrap();
        let props = shape.mass_properties(&shared, 5.0);
        assert!((props.mass() - 5.0).abs() < 1e-4);

        let flat = Shape::Convex(ConvexShape::Triangle {
            a: [0.0; 3],
            b: [1.0, 0.0, 0.0],
            c: [0.0, 1.0, 0.0],
        });
        let shared = flat.to_shared_shape().unwrap();
        assert!((flat.mass_properties(&shared, 2.0).mass() - 2.0).abs() < 1e-4);
    }
}
