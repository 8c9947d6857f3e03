//! Shape construction helpers
//!
//! Compounds are assembled from already-built shapes; only convex children are
//! accepted. The bounds helpers turn an axis-aligned box into a primitive and, when
//! the box is off-centre, wrap the primitive in a one-child compound at that centre.

use serde::{Deserialize, Serialize};

use crate::error::{PhysicsError, Result};
use crate::math::{length_squared, IDENTITY_ROTATION};
use crate::shape::{CompoundChild, CompoundShape, ConvexShape, Shape};

/// Centre distance (squared) beyond which bounds helpers add an offset compound
const OFFSET_THRESHOLD_SQ: f32 = 0.01;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point
    pub fn from_points(points: &[[f32; 3]]) -> Option<Self> {
        let first = *points.first()?;
        Some(points.iter().fold(Self::new(first, first), |b, p| Self {
            min: [b.min[0].min(p[0]), b.min[1].min(p[1]), b.min[2].min(p[2])],
            max: [b.max[0].max(p[0]), b.max[1].max(p[1]), b.max[2].max(p[2])],
        }))
    }

    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Half size along each axis
    pub fn extent(&self) -> [f32; 3] {
        [
            (self.max[0] - self.min[0]) * 0.5,
            (self.max[1] - self.min[1]) * 0.5,
            (self.max[2] - self.min[2]) * 0.5,
        ]
    }

    fn scaled(self, scale: [f32; 3]) -> Self {
        Self {
            min: [self.min[0] * scale[0], self.min[1] * scale[1], self.min[2] * scale[2]],
            max: [self.max[0] * scale[0], self.max[1] * scale[1], self.max[2] * scale[2]],
        }
    }
}

/// Accumulates children for a compound shape
#[derive(Debug, Default)]
pub struct CompoundBuilder {
    children: Vec<CompoundChild>,
    seen: usize,
    rejected: Option<PhysicsError>,
}

impl CompoundBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            children: Vec::with_capacity(capacity),
            seen: 0,
            rejected: None,
        }
    }

    /// Add a convex child with unit weight
    pub fn add(self, shape: ConvexShape, offset: [f32; 3], rotation: [f32; 4]) -> Self {
        self.add_weighted(shape, offset, rotation, 1.0)
    }

    /// Add a convex child with an explicit relative mass
    pub fn add_weighted(
        mut self,
        shape: ConvexShape,
        offset: [f32; 3],
        rotation: [f32; 4],
        weight: f32,
    ) -> Self {
        self.seen += 1;
        self.children.push(CompoundChild {
            shape,
            offset,
            rotation,
            weight,
        });
        self
    }

    /// Add any shape; compounds and meshes are recorded as an error for `build`
    pub fn add_shape(mut self, shape: &Shape, offset: [f32; 3], rotation: [f32; 4]) -> Self {
        let child = self.seen;
        match shape {
            Shape::Convex(convex) => return self.add(*convex, offset, rotation),
            Shape::Compound(_) => {
                self.rejected
                    .get_or_insert(PhysicsError::NestedCompound { child });
            }
            Shape::Mesh(_) => {
                self.rejected.get_or_insert(PhysicsError::InvalidShape(format!(
                    "compound child {} is a mesh; only convex children are supported",
                    child
                )));
            }
        }
        self.seen += 1;
        self
    }

    /// Finish the compound. `dynamic` selects weighted inertia for dynamic bodies.
    pub fn build(self, dynamic: bool) -> Result<CompoundShape> {
        if let Some(err) = self.rejected {
            return Err(err);
        }
        let compound = CompoundShape {
            children: self.children,
            dynamic,
        };
        compound.sanity_check()?;
        Ok(compound)
    }
}

/// Build a compound from parallel lists of shapes, offsets and rotations
///
/// Missing offsets and rotations default to the origin and identity.
pub fn build_compound(
    shapes: &[Shape],
    offsets: Option<&[[f32; 3]]>,
    rotations: Option<&[[f32; 4]]>,
    dynamic: bool,
) -> Result<CompoundShape> {
    if shapes.is_empty() {
        return Err(PhysicsError::EmptyCompound);
    }
    let builder = shapes
        .iter()
        .enumerate()
        .fold(CompoundBuilder::with_capacity(shapes.len()), |b, (i, shape)| {
            let offset = offsets.and_then(|o| o.get(i)).copied().unwrap_or([0.0; 3]);
            let rotation = rotations
                .and_then(|r| r.get(i))
                .copied()
                .unwrap_or(IDENTITY_ROTATION);
            b.add_shape(shape, offset, rotation)
        });
    builder.build(dynamic)
}

/// Move a convex shape away from its body origin using a one-child compound
///
/// With neither offset nor rotation the shape is returned as-is.
pub fn offset_single_shape(
    shape: ConvexShape,
    offset: Option<[f32; 3]>,
    rotation: Option<[f32; 4]>,
    kinematic: bool,
) -> Result<Shape> {
    if offset.is_none() && rotation.is_none() {
        shape.sanity_check()?;
        return Ok(Shape::Convex(shape));
    }
    let compound = CompoundBuilder::with_capacity(1)
        .add(
            shape,
            offset.unwrap_or([0.0; 3]),
            rotation.unwrap_or(IDENTITY_ROTATION),
        )
        .build(!kinematic)?;
    Ok(Shape::Compound(compound))
}

fn centred(shape: ConvexShape, center: [f32; 3], allow_offset: bool) -> Result<Shape> {
    if allow_offset && length_squared(center) > OFFSET_THRESHOLD_SQ {
        offset_single_shape(shape, Some(center), None, false)
    } else {
        shape.sanity_check()?;
        Ok(Shape::Convex(shape))
    }
}

/// Box filling `bounds`
pub fn box_of_bounds(bounds: Bounds, scale: Option<[f32; 3]>, allow_offset: bool) -> Result<Shape> {
    let bounds = scale.map_or(bounds, |s| bounds.scaled(s));
    let e = bounds.extent();
    centred(ConvexShape::cuboid(e[0], e[1], e[2]), bounds.center(), allow_offset)
}

/// Sphere reaching the largest half extent of `bounds`
pub fn sphere_of_bounds(bounds: Bounds, scale: f32, allow_offset: bool) -> Result<Shape> {
    let e = bounds.extent();
    let radius = e[0].max(e[1]).max(e[2]) * scale;
    centred(ConvexShape::sphere(radius), bounds.center(), allow_offset)
}

fn axis_radius_and_half_height(bounds: &Bounds, xz_radius: bool) -> (f32, f32) {
    let e = bounds.extent();
    if xz_radius {
        (e[0].max(e[2]), e[1])
    } else {
        (e[1], e[0].max(e[2]))
    }
}

/// Y-aligned capsule around `bounds`
///
/// With `xz_radius` the radius spans the horizontal extent; otherwise the
/// vertical extent becomes the radius.
pub fn capsule_of_bounds(
    bounds: Bounds,
    scale: Option<[f32; 3]>,
    xz_radius: bool,
    allow_offset: bool,
) -> Result<Shape> {
    let bounds = scale.map_or(bounds, |s| bounds.scaled(s));
    let (radius, half_height) = axis_radius_and_half_height(&bounds, xz_radius);
    centred(ConvexShape::capsule(half_height, radius), bounds.center(), allow_offset)
}

/// Y-aligned cylinder around `bounds`
pub fn cylinder_of_bounds(
    bounds: Bounds,
    scale: Option<[f32; 3]>,
    xz_radius: bool,
    allow_offset: bool,
) -> Result<Shape> {
    let bounds = scale.map_or(bounds, |s| bounds.scaled(s));
    let (radius, half_height) = axis_radius_and_half_height(&bounds, xz_radius);
    centred(ConvexShape::cylinder(half_height, radius), bounds.center(), allow_offset)
}
