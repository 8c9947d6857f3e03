//! Error types for the physics system

use thiserror::Error;

use crate::shape::ShapeId;

/// Physics system errors
#[derive(Debug, Error)]
pub enum PhysicsError {
    /// A convex primitive has a zero or negative dimension
    #[error("{shape} has non-positive extent {value}")]
    NonPositiveExtent { shape: &'static str, value: f32 },

    /// Two corners of a triangle coincide
    #[error("Triangle {index} is degenerate")]
    DegenerateTriangle { index: usize },

    /// A compound was built without children
    #[error("Compound shape has no children")]
    EmptyCompound,

    /// A compound child is itself a compound
    #[error("Compound child {child} is a compound; nested compounds are not supported")]
    NestedCompound { child: usize },

    /// A mesh has no triangles
    #[error("Mesh shape has no triangles")]
    EmptyMesh,

    /// The shape cannot back the requested body
    #[error("Invalid collision shape: {0}")]
    InvalidShape(String),

    /// A body or static description is unusable
    #[error("Invalid body description: {0}")]
    InvalidBody(String),

    /// Index data is malformed or references a missing vertex
    #[error("Invalid index buffer: {0}")]
    InvalidIndexBuffer(String),

    /// Vertex layout does not fit the supplied data
    #[error("Invalid vertex layout: {0}")]
    InvalidVertexLayout(String),

    /// No shape is stored under this id
    #[error("No stored shape with id {0:?}")]
    ShapeNotStored(ShapeId),

    /// Invalid configuration
    #[error("Invalid physics configuration: {0}")]
    InvalidConfig(String),

    /// Worker pool could not be started
    #[error("Failed to start physics worker pool: {0}")]
    ThreadPool(String),
}

impl From<rayon::ThreadPoolBuildError> for PhysicsError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        PhysicsError::ThreadPool(err.to_string())
    }
}

/// Result type for physics operations
pub type Result<T> = std::result::Result<T, PhysicsError>;
