//! Triangle extraction from renderer vertex/index blocks
//!
//! The renderer hands over raw byte blocks: a vertex block with a stride and the
//! byte offset of the position attribute, and a 16- or 32-bit index block. Triangles
//! are resolved straight from those blocks into one pre-sized pooled buffer. The
//! triangle range is split into fixed-size chunks that rayon workers fill in
//! parallel; chunks are disjoint so no locking happens while writing.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use void_memory::PoolRegistry;

use crate::error::{PhysicsError, Result};
use crate::shape::{MeshShape, Triangle};

/// Triangles written by one parallel task
const TRIANGLES_PER_TASK: usize = 256;

/// Width of one index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn size(&self) -> usize {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// Read-only view of a renderer index block
#[derive(Debug, Clone, Copy)]
pub struct IndexBuffer<'a> {
    data: &'a [u8],
    format: IndexFormat,
    offset: usize,
    count: usize,
}

impl<'a> IndexBuffer<'a> {
    /// View `count` indices starting `offset` bytes into `data`
    pub fn new(data: &'a [u8], format: IndexFormat, offset: usize, count: usize) -> Result<Self> {
        let end = count
            .checked_mul(format.size())
            .and_then(|len| len.checked_add(offset));
        match end {
            Some(end) if end <= data.len() => Ok(Self {
                data,
                format,
                offset,
                count,
            }),
            _ => Err(PhysicsError::InvalidIndexBuffer(format!(
                "{} {:?} indices at offset {} overrun a {} byte block",
                count,
                format,
                offset,
                data.len()
            ))),
        }
    }

    /// View a whole block of tightly packed indices
    pub fn packed(data: &'a [u8], format: IndexFormat) -> Self {
        Self {
            data,
            format,
            offset: 0,
            count: data.len() / format.size(),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn format(&self) -> IndexFormat {
        self.format
    }

    /// Index `i`, widened to 32 bits
    pub fn get(&self, i: usize) -> Option<u32> {
        if i >= self.count {
            return None;
        }
        let start = self.offset + i * self.format.size();
        match self.format {
            IndexFormat::U16 => self
                .data
                .get(start..start + 2)
                .map(|b| bytemuck::pod_read_unaligned::<u16>(b) as u32),
            IndexFormat::U32 => self
                .data
                .get(start..start + 4)
                .map(bytemuck::pod_read_unaligned::<u32>),
        }
    }
}

/// Where the position attribute sits inside each vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexLayout {
    /// Bytes between consecutive vertices
    pub stride: usize,
    /// Byte offset of the three `f32` position components
    pub position_offset: usize,
}

impl VertexLayout {
    const POSITION_SIZE: usize = std::mem::size_of::<[f32; 3]>();

    pub fn new(stride: usize, position_offset: usize) -> Result<Self> {
        let layout = Self {
            stride,
            position_offset,
        };
        if position_offset + Self::POSITION_SIZE > stride {
            return Err(PhysicsError::InvalidVertexLayout(format!(
                "position at offset {} does not fit a {} byte stride",
                position_offset, stride
            )));
        }
        Ok(layout)
    }

    /// Vertices made only of a position
    pub fn positions_only() -> Self {
        Self {
            stride: Self::POSITION_SIZE,
            position_offset: 0,
        }
    }
}

/// Read-only view of a renderer vertex block
#[derive(Debug, Clone, Copy)]
pub struct VertexBuffer<'a> {
    data: &'a [u8],
    layout: VertexLayout,
    offset: usize,
}

impl<'a> VertexBuffer<'a> {
    pub fn new(data: &'a [u8], layout: VertexLayout, offset: usize) -> Result<Self> {
        if layout.stride == 0 || layout.position_offset + VertexLayout::POSITION_SIZE > layout.stride {
            return Err(PhysicsError::InvalidVertexLayout(format!(
                "stride {} cannot hold a position at offset {}",
                layout.stride, layout.position_offset
            )));
        }
        if offset > data.len() {
            return Err(PhysicsError::InvalidVertexLayout(format!(
                "vertex offset {} is past the {} byte block",
                offset,
                data.len()
            )));
        }
        Ok(Self {
            data,
            layout,
            offset,
        })
    }

    /// Number of vertices whose position lies fully inside the block
    pub fn vertex_count(&self) -> usize {
        let usable = self.data.len() - self.offset;
        let first_end = self.layout.position_offset + VertexLayout::POSITION_SIZE;
        if usable < first_end {
            0
        } else {
            (usable - first_end) / self.layout.stride + 1
        }
    }

    /// Position of vertex `index`
    pub fn position(&self, index: u32) -> Option<[f32; 3]> {
        let start = (index as usize)
            .checked_mul(self.layout.stride)?
            .checked_add(self.offset + self.layout.position_offset)?;
        self.data
            .get(start..start + VertexLayout::POSITION_SIZE)
            .map(bytemuck::pod_read_unaligned::<[f32; 3]>)
    }
}

/// Owned positions and indices, e.g. several renderer meshes merged together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshGeometry {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl MeshGeometry {
    pub fn new(positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self { positions, indices }
    }

    /// Decode every vertex and index from renderer blocks
    pub fn from_buffers(vertices: &VertexBuffer<'_>, indices: &IndexBuffer<'_>) -> Result<Self> {
        let positions = (0..vertices.vertex_count() as u32)
            .map(|i| vertices.position(i).unwrap_or_default())
            .collect();
        let indices = (0..indices.len())
            .map(|i| {
                indices.get(i).ok_or_else(|| {
                    PhysicsError::InvalidIndexBuffer(format!("index {} unreadable", i))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { positions, indices })
    }

    /// Concatenate meshes, rebasing each part's indices past the previous vertices
    pub fn merge<'a>(parts: impl IntoIterator<Item = &'a MeshGeometry>) -> Self {
        let mut merged = MeshGeometry::default();
        for part in parts {
            let base = merged.positions.len() as u32;
            merged.indices.extend(part.indices.iter().map(|i| i + base));
            merged.positions.extend_from_slice(&part.positions);
        }
        merged
    }

    /// Number of whole triangles described by the index list
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    fn corner(&self, index_slot: usize) -> Result<[f32; 3]> {
        let index = self.indices[index_slot];
        self.positions.get(index as usize).copied().ok_or_else(|| {
            PhysicsError::InvalidIndexBuffer(format!(
                "index {} references vertex {} of {}",
                index_slot,
                index,
                self.positions.len()
            ))
        })
    }
}

/// Fill `out` with triangles `first..first + out.len()` in parallel
fn fill_triangles<F>(out: &mut [Triangle], first: usize, corner: F) -> Result<()>
where
    F: Fn(usize) -> Result<[f32; 3]> + Sync,
{
    out.par_chunks_mut(TRIANGLES_PER_TASK)
        .enumerate()
        .try_for_each(|(chunk, triangles)| {
            let chunk_first = first + chunk * TRIANGLES_PER_TASK;
            for (i, triangle) in triangles.iter_mut().enumerate() {
                let slot = (chunk_first + i) * 3;
                *triangle = [corner(slot)?, corner(slot + 1)?, corner(slot + 2)?];
            }
            Ok(())
        })
}

/// Build a mesh shape straight from renderer blocks
///
/// Trailing indices that do not form a whole triangle are ignored.
pub fn build_mesh_from_buffers(
    pools: &PoolRegistry<Triangle>,
    vertices: &VertexBuffer<'_>,
    indices: &IndexBuffer<'_>,
    scale: [f32; 3],
) -> Result<MeshShape> {
    let triangle_count = indices.len() / 3;
    if triangle_count == 0 {
        return Err(PhysicsError::EmptyMesh);
    }
    let vertex_count = vertices.vertex_count();

    let mut triangles = pools.current().take(triangle_count);
    fill_triangles(&mut triangles, 0, |slot| {
        let index = indices.get(slot).ok_or_else(|| {
            PhysicsError::InvalidIndexBuffer(format!("index {} unreadable", slot))
        })?;
        vertices.position(index).ok_or_else(|| {
            PhysicsError::InvalidIndexBuffer(format!(
                "index {} references vertex {} of {}",
                slot, index, vertex_count
            ))
        })
    })?;

    log::trace!("extracted {} triangles from renderer buffers", triangle_count);
    MeshShape::new(triangles, scale)
}

/// Build a mesh shape from owned geometry
pub fn build_mesh_from_geometry(
    pools: &PoolRegistry<Triangle>,
    geometry: &MeshGeometry,
    scale: [f32; 3],
) -> Result<MeshShape> {
    let triangle_count = geometry.triangle_count();
    if triangle_count == 0 || geometry.positions.is_empty() {
        return Err(PhysicsError::EmptyMesh);
    }
    let mut triangles = pools.current().take(triangle_count);
    fill_triangles(&mut triangles, 0, |slot| geometry.corner(slot))?;
    MeshShape::new(triangles, scale)
}

/// Build a mesh shape from an explicit triangle list
pub fn build_mesh_from_triangles(
    pools: &PoolRegistry<Triangle>,
    source: &[Triangle],
    scale: [f32; 3],
) -> Result<MeshShape> {
    if source.is_empty() {
        return Err(PhysicsError::EmptyMesh);
    }
    let mut triangles = pools.current().take(source.len());
    triangles.copy_from_slice(source);
    MeshShape::new(triangles, scale)
}

/// Split one large mesh into up to `parts` meshes built in parallel
///
/// Each part takes its buffer from the pool of the worker that builds it. Meshes
/// with fewer than two triangles per part stay whole.
pub fn split_mesh(
    pools: &PoolRegistry<Triangle>,
    geometry: &MeshGeometry,
    scale: [f32; 3],
    parts: usize,
) -> Result<Vec<MeshShape>> {
    let triangle_count = geometry.triangle_count();
    let parts = parts.max(1);
    if triangle_count < parts * 2 {
        return Ok(vec![build_mesh_from_geometry(pools, geometry, scale)?]);
    }

    let per_part = 1 + triangle_count / parts;
    let meshes = (0..parts)
        .into_par_iter()
        .filter_map(|part| {
            let start = part * per_part;
            let end = (start + per_part).min(triangle_count);
            (start < end).then_some((start, end))
        })
        .map(|(start, end)| {
            let mut triangles = pools.current().take(end - start);
            for (i, triangle) in triangles.iter_mut().enumerate() {
                let slot = (start + i) * 3;
                *triangle = [
                    geometry.corner(slot)?,
                    geometry.corner(slot + 1)?,
                    geometry.corner(slot + 2)?,
                ];
            }
            MeshShape::new(triangles, scale)
        })
        .collect::<Result<Vec<_>>>()?;

    log::debug!(
        "split {} triangles into {} mesh parts",
        triangle_count,
        meshes.len()
    );
    Ok(meshes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_bytes() -> (Vec<u8>, Vec<u8>) {
        let positions: [[f32; 3]; 4] = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 0.0, 1.0],
            [0.0, 0.0, 1.0],
        ];
        let indices: [u16; 6] = [0, 1, 2, 0, 2, 3];
        (
            bytemuck::cast_slice(&positions).to_vec(),
            bytemuck::cast_slice(&indices).to_vec(),
        )
    }

    #[test]
    fn test_index_buffer_widths() {
        let wide: [u32; 3] = [7, 70_000, 3];
        let buf = IndexBuffer::packed(bytemuck::cast_slice(&wide), IndexFormat::U32);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.get(1), Some(70_000));
        assert_eq!(buf.get(3), None);

        let narrow: [u16; 2] = [9, 65_535];
        let buf = IndexBuffer::packed(bytemuck::cast_slice(&narrow), IndexFormat::U16);
        assert_eq!(buf.get(1), Some(65_535));
    }

    #[test]
    fn test_index_buffer_overrun_rejected() {
        let bytes = [0u8; 6];
        assert!(IndexBuffer::new(&bytes, IndexFormat::U16, 2, 3).is_err());
        assert!(IndexBuffer::new(&bytes, IndexFormat::U16, 0, 3).is_ok());
    }

    #[test]
    fn test_interleaved_vertex_layout() {
        // position, then a 2-float uv
        let verts: [[f32; 5]; 2] = [[1.0, 2.0, 3.0, 0.5, 0.5], [4.0, 5.0, 6.0, 0.0, 1.0]];
        let layout = VertexLayout::new(20, 0).unwrap();
        let buf = VertexBuffer::new(bytemuck::cast_slice(&verts), layout, 0).unwrap();
        assert_eq!(buf.vertex_count(), 2);
        assert_eq!(buf.position(1), Some([4.0, 5.0, 6.0]));
        assert_eq!(buf.position(2), None);

        assert!(VertexLayout::new(8, 0).is_err());
    }

    #[test]
    fn test_build_mesh_from_buffers_quad() {
        let pools = PoolRegistry::new();
        let (vbytes, ibytes) = quad_bytes();
        let vertices = VertexBuffer::new(&vbytes, VertexLayout::positions_only(), 0).unwrap();
        let indices = IndexBuffer::packed(&ibytes, IndexFormat::U16);

        let mesh = build_mesh_from_buffers(&pools, &vertices, &indices, [1.0; 3]).unwrap();
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(
            mesh.triangles()[0],
            [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0]]
        );
        assert_eq!(pools.outstanding(), 1);

        mesh.release();
        assert_eq!(pools.outstanding(), 0);
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let pools = PoolRegistry::new();
        let (vbytes, _) = quad_bytes();
        let bad: [u32; 3] = [0, 1, 9];
        let vertices = VertexBuffer::new(&vbytes, VertexLayout::positions_only(), 0).unwrap();
        let indices = IndexBuffer::packed(bytemuck::cast_slice(&bad), IndexFormat::U32);
        assert!(matches!(
            build_mesh_from_buffers(&pools, &vertices, &indices, [1.0; 3]),
            Err(PhysicsError::InvalidIndexBuffer(_))
        ));
    }

    #[test]
    fn test_empty_index_block_rejected() {
        let pools = PoolRegistry::new();
        let (vbytes, _) = quad_bytes();
        let vertices = VertexBuffer::new(&vbytes, VertexLayout::positions_only(), 0).unwrap();
        let indices = IndexBuffer::packed(&[], IndexFormat::U16);
        assert!(matches!(
            build_mesh_from_buffers(&pools, &vertices, &indices, [1.0; 3]),
            Err(PhysicsError::EmptyMesh)
        ));
    }

    #[test]
    fn test_merge_rebases_indices() {
        let a = MeshGeometry::new(vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]], vec![0, 1, 2]);
        let b = MeshGeometry::new(vec![[5.0; 3], [6.0, 5.0, 5.0], [5.0, 6.0, 5.0]], vec![0, 2, 1]);
        let merged = MeshGeometry::merge([&a, &b]);
        assert_eq!(merged.indices, vec![0, 1, 2, 3, 5, 4]);
        assert_eq!(merged.positions.len(), 6);
    }

    #[test]
    fn test_large_mesh_fills_every_chunk() {
        let pools = PoolRegistry::new();
        let strips = TRIANGLES_PER_TASK * 3 + 17;
        let mut positions = Vec::new();
        let mut indices = Vec::new();
        for i in 0..strips {
            let x = i as f32;
            let base = positions.len() as u32;
            positions.extend([[x, 0.0, 0.0], [x + 1.0, 0.0, 0.0], [x, 0.0, 1.0]]);
            indices.extend([base, base + 1, base + 2]);
        }
        let geometry = MeshGeometry::new(positions, indices);
        let mesh = build_mesh_from_geometry(&pools, &geometry, [1.0; 3]).unwrap();
        assert_eq!(mesh.triangle_count(), strips);
        assert_eq!(mesh.triangles()[strips - 1][0], [(strips - 1) as f32, 0.0, 0.0]);
    }

    #[test]
    fn test_split_mesh_covers_all_triangles() {
        let pools = PoolRegistry::new();
        let mut positions = Vec::new();
        let mut indices = Vec::new();
        for i in 0..40u32 {
            let x = i as f32;
            positions.extend([[x, 0.0, 0.0], [x + 1.0, 0.0, 0.0], [x, 1.0, 0.0]]);
            indices.extend([i * 3, i * 3 + 1, i * 3 + 2]);
        }
        let geometry = MeshGeometry::new(positions, indices);
        let parts = split_mesh(&pools, &geometry, [1.0; 3], 4).unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts.iter().map(|m| m.triangle_count()).sum::<usize>(), 40);

        let small = split_mesh(&pools, &MeshGeometry::new(
            vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![0, 1, 2],
        ), [1.0; 3], 8)
        .unwrap();
        assert_eq!(small.len(), 1);
    }
}
