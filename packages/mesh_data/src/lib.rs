//! CPU-side mesh accumulation and the geometry of isometric tiles.

mod plane;
mod tile_geometry;


pub use crate::{
    plane::PlaneSubspace,
    tile_geometry::{
        TileGeometryInfo,
        build_tile_geometry,
        FLAT_VERTS,
        FLAT_INDICES,
        CUBE_VERTS,
        CUBE_INDICES,
    },
};

use vek::*;


/// Vertex positions, texture coordinates and triangle indices, accumulated
/// tile by tile into one shared buffer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    pub positions: Vec<Vec3<f32>>,
    pub uvs: Vec<Vec2<f32>>,
    pub indices: Vec<u16>,
}

impl MeshData {
    pub fn new() -> Self {
        MeshData::default()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.indices.is_empty()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.uvs.clear();
        self.indices.clear();
    }

    pub fn num_vertices(&self) -> usize {
        self.positions.len()
    }

    /// Push a vertex, returning its index.
    pub fn push_vertex(&mut self, pos: Vec3<f32>, uv: Vec2<f32>) -> u16 {
        let idx = self.positions.len();
        debug_assert!(idx <= u16::MAX as usize, "mesh exceeds u16 index range");
        self.positions.push(pos);
        self.uvs.push(uv);
        idx as u16
    }

    pub fn push_triangle(&mut self, a: u16, b: u16, c: u16) {
        debug_assert!(
            (a.max(b).max(c) as usize) < self.positions.len(),
            "triangle references missing vertex",
        );
        self.indices.extend([a, b, c]);
    }
}
