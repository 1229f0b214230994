use graphics::{
    Gpu,
    GpuError,
    BufferId,
    BufferKind,
    VertexArrayId,
    VertexAttrib,
    Topology,
    vertex::{
        self,
        VertexData,
    },
};
use mesh_data::MeshData;
use vek::*;


pub const ATTRIB_POS: u32 = 0;
pub const ATTRIB_UV: u32 = 1;
/// Animation frame offset of the vertex's tile.
pub const ATTRIB_TILE: u32 = 2;
/// Local position of the vertex's tile within its chunk.
pub const ATTRIB_OBJ_POS: u32 = 3;


/// GPU copy of a tile mesh with per-vertex tile attributes.
#[derive(Debug)]
pub struct TileBuffers {
    index: BufferId,
    pos: BufferId,
    uv: BufferId,
    tile: BufferId,
    obj_pos: BufferId,
    vao: VertexArrayId,
    index_count: u32,
}

fn attrib<T: VertexData>(location: u32, buffer: BufferId) -> VertexAttrib {
    VertexAttrib {
        location,
        buffer,
        components: T::COMPONENTS,
    }
}

impl TileBuffers {
    /// Upload a mesh. `tile` and `obj_pos` are per vertex.
    pub fn new(
        gpu: &mut dyn Gpu,
        mesh: &MeshData,
        tile: &[Vec2<f32>],
        obj_pos: &[Vec3<f32>],
    ) -> Result<Self, GpuError> {
        debug_assert_eq!(tile.len(), mesh.num_vertices());
        debug_assert_eq!(obj_pos.len(), mesh.num_vertices());

        let index = gpu.create_buffer(BufferKind::Index, &vertex::to_bytes(&mesh.indices))?;
        let pos = gpu.create_buffer(BufferKind::Vertex, &vertex::to_bytes(&mesh.positions))?;
        let uv = gpu.create_buffer(BufferKind::Vertex, &vertex::to_bytes(&mesh.uvs))?;
        let tile = gpu.create_buffer(BufferKind::Vertex, &vertex::to_bytes(tile))?;
        let obj_pos = gpu.create_buffer(BufferKind::Vertex, &vertex::to_bytes(obj_pos))?;
        let vao = gpu.create_vertex_array(Some(index), &[
            attrib::<Vec3<f32>>(ATTRIB_POS, pos),
            attrib::<Vec2<f32>>(ATTRIB_UV, uv),
            attrib::<Vec2<f32>>(ATTRIB_TILE, tile),
            attrib::<Vec3<f32>>(ATTRIB_OBJ_POS, obj_pos),
        ])?;
        Ok(TileBuffers {
            index,
            pos,
            uv,
            tile,
            obj_pos,
            vao,
            index_count: mesh.indices.len() as u32,
        })
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Rewrite the per-vertex animation frame offsets.
    pub fn write_tile(&self, gpu: &mut dyn Gpu, tile: &[Vec2<f32>]) {
        gpu.write_buffer(self.tile, 0, &vertex::to_bytes(tile));
    }

    /// Draw a range of indices.
    pub fn draw(&self, gpu: &mut dyn Gpu, first: u32, count: u32) {
        gpu.draw(self.vao, Topology::Triangles, first, count);
    }

    pub fn dispose(self, gpu: &mut dyn Gpu) {
        gpu.delete_vertex_array(self.vao);
        for buffer in [self.index, self.pos, self.uv, self.tile, self.obj_pos] {
            gpu.delete_buffer(buffer);
        }
    }
}
