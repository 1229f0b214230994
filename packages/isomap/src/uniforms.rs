//! Uniform blocks shared by the tile shaders, and their storage under each
//! render backend.

use crate::context::RenderBackend;
use graphics::{
    Gpu,
    GpuError,
    BufferId,
    BufferKind,
    UniformValue,
    std140::{
        self,
        Std140,
    },
    std140_struct,
};
use tile_data::PointLight;
use vek::*;


/// Point lights per lighting block. More lights take more draw passes.
pub const MAX_POINT_LIGHTS: usize = 4;

pub const CAMERA_BINDING: u32 = 0;
pub const GLOBAL_LIGHTING_BINDING: u32 = 1;
pub const CHUNK_LIGHTING_BINDING: u32 = 2;
pub const CHUNK_BINDING: u32 = 3;


/// Uniform block data, settable either as a buffer or as plain uniforms.
pub trait UniformBlock: Std140 {
    const BINDING: u32;

    /// Set the block's members as plain uniforms of the program in use.
    fn set_uniforms(&self, gpu: &mut dyn Gpu);
}


#[derive(Debug, Clone, PartialEq)]
pub struct CameraBlock {
    pub proj: Mat4<f32>,
    pub view: Mat4<f32>,
    pub pos: Vec3<f32>,
}

std140_struct!(CameraBlock {
    proj: Mat4<f32>,
    view: Mat4<f32>,
    pos: Vec3<f32>,
});

impl UniformBlock for CameraBlock {
    const BINDING: u32 = CAMERA_BINDING;

    fn set_uniforms(&self, gpu: &mut dyn Gpu) {
        gpu.set_uniform("u_proj", UniformValue::Mat4(self.proj));
        gpu.set_uniform("u_view", UniformValue::Mat4(self.view));
        gpu.set_uniform("u_camera_pos", UniformValue::Vec3(self.pos));
    }
}


/// Per-chunk transform and load-in animation state.
///
/// `load_anim` is `<origin x, origin y, seconds since load, first screen>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkBlock {
    pub transform: Mat4<f32>,
    pub load_anim: Vec4<f32>,
}

std140_struct!(ChunkBlock {
    transform: Mat4<f32>,
    load_anim: Vec4<f32>,
});

impl UniformBlock for ChunkBlock {
    const BINDING: u32 = CHUNK_BINDING;

    fn set_uniforms(&self, gpu: &mut dyn Gpu) {
        gpu.set_uniform("u_chunk_transform", UniformValue::Mat4(self.transform));
        gpu.set_uniform("u_chunk_load_anim", UniformValue::Vec4(self.load_anim));
    }
}


#[derive(Debug, Clone, PartialEq)]
pub struct GlobalLightingBlock {
    pub ambient_radiance: Vec3<f32>,
    pub sun_dir: Vec3<f32>,
    pub sun_radiance: Vec3<f32>,
}

std140_struct!(GlobalLightingBlock {
    ambient_radiance: Vec3<f32>,
    sun_dir: Vec3<f32>,
    sun_radiance: Vec3<f32>,
});

impl UniformBlock for GlobalLightingBlock {
    const BINDING: u32 = GLOBAL_LIGHTING_BINDING;

    fn set_uniforms(&self, gpu: &mut dyn Gpu) {
        gpu.set_uniform("u_ambient_radiance", UniformValue::Vec3(self.ambient_radiance));
        gpu.set_uniform("u_sun_dir", UniformValue::Vec3(self.sun_dir));
        gpu.set_uniform("u_sun_radiance", UniformValue::Vec3(self.sun_radiance));
    }
}


#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointLightData {
    pub pos: Vec3<f32>,
    pub radiance: Vec3<f32>,
}

std140_struct!(PointLightData {
    pos: Vec3<f32>,
    radiance: Vec3<f32>,
});

/// Up to `MAX_POINT_LIGHTS` point lights for one draw pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkLightingBlock {
    pub point_light_count: i32,
    pub point_lights: [PointLightData; MAX_POINT_LIGHTS],
}

std140_struct!(ChunkLightingBlock {
    point_light_count: i32,
    point_lights: [PointLightData; MAX_POINT_LIGHTS],
});

impl ChunkLightingBlock {
    /// Pack the first `MAX_POINT_LIGHTS` of `lights`.
    pub fn new(lights: &[PointLight]) -> Self {
        let mut block = ChunkLightingBlock::default();
        for (dst, light) in block.point_lights.iter_mut().zip(lights) {
            *dst = PointLightData {
                pos: light.pos,
                radiance: Vec3::new(light.radiance.r, light.radiance.g, light.radiance.b),
            };
        }
        block.point_light_count = lights.len().min(MAX_POINT_LIGHTS) as i32;
        block
    }
}

impl UniformBlock for ChunkLightingBlock {
    const BINDING: u32 = CHUNK_LIGHTING_BINDING;

    fn set_uniforms(&self, gpu: &mut dyn Gpu) {
        let count = self.point_light_count as usize;
        gpu.set_uniform("u_point_light_count", UniformValue::Int(self.point_light_count));
        gpu.set_uniform(
            "u_point_light_pos",
            UniformValue::Vec3Array(self.point_lights[..count].iter().map(|l| l.pos).collect()),
        );
        gpu.set_uniform(
            "u_point_light_radiance",
            UniformValue::Vec3Array(self.point_lights[..count].iter().map(|l| l.radiance).collect()),
        );
    }
}


/// A uniform block's current value, plus its buffer under the
/// `UniformBlocks` backend.
#[derive(Debug)]
pub struct UniformSlot<T> {
    value: T,
    buffer: Option<BufferId>,
}

impl<T: UniformBlock> UniformSlot<T> {
    pub fn new(gpu: &mut dyn Gpu, backend: RenderBackend, value: T) -> Result<Self, GpuError> {
        let buffer = match backend {
            RenderBackend::UniformBlocks => {
                Some(gpu.create_buffer(BufferKind::Uniform, &std140::to_bytes(&value))?)
            }
            RenderBackend::ImmediateUniforms => None,
        };
        Ok(UniformSlot { value, buffer })
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Replace the value, rewriting the buffer if there is one.
    pub fn write(&mut self, gpu: &mut dyn Gpu, value: T) {
        if let Some(buffer) = self.buffer {
            gpu.write_buffer(buffer, 0, &std140::to_bytes(&value));
        }
        self.value = value;
    }

    /// Make the value visible to the program in use.
    pub fn bind(&self, gpu: &mut dyn Gpu) {
        match self.buffer {
            Some(buffer) => gpu.bind_uniform_block(T::BINDING, buffer),
            None => self.value.set_uniforms(gpu),
        }
    }

    pub fn dispose(&mut self, gpu: &mut dyn Gpu) {
        if let Some(buffer) = self.buffer.take() {
            gpu.delete_buffer(buffer);
        }
    }
}


#[test]
fn test_block_sizes() {
    assert_eq!(CameraBlock::SIZE, 64 + 64 + 16);
    assert_eq!(ChunkBlock::SIZE, 80);
    assert_eq!(GlobalLightingBlock::SIZE, 48);
    assert_eq!(ChunkLightingBlock::SIZE, 16 + MAX_POINT_LIGHTS * 32);
}

#[test]
fn test_lighting_block_truncates() {
    let lights: Vec<PointLight> = (0..6)
        .map(|i| PointLight::new([i as f32, 0.0, 0.0], [1.0, 1.0, 1.0]))
        .collect();
    let block = ChunkLightingBlock::new(&lights);
    assert_eq!(block.point_light_count, 4);
    assert_eq!(block.point_lights[3].pos.x, 3.0);
}
