//! Render-to-texture impostors of static chunks.
//!
//! A macrotile renders its chunk once from a fixed oblique orthographic
//! camera into a texture, then stands in for the chunk's per-tile draws with
//! a single draw of a low-poly box textured with that render. All cache
//! renders go through one scratch framebuffer in a `MacrotileArena`;
//! textures are moved into it for the render and back out afterwards.

use crate::{
    camera::Camera,
    chunk::{
        LOAD_ANIM_COMPLETE_TIME,
        PROJECTION_ANGLE,
    },
    context::{
        Context,
        ContextParams,
    },
    tile_buffers::TileBuffers,
    uniforms::{
        UniformSlot,
        CameraBlock,
        ChunkBlock,
    },
};
use anyhow::*;
use anyhow::Context as _;
use std::result::Result::Ok;
use graphics::{
    Gpu,
    GpuError,
    Attachment,
    BlendMode,
    Framebuffer,
    TextureFormat,
    UniformValue,
};
use mesh_data::{
    MeshData,
    PlaneSubspace,
};
use vek::*;


/// Largest cache texture dimension.
pub const MACROTILE_MAX_SIZE: f32 = 1024.0;
/// Smallest cache texture dimension.
pub const MACROTILE_MIN_SIZE: f32 = 8.0;

pub const MACROTILE_COLOR_UNIT: u32 = 0;
pub const MACROTILE_TONEMAP_UNIT: u32 = 1;


/// Camera a macrotile is rendered with.
#[derive(Debug, Clone)]
pub struct RenderCamera {
    pub camera: Camera,
    /// Size of the cache texture.
    pub size: Extent2<u32>,
    /// Maps points in chunk space to texture coordinates of the cache
    /// render: `(0, 0)` bottom left, `(1, 1)` top right.
    pub uv_plane: PlaneSubspace,
}

/// Frame a box of `size * size * height` at the origin from the fixed
/// viewing angle, at `tileset_resolution` pixels per tile.
pub fn render_camera(size: f32, height: f32, tileset_resolution: f32) -> RenderCamera {
    // looking along (-1, -1), tilted down from the vertical by the
    // projection angle
    let rotation = Quaternion::rotation_z(3.0 * std::f32::consts::FRAC_PI_4)
        * Quaternion::rotation_x(PROJECTION_ANGLE);
    let right = rotation * Vec3::unit_x();
    let up = rotation * Vec3::unit_y();
    let view_dir = rotation * -Vec3::unit_z();

    let screen = PlaneSubspace::new(Vec3::zero(), right, up);
    let mut min = Vec2::broadcast(f32::INFINITY);
    let mut max = Vec2::broadcast(f32::NEG_INFINITY);
    for i in 0..8 {
        let corner = Vec3::new(
            if i & 1 != 0 { size } else { 0.0 },
            if i & 2 != 0 { size } else { 0.0 },
            if i & 4 != 0 { height } else { 0.0 },
        );
        let p = screen.project_to_plane(corner);
        min = Vec2::partial_min(min, p);
        max = Vec2::partial_max(max, p);
    }
    let extent = max - min;
    let aspect = extent.x / extent.y;

    let mut h = tileset_resolution * size / aspect;
    let mut w = h * aspect;
    if w > MACROTILE_MAX_SIZE {
        w = MACROTILE_MAX_SIZE;
        h = w / aspect;
    }
    if h > MACROTILE_MAX_SIZE {
        h = MACROTILE_MAX_SIZE;
        w = h * aspect;
    }
    let w = w.ceil().max(MACROTILE_MIN_SIZE);
    let h = h.ceil().max(MACROTILE_MIN_SIZE);

    let center = screen.project_from_plane((min + max) / 2.0);

    let mut camera = Camera::default();
    camera.position = center - view_dir * size * 2.0;
    camera.rotation = rotation;
    camera.invert_y = false;
    camera.ortho_scale = 2.0 * w / extent.x / 128.0;

    let half = Vec2::new(w, h) / camera.actual_ortho_scale();
    let uv_plane = PlaneSubspace::new(
        center - right * half.x - up * half.y,
        right * half.x * 2.0,
        up * half.y * 2.0,
    );

    RenderCamera {
        camera,
        size: Extent2::new(w as u32, h as u32),
        uv_plane,
    }
}


/// Shared resources of cache renders: the scratch framebuffer and the fixed
/// camera and chunk uniforms.
#[derive(Debug)]
pub struct MacrotileArena {
    framebuffer: Framebuffer,
    camera: UniformSlot<CameraBlock>,
    chunk: UniformSlot<ChunkBlock>,
}

impl MacrotileArena {
    pub fn new(gpu: &mut dyn Gpu, params: &ContextParams) -> Result<Self, GpuError> {
        let format = params.composite.color;
        let mut formats = vec![format];
        formats.extend(params.composite.aux);
        let mut framebuffer = Framebuffer::new(formats);
        framebuffer.linear_sample = (format != TextureFormat::Rgba16F || params.half_float_linear)
            && (format != TextureFormat::Rgba32F || params.float_linear);

        let camera = UniformSlot::new(gpu, params.backend, CameraBlock {
            proj: Mat4::identity(),
            view: Mat4::identity(),
            pos: Vec3::zero(),
        })?;
        let chunk = UniformSlot::new(gpu, params.backend, ChunkBlock {
            transform: Mat4::identity(),
            load_anim: Vec4::new(0.0, 0.0, LOAD_ANIM_COMPLETE_TIME, 0.0),
        })?;
        Ok(MacrotileArena {
            framebuffer,
            camera,
            chunk,
        })
    }

    pub fn dispose(&mut self, gpu: &mut dyn Gpu) {
        self.framebuffer.dispose(gpu);
        self.camera.dispose(gpu);
        self.chunk.dispose(gpu);
    }
}


#[derive(Debug)]
struct Impostor {
    buffers: TileBuffers,
    tileset_resolution: f32,
}


/// Cached render of one chunk.
#[derive(Debug)]
pub struct Macrotile {
    /// Footprint in tiles.
    size: f32,
    height: f32,
    /// Largest pixel size of one tile among the chunk's tilesets.
    pub tileset_resolution: f32,
    is_valid: bool,
    color: Option<Attachment>,
    tonemap: Option<Attachment>,
    impostor: Option<Impostor>,
}

impl Macrotile {
    pub fn new(size: f32, height: f32) -> Self {
        Macrotile {
            size,
            height,
            tileset_resolution: 0.0,
            is_valid: false,
            color: None,
            tonemap: None,
            impostor: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Mark the cached render stale. Only a completed cache render makes it
    /// valid again.
    pub fn invalidate(&mut self) {
        self.is_valid = false;
    }

    pub fn render_camera(&self) -> RenderCamera {
        render_camera(self.size, self.height, self.tileset_resolution)
    }

    fn update_impostor(&mut self, gpu: &mut dyn Gpu, uv_plane: &PlaneSubspace) -> Result<(), GpuError> {
        if let Some(ref impostor) = self.impostor {
            if impostor.tileset_resolution == self.tileset_resolution {
                return Ok(());
            }
        }
        if let Some(old) = self.impostor.take() {
            old.buffers.dispose(gpu);
        }

        let scale = Vec3::new(self.size, self.size, self.height);
        let mut mesh = MeshData::new();
        let mut push = |x: f32, y: f32, z: f32| {
            let pos = Vec3::new(x, y, z) * scale;
            mesh.push_vertex(pos, uv_plane.project_to_plane(pos))
        };
        let p010 = push(0.0, 1.0, 0.0);
        let p110 = push(1.0, 1.0, 0.0);
        let p100 = push(1.0, 0.0, 0.0);
        let p001 = push(0.0, 0.0, 1.0);
        let p011 = push(0.0, 1.0, 1.0);
        // back corner, collapsed to the floor
        let p000 = push(0.0, 0.0, 0.0);
        let p101 = push(1.0, 0.0, 1.0);
        for [a, b, c] in [
            [p010, p000, p110],
            [p010, p011, p000],
            [p001, p000, p011],
            [p001, p101, p000],
            [p100, p000, p101],
            [p100, p110, p000],
        ] {
            mesh.push_triangle(a, b, c);
        }

        let n = mesh.num_vertices();
        let buffers = TileBuffers::new(gpu, &mesh, &vec![Vec2::zero(); n], &vec![Vec3::zero(); n])?;
        self.impostor = Some(Impostor {
            buffers,
            tileset_resolution: self.tileset_resolution,
        });
        Ok(())
    }

    /// Bind the arena's framebuffer with this macrotile's textures attached
    /// and set up the tile program to render the chunk at the origin. The
    /// chunk's contents are drawn next, then `finish_cache_render`.
    pub fn begin_cache_render(&mut self, ctx: &mut Context, arena: &mut MacrotileArena) -> Result<()> {
        let gpu = ctx.gpu.as_mut();
        let RenderCamera { camera, size, uv_plane } = self.render_camera();
        self.update_impostor(gpu, &uv_plane).context("creating macrotile impostor")?;

        let fb = &mut arena.framebuffer;
        if let Some(color) = self.color.take() {
            fb.set_color(0, color);
        }
        if let Some(tonemap) = self.tonemap.take() {
            fb.set_color(1, tonemap);
        }
        fb.size = size;
        fb.bind(gpu).context("binding macrotile framebuffer")?;
        gpu.clear(Rgba::zero());
        gpu.set_depth_test(true);
        gpu.set_blend_mode(BlendMode::Normal);

        gpu.use_program(ctx.programs.tile_chunk);
        let viewport = size.map(|n| n as f32);
        arena.camera.write(gpu, CameraBlock {
            proj: camera.projection(viewport),
            view: camera.view(),
            pos: camera.position,
        });
        arena.camera.bind(gpu);
        arena.chunk.bind(gpu);
        gpu.set_uniform("u_cache_render", UniformValue::Int(1));
        Ok(())
    }

    /// Take the rendered textures back out of the arena. The macrotile is
    /// valid afterwards.
    pub fn finish_cache_render(&mut self, ctx: &mut Context, arena: &mut MacrotileArena) {
        ctx.gpu.set_uniform("u_cache_render", UniformValue::Int(0));
        self.color = arena.framebuffer.take_color(0);
        self.tonemap = arena.framebuffer.take_color(1);
        self.is_valid = true;
    }

    /// Draw the impostor with the program in use. Returns false if there's
    /// nothing to draw.
    pub fn render(&self, gpu: &mut dyn Gpu) -> bool {
        let (impostor, color) = match (&self.impostor, self.color) {
            (Some(impostor), Some(color)) => (impostor, color),
            _ => return false,
        };
        gpu.bind_texture(MACROTILE_COLOR_UNIT, color.texture);
        if let Some(tonemap) = self.tonemap {
            gpu.bind_texture(MACROTILE_TONEMAP_UNIT, tonemap.texture);
        }
        impostor.buffers.draw(gpu, 0, impostor.buffers.index_count());
        true
    }

    pub fn dispose(&mut self, gpu: &mut dyn Gpu) {
        for attachment in [self.color.take(), self.tonemap.take()].into_iter().flatten() {
            gpu.delete_texture(attachment.texture);
        }
        if let Some(impostor) = self.impostor.take() {
            impostor.buffers.dispose(gpu);
        }
        self.is_valid = false;
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_camera_frames_box() {
        let rc = render_camera(8.0, 1.0, 16.0);
        let viewport = rc.size.map(|n| n as f32);
        let view_proj = rc.camera.projection(viewport) * rc.camera.view();

        for &(x, y, z) in &[
            (0.0, 0.0, 0.0),
            (8.0, 8.0, 0.0),
            (8.0, 0.0, 1.0),
            (0.0, 8.0, 1.0),
            (0.0, 0.0, 1.0),
            (4.0, 4.0, 0.5),
        ] {
            let p = Vec3::new(x, y, z);
            let clip = view_proj * Vec4::from_point(p);
            let ndc = clip.xy() / clip.w;
            assert!(ndc.x.abs() <= 1.01 && ndc.y.abs() <= 1.01, "{:?}", ndc);
            assert!(clip.z.abs() <= clip.w);

            // the uv plane agrees with where the camera puts the point
            let uv = rc.uv_plane.project_to_plane(p);
            let expected = (ndc + 1.0) / 2.0;
            assert!((uv - expected).magnitude() < 1e-3, "{:?} vs {:?}", uv, expected);
        }
    }

    #[test]
    fn test_render_camera_size_clamped() {
        let small = render_camera(8.0, 1.0, 0.0);
        assert_eq!(small.size, Extent2::new(8, 8));

        let huge = render_camera(8.0, 1.0, 4096.0);
        assert!(huge.size.w <= 1024 && huge.size.h <= 1024);
        assert!(huge.size.w == 1024 || huge.size.h == 1024);

        let normal = render_camera(8.0, 1.0, 16.0);
        assert!((128..=129).contains(&normal.size.w), "{:?}", normal.size);
    }

    #[test]
    fn test_invalidate_until_cache_render() {
        let mut macrotile = Macrotile::new(8.0, 1.0);
        assert!(!macrotile.is_valid());
        macrotile.invalidate();
        assert!(!macrotile.is_valid());
    }
}
