use std::fmt::{self, Formatter, Display};
use serde::{
    Serialize,
    Deserialize,
};
use vek::*;


/// Capability tier of a graphics context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextTier {
    /// No uniform blocks, no texture arrays, 8-bit render targets only.
    Basic,
    /// Uniform blocks, texture arrays, multiple render targets.
    Extended,
}


/// What a graphics context supports, queried once at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub tier: ContextTier,
    /// Half-float color attachments are renderable.
    pub color_buffer_half_float: bool,
    /// Float color attachments are renderable.
    pub color_buffer_float: bool,
    pub half_float_linear: bool,
    pub float_linear: bool,
    pub max_texture_size: u32,
    pub renderer_info: String,
}

impl Capabilities {
    pub fn uniform_blocks(&self) -> bool {
        self.tier == ContextTier::Extended
    }

    pub fn texture_arrays(&self) -> bool {
        self.tier == ContextTier::Extended
    }

    pub fn is_renderable(&self, format: TextureFormat) -> bool {
        match format {
            TextureFormat::Rgba8 => true,
            TextureFormat::R8 => self.tier == ContextTier::Extended,
            TextureFormat::Rgba16F => self.color_buffer_half_float,
            TextureFormat::Rgba32F => self.color_buffer_float,
        }
    }
}


macro_rules! handle_types {
    ($($(#[$attr:meta])* $name:ident,)*)=>{$(
        $(#[$attr])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);
    )*};
}

handle_types! {
    BufferId,
    /// Index buffer plus vertex attribute bindings.
    VertexArrayId,
    TextureId,
    FramebufferId,
    ProgramId,
}


#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

/// A float vertex attribute sourced from a buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VertexAttrib {
    pub location: u32,
    pub buffer: BufferId,
    pub components: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    Rgba8,
    R8,
    Rgba16F,
    Rgba32F,
}

impl TextureFormat {
    pub fn is_float(self) -> bool {
        matches!(self, TextureFormat::Rgba16F | TextureFormat::Rgba32F)
    }

    pub fn channels(self) -> usize {
        match self {
            TextureFormat::R8 => 1,
            _ => 4,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
    /// Linear within and between mip levels. Minification only.
    LinearMipmap,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub size: Extent2<u32>,
    /// `Some` for a 2D array texture with that many layers.
    pub layers: Option<u32>,
    pub format: TextureFormat,
    pub mip_levels: u32,
    pub min_filter: Filter,
    pub mag_filter: Filter,
}

impl TextureDesc {
    /// Single-level 2D texture, as used for framebuffer attachments.
    pub fn attachment(size: Extent2<u32>, format: TextureFormat, linear: bool) -> Self {
        let filter = if linear { Filter::Linear } else { Filter::Nearest };
        TextureDesc {
            size,
            layers: None,
            format,
            mip_levels: 1,
            min_filter: filter,
            mag_filter: filter,
        }
    }
}

/// Blend equation state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Disabled,
    /// Straight alpha: color `SRC_ALPHA, ONE_MINUS_SRC_ALPHA`, alpha
    /// `ONE, ONE_MINUS_SRC_ALPHA`.
    Normal,
    /// Color `ONE, ONE`, alpha `ZERO, ONE`: adds light without touching
    /// coverage.
    LightPass,
    /// `ONE, ONE` on all channels.
    Additive,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Topology {
    Triangles,
    TriangleStrip,
}

/// Where draws go.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// The surface's default framebuffer.
    Screen,
    Offscreen(FramebufferId),
}

/// Value of a plain (non-block) uniform.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2<f32>),
    Vec3(Vec3<f32>),
    Vec4(Vec4<f32>),
    Mat4(Mat4<f32>),
    Vec3Array(Vec<Vec3<f32>>),
}

/// Request to compile and link a named program with preprocessor defines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramDesc {
    pub name: String,
    pub defines: Vec<(String, String)>,
}

impl ProgramDesc {
    pub fn new(name: impl Into<String>) -> Self {
        ProgramDesc {
            name: name.into(),
            defines: Vec::new(),
        }
    }

    pub fn define(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.defines.push((key.into(), value.to_string()));
        self
    }
}


/// Error from a GPU operation.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuError {
    /// Allocation of a GPU resource failed.
    OutOfMemory {
        what: &'static str,
    },
    ShaderCompile {
        program: String,
        log: String,
        /// Offending source line, where determinable.
        line: Option<u32>,
    },
    UnsupportedFormat(TextureFormat),
    ContextLost,
    /// The surface could not provide a context of the requested tier.
    ContextUnavailable(ContextTier),
}

impl Display for GpuError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            GpuError::OutOfMemory { what } => write!(f, "out of GPU memory allocating {}", what),
            GpuError::ShaderCompile { program, log, line } => {
                write!(f, "failed to compile program {:?}", program)?;
                if let Some(line) = line {
                    write!(f, " at line {}", line)?;
                }
                write!(f, ": {}", log)
            }
            GpuError::UnsupportedFormat(format) => {
                write!(f, "pixel format {:?} unsupported by this context", format)
            }
            GpuError::ContextLost => f.write_str("graphics context lost"),
            GpuError::ContextUnavailable(tier) => {
                write!(f, "could not create a {:?} graphics context", tier)
            }
        }
    }
}

impl std::error::Error for GpuError {}


/// A graphics context.
///
/// Commands apply to the currently bound program, framebuffer and texture
/// units, like an immediate-mode graphics API. Deleting a handle that is
/// already gone is a no-op.
pub trait Gpu {
    fn capabilities(&self) -> &Capabilities;

    /// Polled once per frame.
    fn is_context_lost(&self) -> bool;

    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> Result<BufferId, GpuError>;

    /// Overwrite part of a buffer. Grows the buffer if the write extends past
    /// its end.
    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]);

    fn delete_buffer(&mut self, buffer: BufferId);

    fn create_vertex_array(
        &mut self,
        indices: Option<BufferId>,
        attribs: &[VertexAttrib],
    ) -> Result<VertexArrayId, GpuError>;

    fn delete_vertex_array(&mut self, vao: VertexArrayId);

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, GpuError>;

    /// Upload RGBA8 pixels to one layer of a texture (layer 0 for 2D).
    fn upload_texture(&mut self, texture: TextureId, layer: u32, pixels: &[u8]);

    fn generate_mipmaps(&mut self, texture: TextureId);

    fn delete_texture(&mut self, texture: TextureId);

    fn bind_texture(&mut self, unit: u32, texture: TextureId);

    fn create_framebuffer(
        &mut self,
        color: &[TextureId],
        depth: bool,
    ) -> Result<FramebufferId, GpuError>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Bind a render target and set the viewport to `size`.
    fn bind_target(&mut self, target: RenderTarget, size: Extent2<u32>);

    /// Clear all color attachments of the bound target, and its depth.
    fn clear(&mut self, color: Rgba<f32>);

    /// Copy one color attachment of a framebuffer into level 0 of `dst`.
    fn copy_to_texture(&mut self, src: FramebufferId, attachment: u32, dst: TextureId);

    /// Read back one color attachment as `f32` components.
    fn read_pixels(
        &mut self,
        src: FramebufferId,
        attachment: u32,
        format: TextureFormat,
    ) -> Result<Vec<f32>, GpuError>;

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId, GpuError>;

    fn delete_program(&mut self, program: ProgramId);

    fn use_program(&mut self, program: ProgramId);

    /// Set a uniform of the program in use.
    fn set_uniform(&mut self, name: &str, value: UniformValue);

    /// Bind a uniform buffer to the named block's binding point.
    fn bind_uniform_block(&mut self, binding: u32, buffer: BufferId);

    fn set_blend_mode(&mut self, mode: BlendMode);

    fn set_depth_test(&mut self, enabled: bool);

    /// Draw `count` elements starting at `first`. Indexed if the vertex array
    /// has an index buffer.
    fn draw(&mut self, vao: VertexArrayId, topology: Topology, first: u32, count: u32);
}
