//! GPU implementation with no device behind it.

use crate::{
    gpu::*,
    surface::BackingSurface,
};
use std::sync::Arc;
use parking_lot::Mutex;
use slab::Slab;
use vek::*;


/// Capabilities and failure injection for a headless context.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub capabilities: Capabilities,
    /// Texture creation fails with `OutOfMemory` beyond this many live
    /// textures.
    pub max_textures: Option<usize>,
    /// Program name whose compilation fails.
    pub failing_program: Option<String>,
}

impl HeadlessConfig {
    /// Basic tier: no uniform blocks, 8-bit targets only.
    pub fn basic() -> Self {
        HeadlessConfig {
            capabilities: Capabilities {
                tier: ContextTier::Basic,
                color_buffer_half_float: false,
                color_buffer_float: false,
                half_float_linear: false,
                float_linear: false,
                max_texture_size: 4096,
                renderer_info: "headless basic".into(),
            },
            max_textures: None,
            failing_program: None,
        }
    }

    /// Extended tier with linearly filterable half-float targets.
    pub fn extended() -> Self {
        HeadlessConfig {
            capabilities: Capabilities {
                tier: ContextTier::Extended,
                color_buffer_half_float: true,
                color_buffer_float: true,
                half_float_linear: true,
                float_linear: false,
                max_texture_size: 8192,
                renderer_info: "headless extended".into(),
            },
            max_textures: None,
            failing_program: None,
        }
    }
}


/// A command recorded by a headless context.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    BindTarget(RenderTarget, Extent2<u32>),
    Clear(Rgba<f32>),
    WriteBuffer {
        buffer: BufferId,
        offset: usize,
        len: usize,
    },
    UploadTexture {
        texture: TextureId,
        layer: u32,
    },
    GenerateMipmaps(TextureId),
    BindTexture {
        unit: u32,
        texture: TextureId,
    },
    CopyToTexture {
        src: FramebufferId,
        attachment: u32,
        dst: TextureId,
    },
    ReadPixels {
        src: FramebufferId,
        attachment: u32,
    },
    /// Name of the program.
    UseProgram(String),
    SetUniform(String, UniformValue),
    BindUniformBlock {
        binding: u32,
        buffer: BufferId,
    },
    SetBlendMode(BlendMode),
    SetDepthTest(bool),
    Draw {
        program: Option<String>,
        vao: VertexArrayId,
        topology: Topology,
        first: u32,
        count: u32,
    },
}


#[derive(Debug, Default)]
struct LogInner {
    commands: Vec<GpuCommand>,
    lost: bool,
    contexts_created: usize,
    live_textures: usize,
    live_buffers: usize,
    live_framebuffers: usize,
    buffer_limit: Option<usize>,
}

/// Shared handle to what headless contexts did. Cloning shares the log.
#[derive(Debug, Clone, Default)]
pub struct CommandLog(Arc<Mutex<LogInner>>);

impl CommandLog {
    pub fn new() -> Self {
        CommandLog::default()
    }

    pub fn commands(&self) -> Vec<GpuCommand> {
        self.0.lock().commands.clone()
    }

    pub fn clear(&self) {
        self.0.lock().commands.clear();
    }

    /// Number of recorded commands matching `pred`.
    pub fn count<F>(&self, pred: F) -> usize
    where
        F: Fn(&GpuCommand) -> bool,
    {
        self.0.lock().commands.iter().filter(|c| pred(c)).count()
    }

    /// Names of the programs of recorded draws, in order.
    pub fn draws(&self) -> Vec<Option<String>> {
        self.0.lock().commands.iter()
            .filter_map(|c| match c {
                GpuCommand::Draw { program, .. } => Some(program.clone()),
                _ => None,
            })
            .collect()
    }

    /// Simulate losing the graphics context.
    pub fn lose_context(&self) {
        self.0.lock().lost = true;
    }

    /// Make buffer creation fail with `OutOfMemory` while this many buffers
    /// are live. Applies to every context sharing the log.
    pub fn limit_buffers(&self, limit: Option<usize>) {
        self.0.lock().buffer_limit = limit;
    }

    pub fn contexts_created(&self) -> usize {
        self.0.lock().contexts_created
    }

    pub fn live_textures(&self) -> usize {
        self.0.lock().live_textures
    }

    pub fn live_buffers(&self) -> usize {
        self.0.lock().live_buffers
    }

    pub fn live_framebuffers(&self) -> usize {
        self.0.lock().live_framebuffers
    }

    fn push(&self, command: GpuCommand) {
        self.0.lock().commands.push(command);
    }
}


#[derive(Debug)]
struct HeadlessFramebuffer {
    color: Vec<TextureId>,
    clear: Rgba<f32>,
}

/// Graphics context that tracks objects and records commands without
/// rendering anything.
///
/// Read-back returns the clear color of the framebuffer.
#[derive(Debug)]
pub struct HeadlessGpu {
    config: HeadlessConfig,
    log: CommandLog,
    buffers: Slab<(BufferKind, usize)>,
    vertex_arrays: Slab<Option<BufferId>>,
    textures: Slab<TextureDesc>,
    framebuffers: Slab<HeadlessFramebuffer>,
    programs: Slab<String>,
    program: Option<ProgramId>,
    target: RenderTarget,
}

impl HeadlessGpu {
    pub fn new(config: HeadlessConfig, log: CommandLog) -> Self {
        {
            let mut inner = log.0.lock();
            inner.lost = false;
            inner.contexts_created += 1;
            inner.live_textures = 0;
            inner.live_buffers = 0;
            inner.live_framebuffers = 0;
        }
        HeadlessGpu {
            config,
            log,
            buffers: Slab::new(),
            vertex_arrays: Slab::new(),
            textures: Slab::new(),
            framebuffers: Slab::new(),
            programs: Slab::new(),
            program: None,
            target: RenderTarget::Screen,
        }
    }

    pub fn log(&self) -> &CommandLog {
        &self.log
    }

    fn update_counts(&self) {
        let mut inner = self.log.0.lock();
        inner.live_textures = self.textures.len();
        inner.live_buffers = self.buffers.len();
        inner.live_framebuffers = self.framebuffers.len();
    }
}

impl Gpu for HeadlessGpu {
    fn capabilities(&self) -> &Capabilities {
        &self.config.capabilities
    }

    fn is_context_lost(&self) -> bool {
        self.log.0.lock().lost
    }

    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> Result<BufferId, GpuError> {
        if let Some(max) = self.log.0.lock().buffer_limit {
            if self.buffers.len() >= max {
                return Err(GpuError::OutOfMemory { what: "buffer" });
            }
        }
        let id = BufferId(self.buffers.insert((kind, data.len())));
        self.update_counts();
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]) {
        if let Some((_, len)) = self.buffers.get_mut(buffer.0) {
            *len = (*len).max(offset + data.len());
            self.log.push(GpuCommand::WriteBuffer {
                buffer,
                offset,
                len: data.len(),
            });
        }
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if self.buffers.contains(buffer.0) {
            self.buffers.remove(buffer.0);
            self.update_counts();
        }
    }

    fn create_vertex_array(
        &mut self,
        indices: Option<BufferId>,
        _attribs: &[VertexAttrib],
    ) -> Result<VertexArrayId, GpuError> {
        Ok(VertexArrayId(self.vertex_arrays.insert(indices)))
    }

    fn delete_vertex_array(&mut self, vao: VertexArrayId) {
        if self.vertex_arrays.contains(vao.0) {
            self.vertex_arrays.remove(vao.0);
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, GpuError> {
        let caps = &self.config.capabilities;
        if desc.layers.is_some() && !caps.texture_arrays() {
            return Err(GpuError::UnsupportedFormat(desc.format));
        }
        if desc.format.is_float() && !caps.is_renderable(desc.format) {
            return Err(GpuError::UnsupportedFormat(desc.format));
        }
        if desc.size.w > caps.max_texture_size || desc.size.h > caps.max_texture_size {
            return Err(GpuError::OutOfMemory { what: "oversized texture" });
        }
        if let Some(max) = self.config.max_textures {
            if self.textures.len() >= max {
                return Err(GpuError::OutOfMemory { what: "texture" });
            }
        }
        let id = TextureId(self.textures.insert(*desc));
        self.update_counts();
        Ok(id)
    }

    fn upload_texture(&mut self, texture: TextureId, layer: u32, _pixels: &[u8]) {
        self.log.push(GpuCommand::UploadTexture { texture, layer });
    }

    fn generate_mipmaps(&mut self, texture: TextureId) {
        self.log.push(GpuCommand::GenerateMipmaps(texture));
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.contains(texture.0) {
            self.textures.remove(texture.0);
            self.update_counts();
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.log.push(GpuCommand::BindTexture { unit, texture });
    }

    fn create_framebuffer(
        &mut self,
        color: &[TextureId],
        _depth: bool,
    ) -> Result<FramebufferId, GpuError> {
        let id = FramebufferId(self.framebuffers.insert(HeadlessFramebuffer {
            color: color.to_vec(),
            clear: Rgba::zero(),
        }));
        self.update_counts();
        Ok(id)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.contains(framebuffer.0) {
            self.framebuffers.remove(framebuffer.0);
            self.update_counts();
        }
    }

    fn bind_target(&mut self, target: RenderTarget, size: Extent2<u32>) {
        self.target = target;
        self.log.push(GpuCommand::BindTarget(target, size));
    }

    fn clear(&mut self, color: Rgba<f32>) {
        if let RenderTarget::Offscreen(fb) = self.target {
            if let Some(fb) = self.framebuffers.get_mut(fb.0) {
                fb.clear = color;
            }
        }
        self.log.push(GpuCommand::Clear(color));
    }

    fn copy_to_texture(&mut self, src: FramebufferId, attachment: u32, dst: TextureId) {
        self.log.push(GpuCommand::CopyToTexture { src, attachment, dst });
    }

    fn read_pixels(
        &mut self,
        src: FramebufferId,
        attachment: u32,
        format: TextureFormat,
    ) -> Result<Vec<f32>, GpuError> {
        let fb = self.framebuffers.get(src.0).ok_or(GpuError::ContextLost)?;
        let texture = fb.color.get(attachment as usize)
            .and_then(|t| self.textures.get(t.0))
            .ok_or(GpuError::ContextLost)?;
        if format.is_float() && !texture.format.is_float() {
            return Err(GpuError::UnsupportedFormat(format));
        }
        self.log.push(GpuCommand::ReadPixels { src, attachment });
        let num_pixels = (texture.size.w * texture.size.h) as usize;
        let clear = fb.clear;
        Ok((0..num_pixels).flat_map(|_| [clear.r, clear.g, clear.b, clear.a]).collect())
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId, GpuError> {
        if self.config.failing_program.as_deref() == Some(desc.name.as_str()) {
            return Err(GpuError::ShaderCompile {
                program: desc.name.clone(),
                log: "ERROR: 0:1: forced failure".into(),
                line: Some(1),
            });
        }
        Ok(ProgramId(self.programs.insert(desc.name.clone())))
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.contains(program.0) {
            self.programs.remove(program.0);
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        self.program = Some(program);
        let name = self.programs.get(program.0).cloned().unwrap_or_default();
        self.log.push(GpuCommand::UseProgram(name));
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.log.push(GpuCommand::SetUniform(name.to_owned(), value));
    }

    fn bind_uniform_block(&mut self, binding: u32, buffer: BufferId) {
        self.log.push(GpuCommand::BindUniformBlock { binding, buffer });
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.log.push(GpuCommand::SetBlendMode(mode));
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.log.push(GpuCommand::SetDepthTest(enabled));
    }

    fn draw(&mut self, vao: VertexArrayId, topology: Topology, first: u32, count: u32) {
        let program = self.program
            .and_then(|p| self.programs.get(p.0))
            .cloned();
        self.log.push(GpuCommand::Draw {
            program,
            vao,
            topology,
            first,
            count,
        });
    }
}


/// Surface with a fixed size whose contexts are `HeadlessGpu`s sharing one
/// `CommandLog`.
#[derive(Debug, Clone)]
pub struct HeadlessSurface {
    pub size: Extent2<u32>,
    pub pixel_scale: f32,
    pub config: HeadlessConfig,
    log: CommandLog,
}

impl HeadlessSurface {
    pub fn new(size: Extent2<u32>, config: HeadlessConfig) -> Self {
        HeadlessSurface {
            size,
            pixel_scale: 1.0,
            config,
            log: CommandLog::new(),
        }
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }
}

impl BackingSurface for HeadlessSurface {
    fn size(&self) -> Extent2<u32> {
        self.size
    }

    fn pixel_scale(&self) -> f32 {
        self.pixel_scale
    }

    fn create_context(&mut self, tier: ContextTier) -> Result<Box<dyn Gpu>, GpuError> {
        let mut config = self.config.clone();
        if tier == ContextTier::Basic {
            config.capabilities.tier = ContextTier::Basic;
        }
        debug!(?tier, got = ?config.capabilities.tier, "creating headless context");
        Ok(Box::new(HeadlessGpu::new(config, self.log.clone())))
    }
}


#[test]
fn test_buffer_limit() {
    let log = CommandLog::new();
    let mut gpu = HeadlessGpu::new(HeadlessConfig::extended(), log.clone());
    let a = gpu.create_buffer(BufferKind::Uniform, &[0; 16]).unwrap();
    log.limit_buffers(Some(1));
    assert_eq!(
        gpu.create_buffer(BufferKind::Uniform, &[0; 16]),
        Err(GpuError::OutOfMemory { what: "buffer" }),
    );
    gpu.delete_buffer(a);
    assert!(gpu.create_buffer(BufferKind::Uniform, &[0; 16]).is_ok());
    log.limit_buffers(None);
    assert!(gpu.create_buffer(BufferKind::Uniform, &[0; 16]).is_ok());
    assert_eq!(log.live_buffers(), 2);
}

#[test]
fn test_texture_exhaustion() {
    let mut config = HeadlessConfig::extended();
    config.max_textures = Some(1);
    let mut gpu = HeadlessGpu::new(config, CommandLog::new());
    let desc = TextureDesc::attachment(Extent2::new(4, 4), TextureFormat::Rgba8, false);
    let a = gpu.create_texture(&desc).unwrap();
    assert_eq!(
        gpu.create_texture(&desc),
        Err(GpuError::OutOfMemory { what: "texture" }),
    );
    gpu.delete_texture(a);
    assert!(gpu.create_texture(&desc).is_ok());
    assert_eq!(gpu.log().live_textures(), 1);
}
