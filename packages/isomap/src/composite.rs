//! The offscreen target the scene is drawn into, and its presentation:
//! optional bloom, then tonemapping onto the screen or readback for capture.

use crate::{
    capture::Capture,
    context::{
        Context,
        BloomPrograms,
    },
    settings::HdrMode,
};
use anyhow::*;
use anyhow::Context as _;
use std::result::Result::Ok;
use graphics::{
    Gpu,
    GpuError,
    Capabilities,
    ContextTier,
    BufferId,
    BufferKind,
    VertexArrayId,
    VertexAttrib,
    TextureId,
    TextureDesc,
    TextureFormat,
    Filter,
    BlendMode,
    Topology,
    RenderTarget,
    UniformValue,
    Framebuffer,
    vertex,
};
use vek::*;


/// Downscale factors of the bloom tiers, finest first.
pub const BLOOM_FACTORS: [u32; 3] = [4, 8, 16];
/// Weights the bloom tiers are combined with.
pub const BLOOM_WEIGHTS: [f32; 3] = [0.5, 0.3, 0.2];

const CLEAR_COLOR: Rgba<f32> = Rgba {
    r: 0.0,
    g: 0.0,
    b: 0.0,
    a: 1.0,
};


/// Attachment formats of the composite target.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CompositeFormat {
    pub color: TextureFormat,
    /// Single-channel tonemap attachment.
    pub aux: Option<TextureFormat>,
    pub bloom: bool,
}

/// Pick the best composite format the context supports under the HDR
/// setting: half float, then float, then 8-bit. Bloom needs a linearly
/// filterable float format.
pub fn select_format(caps: &Capabilities, hdr: HdrMode) -> CompositeFormat {
    if caps.tier == ContextTier::Basic {
        return CompositeFormat {
            color: TextureFormat::Rgba8,
            aux: None,
            bloom: false,
        };
    }

    let half = hdr != HdrMode::Off && caps.color_buffer_half_float;
    let full = hdr == HdrMode::Full && caps.color_buffer_float;
    let half_linear = half && caps.half_float_linear;
    let full_linear = full && caps.float_linear;

    let color = if half_linear {
        TextureFormat::Rgba16F
    } else if full_linear {
        TextureFormat::Rgba32F
    } else if half {
        TextureFormat::Rgba16F
    } else if full {
        TextureFormat::Rgba32F
    } else {
        TextureFormat::Rgba8
    };
    CompositeFormat {
        color,
        aux: Some(TextureFormat::R8),
        bloom: half_linear || full_linear,
    }
}


/// Full-screen quad, drawn as a 4-vertex strip.
#[derive(Debug)]
struct Quad {
    buffer: BufferId,
    vao: VertexArrayId,
}

impl Quad {
    fn new(gpu: &mut dyn Gpu) -> Result<Self, GpuError> {
        let corners = [
            Vec2::new(0.0f32, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
        ];
        let buffer = gpu.create_buffer(BufferKind::Vertex, &vertex::to_bytes(&corners))?;
        let vao = gpu.create_vertex_array(None, &[VertexAttrib {
            location: 0,
            buffer,
            components: 2,
        }])?;
        Ok(Quad { buffer, vao })
    }

    fn draw(&self, gpu: &mut dyn Gpu) {
        gpu.draw(self.vao, Topology::TriangleStrip, 0, 4);
    }

    fn dispose(&self, gpu: &mut dyn Gpu) {
        gpu.delete_vertex_array(self.vao);
        gpu.delete_buffer(self.buffer);
    }
}


#[derive(Debug)]
struct BloomTier {
    factor: u32,
    weight: f32,
    /// Ping-pong pair for the separable blur. The result ends up in `[0]`.
    swap: [Framebuffer; 2],
}

#[derive(Debug)]
struct Bloom {
    programs: BloomPrograms,
    /// Mipmapped copy of the composite color. Framebuffer attachments can't
    /// be sampled with mip levels.
    source: Option<(TextureId, Extent2<u32>)>,
    tiers: Vec<BloomTier>,
    /// Weighted sum of the tiers.
    combined: Framebuffer,
}

fn scaled(size: Extent2<u32>, factor: u32) -> Extent2<u32> {
    size.map(|n| (n / factor).max(1))
}

fn mip_levels(size: Extent2<u32>) -> u32 {
    32 - size.w.max(size.h).max(1).leading_zeros()
}

impl Bloom {
    fn new(programs: BloomPrograms, format: TextureFormat) -> Self {
        let tiers = BLOOM_FACTORS.iter()
            .zip(BLOOM_WEIGHTS)
            .map(|(&factor, weight)| {
                let mut swap = [Framebuffer::new(vec![format]), Framebuffer::new(vec![format])];
                for fb in &mut swap {
                    fb.linear_sample = true;
                    fb.depth = false;
                }
                BloomTier { factor, weight, swap }
            })
            .collect();
        let mut combined = Framebuffer::new(vec![format]);
        combined.linear_sample = true;
        combined.depth = false;
        Bloom {
            programs,
            source: None,
            tiers,
            combined,
        }
    }

    /// Copy the composite color into the mipmapped source texture,
    /// recreating it if the size changed.
    fn update_source(
        &mut self,
        gpu: &mut dyn Gpu,
        composite: &Framebuffer,
        format: TextureFormat,
    ) -> Result<TextureId, GpuError> {
        let size = composite.size;
        let texture = match self.source {
            Some((texture, source_size)) if source_size == size => texture,
            _ => {
                if let Some((old, _)) = self.source.take() {
                    gpu.delete_texture(old);
                }
                let texture = gpu.create_texture(&TextureDesc {
                    size,
                    layers: None,
                    format,
                    mip_levels: mip_levels(size),
                    min_filter: Filter::LinearMipmap,
                    mag_filter: Filter::Linear,
                })?;
                self.source = Some((texture, size));
                texture
            }
        };
        let fb = composite.id().ok_or(GpuError::ContextLost)?;
        gpu.copy_to_texture(fb, 0, texture);
        gpu.generate_mipmaps(texture);
        Ok(texture)
    }

    /// Add the bloom of the composite color back onto it.
    fn apply(
        &mut self,
        gpu: &mut dyn Gpu,
        quad: &Quad,
        composite: &mut Framebuffer,
        format: TextureFormat,
    ) -> Result<(), GpuError> {
        let source = self.update_source(gpu, composite, format)?;
        let size = composite.size;

        for tier in &mut self.tiers {
            let tier_size = scaled(size, tier.factor);
            for fb in &mut tier.swap {
                fb.size = tier_size;
            }

            tier.swap[0].bind(gpu)?;
            gpu.clear(Rgba::zero());
            gpu.use_program(self.programs.threshold);
            gpu.set_uniform("u_source_lod", UniformValue::Float((tier.factor as f32).log2()));
            gpu.bind_texture(0, source);
            quad.draw(gpu);

            gpu.use_program(self.programs.blur);
            for (vertical, from, to) in [(0, 0, 1), (1, 1, 0)] {
                let input = tier.swap[from].color(0).ok_or(GpuError::ContextLost)?;
                tier.swap[to].bind(gpu)?;
                if vertical == 0 {
                    gpu.clear(Rgba::zero());
                }
                gpu.set_uniform("u_vert", UniformValue::Int(vertical));
                gpu.bind_texture(0, input);
                quad.draw(gpu);
            }
        }

        self.combined.size = scaled(size, BLOOM_FACTORS[0]);
        self.combined.bind(gpu)?;
        gpu.clear(Rgba::zero());
        gpu.set_blend_mode(BlendMode::Additive);
        gpu.use_program(self.programs.combine);
        for tier in &self.tiers {
            let blurred = tier.swap[0].color(0).ok_or(GpuError::ContextLost)?;
            gpu.set_uniform("u_weight", UniformValue::Float(tier.weight));
            gpu.bind_texture(0, blurred);
            quad.draw(gpu);
        }

        let combined = self.combined.color(0).ok_or(GpuError::ContextLost)?;
        composite.bind(gpu)?;
        gpu.use_program(self.programs.merge);
        gpu.bind_texture(0, combined);
        quad.draw(gpu);
        gpu.set_blend_mode(BlendMode::Normal);
        Ok(())
    }

    fn dispose(&mut self, gpu: &mut dyn Gpu) {
        if let Some((texture, _)) = self.source.take() {
            gpu.delete_texture(texture);
        }
        for tier in &mut self.tiers {
            for fb in &mut tier.swap {
                fb.dispose(gpu);
            }
        }
        self.combined.dispose(gpu);
    }
}


/// Offscreen target the scene is composited in.
#[derive(Debug)]
pub struct Composite {
    format: CompositeFormat,
    framebuffer: Framebuffer,
    bloom: Option<Bloom>,
    quad: Quad,
}

impl Composite {
    pub fn new(ctx: &mut Context) -> Result<Self> {
        let format = ctx.params.composite;
        let mut formats = vec![format.color];
        formats.extend(format.aux);
        let framebuffer = Framebuffer::new(formats);

        let bloom = match (format.bloom, ctx.programs.bloom) {
            (true, Some(programs)) => Some(Bloom::new(programs, format.color)),
            _ => None,
        };
        let quad = Quad::new(ctx.gpu.as_mut()).context("creating composite quad")?;
        debug!(?format.color, bloom = bloom.is_some(), "created composite");
        Ok(Composite {
            format,
            framebuffer,
            bloom,
            quad,
        })
    }

    pub fn format(&self) -> CompositeFormat {
        self.format
    }

    pub fn size(&self) -> Extent2<u32> {
        self.framebuffer.size
    }

    /// Bind and clear the composite target at `size` device pixels, with
    /// depth testing and straight alpha blending.
    pub fn begin(&mut self, gpu: &mut dyn Gpu, size: Extent2<u32>) -> Result<()> {
        self.framebuffer.size = size.map(|n| n.max(1));
        self.framebuffer.bind(gpu).context("binding composite target")?;
        gpu.clear(CLEAR_COLOR);
        gpu.set_depth_test(true);
        gpu.set_blend_mode(BlendMode::Normal);
        Ok(())
    }

    fn finish_scene(&mut self, gpu: &mut dyn Gpu) -> Result<()> {
        gpu.set_depth_test(false);
        if let Some(bloom) = self.bloom.as_mut() {
            bloom.apply(gpu, &self.quad, &mut self.framebuffer, self.format.color)
                .context("applying bloom")?;
        }
        Ok(())
    }

    /// Tonemap the composite onto the screen.
    pub fn present(&mut self, ctx: &mut Context, screen_size: Extent2<u32>) -> Result<()> {
        let gpu = ctx.gpu.as_mut();
        self.finish_scene(gpu)?;

        gpu.bind_target(RenderTarget::Screen, screen_size);
        gpu.clear(CLEAR_COLOR);
        gpu.use_program(ctx.programs.composite_final);
        if let Some(color) = self.framebuffer.color(0) {
            gpu.bind_texture(0, color);
        }
        if let Some(tonemap) = self.framebuffer.color(1) {
            gpu.bind_texture(1, tonemap);
        }
        self.quad.draw(gpu);
        Ok(())
    }

    /// Read the composite back as float RGBA instead of presenting it.
    pub fn capture(&mut self, ctx: &mut Context) -> Result<Capture> {
        let gpu = ctx.gpu.as_mut();
        self.finish_scene(gpu)?;

        let fb = self.framebuffer.id().ok_or(GpuError::ContextLost)?;
        let pixels = gpu.read_pixels(fb, 0, TextureFormat::Rgba32F)
            .context("reading back composite")?;
        Ok(Capture {
            size: self.framebuffer.size,
            pixels,
        })
    }

    pub fn dispose(&mut self, gpu: &mut dyn Gpu) {
        self.framebuffer.dispose(gpu);
        if let Some(bloom) = self.bloom.as_mut() {
            bloom.dispose(gpu);
        }
        self.quad.dispose(gpu);
    }
}
