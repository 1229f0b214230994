//! Graphics context initialization: capability queries, backend selection
//! and program compilation.

use crate::{
    composite::{
        self,
        CompositeFormat,
    },
    settings::{
        GraphicsSettings,
        DebugFlags,
    },
    uniforms::MAX_POINT_LIGHTS,
};
use anyhow::*;
use anyhow::Context as _;
use std::result::Result::Ok;
use graphics::{
    Gpu,
    BackingSurface,
    Capabilities,
    ContextTier,
    ProgramDesc,
    ProgramId,
};


/// How uniform data reaches the shaders. Selected once per context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RenderBackend {
    /// Every draw sets plain uniforms.
    ImmediateUniforms,
    /// Uniform buffers bound to fixed binding points.
    UniformBlocks,
}

impl RenderBackend {
    pub fn for_capabilities(caps: &Capabilities) -> Self {
        if caps.uniform_blocks() {
            RenderBackend::UniformBlocks
        } else {
            RenderBackend::ImmediateUniforms
        }
    }
}


/// What this context renders with, derived from its capabilities and the
/// settings it was created under.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextParams {
    pub tier: ContextTier,
    pub backend: RenderBackend,
    pub composite: CompositeFormat,
    pub half_float_linear: bool,
    pub float_linear: bool,
    pub linear_normals: bool,
    pub point_lights: bool,
    pub macrotiles: bool,
    pub debug: DebugFlags,
}

impl ContextParams {
    pub fn new(caps: &Capabilities, settings: &GraphicsSettings) -> Self {
        ContextParams {
            tier: caps.tier,
            backend: RenderBackend::for_capabilities(caps),
            composite: composite::select_format(caps, settings.hdr),
            half_float_linear: caps.half_float_linear,
            float_linear: caps.float_linear,
            linear_normals: settings.linear_normals,
            point_lights: settings.point_lights,
            macrotiles: settings.macrotiles,
            debug: settings.debug.clone(),
        }
    }
}


/// Programs of the bloom passes.
#[derive(Debug, Copy, Clone)]
pub struct BloomPrograms {
    pub threshold: ProgramId,
    pub blur: ProgramId,
    pub combine: ProgramId,
    pub merge: ProgramId,
}

#[derive(Debug, Copy, Clone)]
pub struct Programs {
    pub tile_chunk: ProgramId,
    pub macrotile: ProgramId,
    pub composite_final: ProgramId,
    pub bloom: Option<BloomPrograms>,
}

fn program_desc(name: &str, params: &ContextParams) -> ProgramDesc {
    let mut desc = ProgramDesc::new(name)
        .define("MAX_POINT_LIGHTS", MAX_POINT_LIGHTS);
    if params.backend == RenderBackend::UniformBlocks {
        desc = desc.define("FEATURE_UNIFORM_BLOCKS", 1);
    }
    if params.composite.color.is_float() {
        desc = desc.define("FEATURE_FBO_FLOAT", 1);
    }
    if params.point_lights {
        desc = desc.define("FEATURE_POINT_LIGHTS", 1);
    }
    let debug = [
        ("DEBUG_SHOW_GEOMETRY", params.debug.show_geometry),
        ("DEBUG_SHOW_LIGHT_VOLUMES", params.debug.show_light_volumes),
        ("DEBUG_SHOW_MACROTILES", params.debug.show_macrotiles),
    ];
    for (key, on) in debug {
        if on {
            desc = desc.define(key, 1);
        }
    }
    desc
}

fn compile(gpu: &mut dyn Gpu, name: &str, params: &ContextParams) -> Result<ProgramId> {
    gpu.create_program(&program_desc(name, params))
        .with_context(|| format!("compiling program {:?}", name))
}

impl Programs {
    pub fn compile(gpu: &mut dyn Gpu, params: &ContextParams) -> Result<Self> {
        let bloom = if params.composite.bloom {
            Some(BloomPrograms {
                threshold: compile(gpu, "bloom_threshold", params)?,
                blur: compile(gpu, "bloom_blur", params)?,
                combine: compile(gpu, "bloom_combine", params)?,
                merge: compile(gpu, "bloom_final", params)?,
            })
        } else {
            None
        };
        Ok(Programs {
            tile_chunk: compile(gpu, "tile_chunk", params)?,
            macrotile: compile(gpu, "macrotile", params)?,
            composite_final: compile(gpu, "composite_final", params)?,
            bloom,
        })
    }

    fn all(&self) -> Vec<ProgramId> {
        let mut all = vec![self.tile_chunk, self.macrotile, self.composite_final];
        if let Some(bloom) = self.bloom {
            all.extend([bloom.threshold, bloom.blur, bloom.combine, bloom.merge]);
        }
        all
    }
}


/// A live graphics context with everything compiled against it.
pub struct Context {
    pub gpu: Box<dyn Gpu>,
    pub params: ContextParams,
    pub programs: Programs,
}

impl Context {
    /// Create a context on the surface and compile all programs. Shader
    /// compile failure is fatal.
    pub fn new<S: BackingSurface>(surface: &mut S, settings: &GraphicsSettings) -> Result<Self> {
        let mut gpu = surface.create_context(settings.context_tier)
            .context("creating graphics context")?;
        let caps = gpu.capabilities().clone();
        let params = ContextParams::new(&caps, settings);
        info!(
            tier = ?params.tier,
            backend = ?params.backend,
            composite = ?params.composite,
            half_float = caps.color_buffer_half_float,
            float = caps.color_buffer_float,
            half_float_linear = caps.half_float_linear,
            float_linear = caps.float_linear,
            renderer = %caps.renderer_info,
            "initialized graphics context",
        );
        let programs = Programs::compile(gpu.as_mut(), &params)?;
        Ok(Context {
            gpu,
            params,
            programs,
        })
    }

    pub fn gpu(&mut self) -> &mut dyn Gpu {
        self.gpu.as_mut()
    }

    pub fn dispose(&mut self) {
        for program in self.programs.all() {
            self.gpu.delete_program(program);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("params", &self.params)
            .field("programs", &self.programs)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use graphics::{
        HeadlessSurface,
        HeadlessConfig,
        GpuError,
    };
    use vek::*;

    #[test]
    fn test_backend_follows_tier() {
        let mut surface = HeadlessSurface::new(Extent2::new(64, 64), HeadlessConfig::extended());
        let ctx = Context::new(&mut surface, &GraphicsSettings::default()).unwrap();
        assert_eq!(ctx.params.backend, RenderBackend::UniformBlocks);
        assert!(ctx.programs.bloom.is_some());

        let settings = GraphicsSettings {
            context_tier: ContextTier::Basic,
            ..GraphicsSettings::default()
        };
        let ctx = Context::new(&mut surface, &settings).unwrap();
        assert_eq!(ctx.params.backend, RenderBackend::ImmediateUniforms);
        assert!(ctx.programs.bloom.is_none());
    }

    #[test]
    fn test_shader_failure_names_program() {
        let mut config = HeadlessConfig::extended();
        config.failing_program = Some("macrotile".into());
        let mut surface = HeadlessSurface::new(Extent2::new(64, 64), config);
        let err = Context::new(&mut surface, &GraphicsSettings::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("macrotile"));
        match err.downcast_ref::<GpuError>() {
            Some(GpuError::ShaderCompile { program, line, .. }) => {
                assert_eq!(program, "macrotile");
                assert_eq!(*line, Some(1));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
