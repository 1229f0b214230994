//! The graphics seam of the renderer.
//!
//! Engine code talks to the GPU only through the `Gpu` trait, a small
//! GL-style immediate command interface over typed handles, and acquires
//! contexts through a `BackingSurface`. Which commands a context supports
//! is described by its `Capabilities`, queried once at context creation.
//!
//! `HeadlessGpu` implements the trait without a device. It records every
//! state-changing command into a shared log and can be configured to
//! simulate capability tiers, resource exhaustion, shader compile failure
//! and context loss, which is what the engine's tests run against.

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;


mod gpu;
mod surface;
mod framebuffer;
mod headless;
pub mod std140;
pub mod vertex;


pub use crate::{
    gpu::{
        Gpu,
        GpuError,
        ContextTier,
        Capabilities,
        BufferId,
        VertexArrayId,
        TextureId,
        FramebufferId,
        ProgramId,
        BufferKind,
        VertexAttrib,
        TextureFormat,
        TextureDesc,
        Filter,
        BlendMode,
        Topology,
        RenderTarget,
        UniformValue,
        ProgramDesc,
    },
    surface::BackingSurface,
    framebuffer::{
        Framebuffer,
        Attachment,
    },
    headless::{
        HeadlessGpu,
        HeadlessConfig,
        HeadlessSurface,
        GpuCommand,
        CommandLog,
    },
};
