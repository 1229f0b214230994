//! Streaming renderer for infinite isometric tile maps.
//!
//! The map is split into chunks which are created as they come into view,
//! rebuilt when their tiles change, and collected once they've been out of
//! view for a while. Chunks carry their tiles' point lights, which are culled
//! against neighboring chunks by range, and can cache themselves as macrotile
//! impostors once they've settled. Everything is drawn into an offscreen
//! composite, HDR with bloom where the context supports it, then presented
//! or captured.
//!
//! The engine talks to the GPU through `graphics::Gpu`, so it runs the same
//! against a real context or a headless one.

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;


pub mod camera;
pub mod frame;
pub mod settings;
pub mod context;
pub mod uniforms;
pub mod texture_allocator;
pub mod tileset;
pub mod render_state;
pub mod tile_buffers;
pub mod macrotile;
pub mod lighting;
pub mod chunk;
pub mod tile_map;
pub mod composite;
pub mod capture;
pub mod renderer;
pub mod logging;

#[cfg(test)]
mod tests;


pub use crate::{
    camera::Camera,
    capture::Capture,
    lighting::{
        GlobalLighting,
        LitEntity,
        LitEntityId,
    },
    renderer::{
        Renderer,
        EntityLayer,
    },
    settings::{
        GraphicsSettings,
        HdrMode,
        DebugFlags,
        StreamingConfig,
    },
};
