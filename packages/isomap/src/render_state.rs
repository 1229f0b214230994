use crate::tileset::{
    TilesetIndex,
    TilesetMapping,
};
use anyhow::*;
use std::result::Result::Ok;
use graphics::{
    Gpu,
    BlendMode,
};


/// Render state carried across the draws of a frame, so redundant binds
/// can be skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderState {
    /// Tileset whose textures are bound.
    pub tileset: Option<TilesetIndex>,
    pub blend: Option<BlendMode>,
}

impl RenderState {
    pub fn new() -> Self {
        RenderState::default()
    }

    /// Bind a tileset unless it's already bound. Returns whether a bind
    /// happened.
    pub fn bind_tileset(
        &mut self,
        gpu: &mut dyn Gpu,
        tilesets: &mut TilesetMapping,
        index: TilesetIndex,
    ) -> Result<bool> {
        if self.tileset == Some(index) {
            return Ok(false);
        }
        self.tileset = None;
        tilesets.bind(gpu, index)?;
        self.tileset = Some(index);
        Ok(true)
    }

    pub fn set_blend(&mut self, gpu: &mut dyn Gpu, mode: BlendMode) {
        if self.blend != Some(mode) {
            gpu.set_blend_mode(mode);
            self.blend = Some(mode);
        }
    }

    /// Forget bound textures, after something else used the texture units.
    pub fn reset_textures(&mut self) {
        self.tileset = None;
    }
}
