//! GPU residency of tilesets, and the mapping from tile type ids to them.

use crate::texture_allocator::{
    TextureAllocator,
    TextureHandle,
    TextureRequest,
};
use std::{
    collections::HashMap,
    sync::Arc,
};
use anyhow::*;
use std::result::Result::Ok;
use graphics::{
    Gpu,
    GpuError,
    TextureFormat,
    Filter,
    UniformValue,
};
use tile_data::{
    MapSource,
    TilesetSource,
    TilesetReplaced,
    TileType,
    TileTypeId,
    TextureLayer,
};
use vek::*;


pub const TILESET_COLOR_UNIT: u32 = 0;
pub const TILESET_NORMAL_UNIT: u32 = 1;
pub const TILESET_MATERIAL_UNIT: u32 = 2;


/// Index of a tileset within its `TilesetMapping`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TilesetIndex(pub usize);


/// A tileset and its texture slots, if resident.
#[derive(Debug)]
pub struct Tileset {
    source: Arc<dyn TilesetSource>,
    /// Color, normal, material.
    textures: Option<[TextureHandle; 3]>,
}

impl Tileset {
    fn new(source: Arc<dyn TilesetSource>) -> Self {
        Tileset {
            source,
            textures: None,
        }
    }

    pub fn source(&self) -> &Arc<dyn TilesetSource> {
        &self.source
    }

    pub fn tile_type(&self, id: TileTypeId) -> Option<TileType> {
        self.source.tile_type(id)
    }

    /// Pixel size of one tile.
    pub fn pixel_size(&self) -> Extent2<u32> {
        self.source.pixel_size()
    }

    /// Atlas size in tiles.
    pub fn size(&self) -> Extent2<u32> {
        self.source.texture_size()
    }

    /// Whether all layers are resident.
    pub fn is_available(&self, allocator: &TextureAllocator) -> bool {
        self.textures.as_ref()
            .map(|handles| handles.iter().all(|h| allocator.is_available(h)))
            .unwrap_or(false)
    }

    fn allocate(
        &mut self,
        gpu: &mut dyn Gpu,
        allocator: &mut TextureAllocator,
        linear_normals: bool,
    ) -> Result<(), GpuError> {
        self.deallocate(allocator);

        let atlas = self.source.pixel_size() * self.source.texture_size();
        let request = |mag_filter| TextureRequest {
            size: atlas,
            format: TextureFormat::Rgba8,
            mag_filter,
        };
        let normal_filter = if linear_normals { Filter::Linear } else { Filter::Nearest };
        let handles = allocator.parallel_allocate(gpu, &[
            request(Filter::Nearest),
            request(normal_filter),
            request(Filter::Nearest),
        ])?;

        for (handle, layer) in handles.iter().zip(TextureLayer::ALL) {
            if let Some(pixels) = self.source.texture(layer) {
                allocator.upload(gpu, handle, pixels)?;
            }
        }
        self.textures = Some([handles[0], handles[1], handles[2]]);
        Ok(())
    }

    fn deallocate(&mut self, allocator: &mut TextureAllocator) {
        for handle in self.textures.take().iter().flatten() {
            allocator.free(handle);
        }
    }
}


/// Maps tile type ids to tilesets, registering tilesets lazily as the map
/// source reports them.
#[derive(Debug)]
pub struct TilesetMapping {
    tilesets: Vec<Tileset>,
    mapping: HashMap<TileTypeId, TilesetIndex>,
    allocator: TextureAllocator,
    linear_normals: bool,
}

impl TilesetMapping {
    pub fn new(use_texture_arrays: bool, linear_normals: bool) -> Self {
        TilesetMapping {
            tilesets: Vec::new(),
            mapping: HashMap::new(),
            allocator: TextureAllocator::new(use_texture_arrays),
            linear_normals,
        }
    }

    /// Tileset serving `id`, asking the map source about unknown ids.
    pub fn get_tileset(&mut self, map: &dyn MapSource, id: TileTypeId) -> Option<TilesetIndex> {
        if !self.mapping.contains_key(&id) {
            if let Some(source) = map.tileset(id) {
                self.add_tileset(source);
            }
        }
        self.mapping.get(&id).copied()
    }

    pub fn tileset(&self, index: TilesetIndex) -> &Tileset {
        &self.tilesets[index.0]
    }

    pub fn num_tilesets(&self) -> usize {
        self.tilesets.len()
    }

    pub fn add_tileset(&mut self, source: Arc<dyn TilesetSource>) -> TilesetIndex {
        if let Some(i) = self.tilesets.iter().position(|t| Arc::ptr_eq(&t.source, &source)) {
            return TilesetIndex(i);
        }
        let index = TilesetIndex(self.tilesets.len());
        for id in source.tile_types() {
            self.mapping.insert(id, index);
        }
        debug!(?index, tile_types = source.tile_types().len(), "registered tileset");
        self.tilesets.push(Tileset::new(source));
        index
    }

    /// Swap a registered tileset's source for its replacement and remap its
    /// tile types. Its textures are reuploaded on next bind.
    pub fn update_tileset(&mut self, replaced: &TilesetReplaced) {
        let Self { tilesets, mapping, allocator, .. } = self;
        let found = tilesets.iter().position(|t| Arc::ptr_eq(&t.source, &replaced.old));
        let i = match found {
            Some(i) => i,
            None => {
                trace!("replaced tileset was never registered here");
                return;
            }
        };
        let index = TilesetIndex(i);
        let tileset = &mut tilesets[i];
        tileset.deallocate(allocator);
        tileset.source = Arc::clone(&replaced.new);
        mapping.retain(|_, &mut mapped| mapped != index);
        for id in replaced.new.tile_types() {
            mapping.insert(id, index);
        }
        debug!(?index, "replaced tileset");
    }

    /// Make a tileset resident if it isn't.
    pub fn ensure_available(&mut self, gpu: &mut dyn Gpu, index: TilesetIndex) -> Result<(), GpuError> {
        let tileset = &mut self.tilesets[index.0];
        if !tileset.is_available(&self.allocator) {
            trace!(?index, "uploading tileset textures");
            tileset.allocate(gpu, &mut self.allocator, self.linear_normals)?;
        }
        Ok(())
    }

    /// Bind a tileset's textures and set its uniforms on the program in use.
    pub fn bind(&mut self, gpu: &mut dyn Gpu, index: TilesetIndex) -> Result<()> {
        self.ensure_available(gpu, index)
            .with_context(|| format!("making tileset {} resident", index.0))?;
        let tileset = &self.tilesets[index.0];
        let handles = tileset.textures.ok_or(GpuError::OutOfMemory { what: "tileset" })?;
        let units = [TILESET_COLOR_UNIT, TILESET_NORMAL_UNIT, TILESET_MATERIAL_UNIT];
        for (handle, unit) in handles.iter().zip(units) {
            let texture = self.allocator.touch(handle)
                .ok_or(GpuError::OutOfMemory { what: "evicted tileset" })?;
            gpu.bind_texture(unit, texture);
        }
        let size = tileset.size();
        gpu.set_uniform("u_tileset_size", UniformValue::Vec2(Vec2::new(size.w as f32, size.h as f32)));
        gpu.set_uniform("u_tileset_layer", UniformValue::Int(handles[0].index as i32));
        Ok(())
    }

    pub fn dispose(&mut self, gpu: &mut dyn Gpu) {
        for tileset in &mut self.tilesets {
            tileset.textures = None;
        }
        self.allocator.dispose(gpu);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use graphics::{
        HeadlessGpu,
        HeadlessConfig,
        CommandLog,
        GpuCommand,
    };
    use tile_data::{
        MemoryMap,
        MemoryTileset,
        GeometryKind,
    };

    fn tileset(ids: &[TileTypeId]) -> Arc<dyn TilesetSource> {
        let mut set = MemoryTileset::new(Extent2::new(16, 16), Extent2::new(4, 4));
        for &id in ids {
            set = set.with_tile_type(id, TileType::still(Vec2::zero(), GeometryKind::Flat));
        }
        Arc::new(set)
    }

    #[test]
    fn test_lazy_registration() {
        let map = MemoryMap::new();
        let set = tileset(&[1, 2]);
        map.add_tileset(set.clone());

        let mut mapping = TilesetMapping::new(true, true);
        assert_eq!(mapping.get_tileset(&map, 7), None);
        let a = mapping.get_tileset(&map, 1).unwrap();
        let b = mapping.get_tileset(&map, 2).unwrap();
        assert_eq!(a, b);
        assert_eq!(mapping.num_tilesets(), 1);
        assert_eq!(mapping.add_tileset(set), a);
    }

    #[test]
    fn test_update_remaps_and_reuploads() {
        let set = tileset(&[1, 2]);
        let mut mapping = TilesetMapping::new(true, false);
        let index = mapping.add_tileset(set.clone());

        let log = CommandLog::new();
        let mut gpu = HeadlessGpu::new(HeadlessConfig::extended(), log.clone());
        mapping.bind(&mut gpu, index).unwrap();
        assert_eq!(log.count(|c| matches!(c, GpuCommand::UploadTexture { .. })), 3);

        // already resident
        mapping.bind(&mut gpu, index).unwrap();
        assert_eq!(log.count(|c| matches!(c, GpuCommand::UploadTexture { .. })), 3);

        let replacement = tileset(&[2, 3]);
        mapping.update_tileset(&TilesetReplaced { old: set, new: replacement.clone() });
        assert!(!mapping.tileset(index).is_available(&mapping.allocator));
        assert!(Arc::ptr_eq(mapping.tileset(index).source(), &replacement));
        assert_eq!(mapping.mapping.get(&1), None);
        assert_eq!(mapping.mapping.get(&2), Some(&index));
        assert_eq!(mapping.mapping.get(&3), Some(&index));
        mapping.bind(&mut gpu, index).unwrap();
        assert_eq!(log.count(|c| matches!(c, GpuCommand::UploadTexture { .. })), 6);
    }

    #[test]
    fn test_update_of_unknown_tileset_is_ignored() {
        let mut mapping = TilesetMapping::new(true, false);
        let index = mapping.add_tileset(tileset(&[1]));
        mapping.update_tileset(&TilesetReplaced { old: tileset(&[1]), new: tileset(&[4]) });
        assert_eq!(mapping.mapping.get(&1), Some(&index));
        assert_eq!(mapping.mapping.get(&4), None);
    }
}
