//! One chunk of the tile map: its geometry, animation, lights and macrotile.

use crate::{
    context::{
        Context,
        RenderBackend,
    },
    frame::{
        FrameContext,
        TimeBudget,
    },
    lighting::MAX_TOTAL_POINT_LIGHTS,
    macrotile::{
        Macrotile,
        MacrotileArena,
    },
    render_state::RenderState,
    tile_buffers::TileBuffers,
    tileset::{
        TilesetIndex,
        TilesetMapping,
    },
    uniforms::{
        UniformSlot,
        ChunkBlock,
        ChunkLightingBlock,
        MAX_POINT_LIGHTS,
    },
};
use std::collections::HashMap;
use anyhow::*;
use anyhow::Context as _;
use std::result::Result::Ok;
use graphics::{
    Gpu,
    GpuError,
    BlendMode,
    UniformValue,
};
use mesh_data::{
    MeshData,
    build_tile_geometry,
};
use tile_data::{
    CHUNK_SIZE,
    ChunkCoord,
    MapSource,
    PerTile,
    PointLight,
    TileType,
    TileTypeId,
    lti,
};
use vek::*;


/// Angle of the oblique projection tiles are built for, from the vertical.
pub const PROJECTION_ANGLE: f32 = std::f32::consts::FRAC_PI_3;
/// Height of tile textures relative to their width.
pub const TEXTURE_ASPECT: f32 = 1.0;

/// Seconds the load-in animation runs.
pub const LOAD_ANIM_UPDATE_TIME: f32 = 6.0;
/// Load-in time of a settled chunk.
pub const LOAD_ANIM_COMPLETE_TIME: f32 = 999.0;

/// Seconds per animation frame.
pub const ANIMATION_TICK: f64 = 1.0 / 24.0;

const TICK_EPSILON: f64 = 1e-9;


/// Observable lifecycle state of a chunk.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChunkState {
    /// Never built.
    Empty,
    /// Built and current.
    Populated,
    /// Built, but rebuilds on its next update.
    Stale,
    Disposed,
}


/// Contiguous run of tiles sharing a tileset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RenderBatch {
    pub tileset: TilesetIndex,
    pub index_pos: u32,
    pub index_count: u32,
}


/// Result of a chunk update.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ChunkUpdate {
    /// The chunk's own lights were recomputed.
    pub point_lights_did_change: bool,
    /// The macrotile was re-rendered.
    pub did_cache_render: bool,
}


/// What a chunk update reads and writes besides the chunk.
pub struct ChunkEnv<'a> {
    pub map: &'a dyn MapSource,
    pub tilesets: &'a mut TilesetMapping,
    pub arena: &'a mut MacrotileArena,
    /// Macrotile re-render budget of the frame.
    pub cache_budget: &'a TimeBudget,
}


pub struct Chunk {
    coord: ChunkCoord,
    transform: Mat4<f32>,

    tile_ids: PerTile<Option<TileTypeId>>,
    tile_types: HashMap<TileTypeId, TileType>,
    /// Tile type of each vertex.
    vertex_tiles: Vec<TileTypeId>,
    batches: Vec<RenderBatch>,
    buffers: Option<TileBuffers>,
    chunk_uniforms: Option<UniformSlot<ChunkBlock>>,
    lighting: Vec<UniformSlot<ChunkLightingBlock>>,

    pub buffers_need_update: bool,
    chunk_buffer_needs_update: bool,
    is_missing_tile_types: bool,
    pub is_first_screen: bool,
    did_render_contents_once: bool,
    disposed: bool,

    /// Lights of this chunk's tiles, in world space.
    point_lights: Vec<PointLight>,
    /// Lights from neighboring chunks and lit entities, in world space.
    external_point_lights: Vec<PointLight>,

    /// Current frame of each animated tile type.
    tile_animations: HashMap<TileTypeId, usize>,
    animation_time: f64,
    last_time: Option<f64>,

    load_anim_time: f32,
    load_anim_origin: Option<Vec2<f32>>,

    macrotile: Option<Macrotile>,
}

impl Chunk {
    pub fn new(coord: ChunkCoord) -> Self {
        let origin = coord.origin().map(|n| n as f32);
        Chunk {
            coord,
            transform: Mat4::translation_3d(Vec3::new(origin.x, origin.y, 0.0)),
            tile_ids: PerTile::default(),
            tile_types: HashMap::new(),
            vertex_tiles: Vec::new(),
            batches: Vec::new(),
            buffers: None,
            chunk_uniforms: None,
            lighting: Vec::new(),
            buffers_need_update: false,
            chunk_buffer_needs_update: false,
            is_missing_tile_types: false,
            is_first_screen: false,
            did_render_contents_once: false,
            disposed: false,
            point_lights: Vec::new(),
            external_point_lights: Vec::new(),
            tile_animations: HashMap::new(),
            animation_time: 0.0,
            last_time: None,
            // data present on the first update doesn't animate in
            load_anim_time: LOAD_ANIM_COMPLETE_TIME,
            load_anim_origin: None,
            macrotile: None,
        }
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Chunk-to-world transform. Only ever a translation.
    pub fn transform(&self) -> Mat4<f32> {
        self.transform
    }

    pub fn state(&self) -> ChunkState {
        if self.disposed {
            ChunkState::Disposed
        } else if self.buffers.is_none() {
            ChunkState::Empty
        } else if self.buffers_need_update {
            ChunkState::Stale
        } else {
            ChunkState::Populated
        }
    }

    /// Tile id cached at the last build, by local tile coordinates.
    pub fn tile_id(&self, x: i32, y: i32) -> Option<TileTypeId> {
        self.tile_ids[lti(x, y)]
    }

    pub fn batches(&self) -> &[RenderBatch] {
        &self.batches
    }

    /// Indices in the chunk's geometry.
    pub fn index_count(&self) -> u32 {
        self.buffers.as_ref().map(TileBuffers::index_count).unwrap_or(0)
    }

    pub fn is_missing_tile_types(&self) -> bool {
        self.is_missing_tile_types
    }

    pub fn point_lights(&self) -> &[PointLight] {
        &self.point_lights
    }

    pub fn external_point_lights(&self) -> &[PointLight] {
        &self.external_point_lights
    }

    pub fn set_external_point_lights(&mut self, lights: Vec<PointLight>) {
        self.external_point_lights = lights;
    }

    /// Number of lighting passes each batch is drawn with.
    pub fn light_pass_count(&self) -> usize {
        self.lighting.len()
    }

    pub fn macrotile(&self) -> Option<&Macrotile> {
        self.macrotile.as_ref()
    }

    pub fn invalidate_macrotile(&mut self) {
        if let Some(macrotile) = self.macrotile.as_mut() {
            macrotile.invalidate();
        }
    }

    /// Current frame index of a tile type's animation.
    pub fn animation_frame(&self, id: TileTypeId) -> usize {
        self.tile_animations.get(&id).copied().unwrap_or(0)
    }

    pub fn load_anim_time(&self) -> f32 {
        self.load_anim_time
    }

    fn load_anim(&self) -> Vec4<f32> {
        let origin = self.load_anim_origin.unwrap_or_else(Vec2::zero);
        Vec4::new(
            origin.x,
            origin.y,
            self.load_anim_time,
            if self.is_first_screen { 1.0 } else { 0.0 },
        )
    }

    fn chunk_block(&self) -> ChunkBlock {
        ChunkBlock {
            transform: self.transform,
            load_anim: self.load_anim(),
        }
    }

    fn delete_buffers(&mut self, gpu: &mut dyn Gpu) {
        if let Some(buffers) = self.buffers.take() {
            buffers.dispose(gpu);
        }
    }

    /// Rebuild geometry from the map source.
    fn build(&mut self, ctx: &mut Context, map: &dyn MapSource, tilesets: &mut TilesetMapping) -> Result<()> {
        let gpu = ctx.gpu.as_mut();
        self.delete_buffers(gpu);

        self.tile_ids.clear();
        self.tile_types.clear();
        self.vertex_tiles.clear();
        self.batches.clear();
        self.point_lights.clear();
        self.is_missing_tile_types = false;

        let mut mesh = MeshData::new();
        let mut obj_pos = Vec::new();
        let mut batch: Option<RenderBatch> = None;
        let mut is_cacheable = true;
        let mut tileset_resolution: f32 = 1.0;
        let origin = self.coord.origin();

        for y in 0..CHUNK_SIZE {
            for x in 0..CHUNK_SIZE {
                let id = map.tile(origin.x + x, origin.y + y);
                self.tile_ids[lti(x, y)] = id;
                let id = match id {
                    Some(id) => id,
                    None => continue,
                };
                let tileset = match tilesets.get_tileset(map, id) {
                    Some(tileset) => tileset,
                    None => {
                        self.is_missing_tile_types = true;
                        continue;
                    }
                };
                let tile_type = match tilesets.tileset(tileset).tile_type(id) {
                    Some(tile_type) => tile_type,
                    None => {
                        warn!(chunk = %self.coord, id, "tileset does not serve mapped tile type");
                        self.is_missing_tile_types = true;
                        continue;
                    }
                };

                if batch.map(|b| b.tileset) != Some(tileset) {
                    if let Some(prev) = batch.take().filter(|b| b.index_count > 0) {
                        self.batches.push(prev);
                    }
                    batch = Some(RenderBatch {
                        tileset,
                        index_pos: mesh.indices.len() as u32,
                        index_count: 0,
                    });
                }

                let cell = Vec3::new(x as f32, y as f32, 0.0);
                let info = build_tile_geometry(
                    &mut mesh,
                    tile_type.geometry(),
                    cell,
                    PROJECTION_ANGLE,
                    TEXTURE_ASPECT,
                );
                if let Some(batch) = batch.as_mut() {
                    batch.index_count += info.index_count as u32;
                }
                for _ in 0..info.vert_count {
                    obj_pos.push(cell);
                    self.vertex_tiles.push(id);
                }

                if let Some(light) = tile_type.point_light() {
                    let pos = self.transform * Vec4::from_point(cell + light.pos);
                    self.point_lights.push(PointLight {
                        pos: pos.xyz(),
                        radiance: light.radiance,
                    });
                }

                if tile_type.is_animated() {
                    is_cacheable = false;
                }

                let pixel_size = tilesets.tileset(tileset).pixel_size();
                tileset_resolution = tileset_resolution
                    .max(pixel_size.w as f32)
                    .max(pixel_size.h as f32);

                self.tile_types.insert(id, tile_type);
            }
        }
        if let Some(last) = batch.filter(|b| b.index_count > 0) {
            self.batches.push(last);
        }
        if self.is_missing_tile_types {
            warn!(chunk = %self.coord, "chunk is missing tile types, waiting for tilesets");
        }

        let tile = self.frame_offsets();
        self.buffers = Some(TileBuffers::new(gpu, &mesh, &tile, &obj_pos)
            .context("creating chunk buffers")?);

        if self.chunk_uniforms.is_none() {
            self.chunk_uniforms = Some(UniformSlot::new(gpu, ctx.params.backend, self.chunk_block())?);
        }

        if ctx.params.macrotiles && is_cacheable {
            self.macrotile.get_or_insert_with(|| Macrotile::new(CHUNK_SIZE as f32, 1.0));
        } else if let Some(mut macrotile) = self.macrotile.take() {
            macrotile.dispose(gpu);
        }
        if let Some(macrotile) = self.macrotile.as_mut() {
            macrotile.invalidate();
            macrotile.tileset_resolution = tileset_resolution;
        }

        self.buffers_need_update = false;
        self.chunk_buffer_needs_update = true;
        self.did_render_contents_once = false;

        self.update_lighting(gpu, ctx.params.backend, ctx.params.point_lights)?;
        trace!(
            chunk = %self.coord,
            batches = self.batches.len(),
            indices = mesh.indices.len(),
            lights = self.point_lights.len(),
            "built chunk",
        );
        Ok(())
    }

    /// Repack local and external lights into lighting passes. Lights beyond
    /// `MAX_TOTAL_POINT_LIGHTS` are dropped.
    pub fn update_lighting(
        &mut self,
        gpu: &mut dyn Gpu,
        backend: RenderBackend,
        point_lights: bool,
    ) -> Result<(), GpuError> {
        let lights: Vec<PointLight> = if point_lights {
            self.point_lights.iter()
                .chain(&self.external_point_lights)
                .take(MAX_TOTAL_POINT_LIGHTS)
                .copied()
                .collect()
        } else {
            Vec::new()
        };

        // at least one pass, or nothing would be drawn
        let pass_count = ((lights.len() + MAX_POINT_LIGHTS - 1) / MAX_POINT_LIGHTS).max(1);
        while self.lighting.len() > pass_count {
            if let Some(mut slot) = self.lighting.pop() {
                slot.dispose(gpu);
            }
        }
        while self.lighting.len() < pass_count {
            self.lighting.push(UniformSlot::new(gpu, backend, ChunkLightingBlock::default())?);
        }
        for (slot, pass_lights) in self.lighting.iter_mut().zip(lights.chunks(MAX_POINT_LIGHTS)) {
            slot.write(gpu, ChunkLightingBlock::new(pass_lights));
        }
        if lights.is_empty() {
            self.lighting[0].write(gpu, ChunkLightingBlock::default());
        }

        self.invalidate_macrotile();
        Ok(())
    }

    fn frame_offsets(&self) -> Vec<Vec2<f32>> {
        self.vertex_tiles.iter()
            .map(|id| {
                let frames = self.tile_types[id].frames();
                frames[self.animation_frame(*id) % frames.len()]
            })
            .collect()
    }

    /// Rewrite the animation frame of every vertex.
    fn update_tiles(&self, gpu: &mut dyn Gpu) {
        if let Some(buffers) = self.buffers.as_ref() {
            buffers.write_tile(gpu, &self.frame_offsets());
        }
    }

    /// Advance every animated tile type by one frame. Returns whether any
    /// were animated.
    fn advance_animation_frame(&mut self) -> bool {
        let mut has_animation = false;
        for (&id, tile_type) in &self.tile_types {
            let frames = tile_type.frames().len();
            if frames <= 1 {
                continue;
            }
            has_animation = true;
            let frame = self.tile_animations.entry(id).or_insert(0);
            *frame = (*frame + 1) % frames;
        }
        has_animation
    }

    /// Per-frame update: rebuild if needed, advance animations and the
    /// load-in timer, and re-render the macrotile if it's due.
    pub fn update(
        &mut self,
        ctx: &mut Context,
        env: &mut ChunkEnv,
        frame: &FrameContext,
    ) -> Result<ChunkUpdate> {
        let mut result = ChunkUpdate::default();

        if self.buffers.is_none() || self.buffers_need_update {
            self.build(ctx, env.map, env.tilesets)
                .with_context(|| format!("building chunk {}", self.coord))?;
            result.point_lights_did_change = true;
        }

        let delta = self.last_time.map(|t| frame.time - t).unwrap_or(0.0);
        self.last_time = Some(frame.time);

        if self.batches.is_empty() && !self.buffers_need_update {
            // no data yet, animate in once it arrives
            self.load_anim_time = 0.0;
            self.load_anim_origin = None;
            return Ok(result);
        }

        if self.load_anim_origin.is_none() {
            let chunk_origin = self.coord.origin().map(|n| n as f32);
            self.load_anim_origin = Some(frame.look_at_ground().unwrap_or(chunk_origin));
        }
        if delta > 0.0 {
            self.load_anim_time += delta as f32;
            if self.load_anim_time < LOAD_ANIM_UPDATE_TIME {
                self.chunk_buffer_needs_update = true;
            } else {
                self.load_anim_time = LOAD_ANIM_COMPLETE_TIME;
            }
        }

        if self.chunk_buffer_needs_update {
            let block = self.chunk_block();
            if let Some(slot) = self.chunk_uniforms.as_mut() {
                slot.write(ctx.gpu.as_mut(), block);
            }
            self.chunk_buffer_needs_update = false;
        }

        self.animation_time = (self.animation_time + delta).clamp(0.0, 1.0);
        let mut has_animation = false;
        while self.animation_time + TICK_EPSILON >= ANIMATION_TICK {
            self.animation_time = (self.animation_time - ANIMATION_TICK).max(0.0);
            if self.advance_animation_frame() {
                has_animation = true;
            }
        }
        if has_animation {
            self.update_tiles(ctx.gpu.as_mut());
            return Ok(result);
        }

        let cache_due = self.load_anim_time >= LOAD_ANIM_UPDATE_TIME
            && self.did_render_contents_once
            && self.macrotile.as_ref().map(|m| !m.is_valid()).unwrap_or(false);
        if cache_due && !env.cache_budget.is_exhausted() {
            self.cache_render(ctx, env)?;
            result.did_cache_render = true;
        }

        Ok(result)
    }

    fn cache_render(&mut self, ctx: &mut Context, env: &mut ChunkEnv) -> Result<()> {
        let mut macrotile = match self.macrotile.take() {
            Some(macrotile) => macrotile,
            None => return Ok(()),
        };
        let begun = macrotile.begin_cache_render(ctx, env.arena);
        if begun.is_ok() {
            let mut state = RenderState {
                tileset: None,
                blend: Some(BlendMode::Normal),
            };
            self.render_contents(ctx, env.tilesets, &mut state, false);
            macrotile.finish_cache_render(ctx, env.arena);
            trace!(chunk = %self.coord, "rendered macrotile");
        }
        self.macrotile = Some(macrotile);
        begun.with_context(|| format!("rendering macrotile of chunk {}", self.coord))
    }

    /// Draw the chunk with the tile program in use. Returns whether anything
    /// was drawn.
    pub fn render(&mut self, ctx: &mut Context, tilesets: &mut TilesetMapping, state: &mut RenderState) -> bool {
        if self.buffers.is_none() || self.batches.is_empty() {
            return false;
        }
        if self.macrotile.as_ref().map(Macrotile::is_valid).unwrap_or(false) {
            self.render_cached(ctx, state);
        } else {
            self.render_contents(ctx, tilesets, state, true);
        }
        true
    }

    fn render_cached(&mut self, ctx: &mut Context, state: &mut RenderState) {
        let gpu = ctx.gpu.as_mut();
        gpu.use_program(ctx.programs.macrotile);
        if let Some(slot) = self.chunk_uniforms.as_ref() {
            slot.bind(gpu);
        }
        if let Some(macrotile) = self.macrotile.as_ref() {
            macrotile.render(gpu);
        }
        state.reset_textures();
        gpu.use_program(ctx.programs.tile_chunk);
    }

    /// Draw every batch once per lighting pass. `live` binds the chunk's own
    /// transform and load-in state; cache renders have bound fixed ones.
    fn render_contents(
        &mut self,
        ctx: &mut Context,
        tilesets: &mut TilesetMapping,
        state: &mut RenderState,
        live: bool,
    ) {
        let gpu = ctx.gpu.as_mut();
        let buffers = match self.buffers.as_ref() {
            Some(buffers) => buffers,
            None => return,
        };
        if live {
            if let Some(slot) = self.chunk_uniforms.as_ref() {
                slot.bind(gpu);
            }
        }

        let passes = self.lighting.len();
        for batch in &self.batches {
            if let Err(e) = state.bind_tileset(gpu, tilesets, batch.tileset) {
                warn!(chunk = %self.coord, error = %format!("{:#}", e), "skipping batch");
                continue;
            }
            for (i, slot) in self.lighting.iter().enumerate() {
                let is_first = i == 0;
                let is_last = i == passes - 1;

                gpu.set_uniform("u_light_pass_index", UniformValue::Int(i as i32));
                slot.bind(gpu);
                buffers.draw(gpu, batch.index_pos, batch.index_count);

                if is_first && !is_last {
                    state.set_blend(gpu, BlendMode::LightPass);
                } else if is_last && !is_first {
                    state.set_blend(gpu, BlendMode::Normal);
                }
            }
        }

        self.did_render_contents_once = true;
    }

    /// Release all GPU resources. Idempotent.
    pub fn dispose(&mut self, gpu: &mut dyn Gpu) {
        self.delete_buffers(gpu);
        if let Some(mut slot) = self.chunk_uniforms.take() {
            slot.dispose(gpu);
        }
        for mut slot in self.lighting.drain(..) {
            slot.dispose(gpu);
        }
        if let Some(mut macrotile) = self.macrotile.take() {
            macrotile.dispose(gpu);
        }
        self.disposed = true;
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("coord", &self.coord)
            .field("state", &self.state())
            .field("batches", &self.batches.len())
            .field("lights", &self.point_lights.len())
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        camera::Camera,
        settings::GraphicsSettings,
    };
    use std::{
        sync::Arc,
        time::{
            Duration,
            Instant,
        },
    };
    use graphics::{
        HeadlessSurface,
        HeadlessConfig,
        CommandLog,
        GpuCommand,
    };
    use tile_data::{
        GeometryKind,
        MemoryMap,
        MemoryTileset,
    };
    use mesh_data::{
        FLAT_INDICES,
        FLAT_VERTS,
        CUBE_INDICES,
        CUBE_VERTS,
    };

    const FLAT: TileTypeId = 1;
    const CUBE: TileTypeId = 2;
    const ANIMATED: TileTypeId = 3;
    const LAMP: TileTypeId = 4;
    const OTHER_SET: TileTypeId = 10;

    struct Harness {
        ctx: Context,
        log: CommandLog,
        map: MemoryMap,
        tilesets: TilesetMapping,
        arena: MacrotileArena,
        camera: Camera,
    }

    fn tile_types() -> MemoryTileset {
        MemoryTileset::new(Extent2::new(16, 16), Extent2::new(8, 8))
            .with_tile_type(FLAT, TileType::still(Vec2::new(0.0, 0.0), GeometryKind::Flat))
            .with_tile_type(CUBE, TileType::still(Vec2::new(1.0, 0.0), GeometryKind::CubeFront))
            .with_tile_type(ANIMATED, TileType::new(
                (0..4).map(|i| Vec2::new(i as f32, 1.0)).collect(),
                GeometryKind::Flat,
                None,
            ).unwrap())
            .with_tile_type(LAMP, TileType::new(
                vec![Vec2::new(0.0, 2.0)],
                GeometryKind::CubeBack,
                Some(PointLight::new([0.5, 0.5, 0.5], [2.0, 1.5, 1.0])),
            ).unwrap())
    }

    impl Harness {
        fn new(settings: GraphicsSettings) -> Self {
            let mut surface = HeadlessSurface::new(Extent2::new(64, 64), HeadlessConfig::extended());
            let log = surface.log();
            let mut ctx = Context::new(&mut surface, &settings).unwrap();
            let arena = MacrotileArena::new(ctx.gpu.as_mut(), &ctx.params).unwrap();
            let map = MemoryMap::new();
            map.add_tileset(Arc::new(tile_types()));
            map.add_tileset(Arc::new(MemoryTileset::new(Extent2::new(16, 16), Extent2::new(8, 8))
                .with_tile_type(OTHER_SET, TileType::still(Vec2::zero(), GeometryKind::Flat))));
            let mut camera = Camera::default();
            camera.position = Vec3::new(4.0, 4.0, 10.0);
            Harness {
                ctx,
                log,
                map,
                tilesets: TilesetMapping::new(true, true),
                arena,
                camera,
            }
        }

        fn update(&mut self, chunk: &mut Chunk, time: f64) -> ChunkUpdate {
            let budget = TimeBudget::start(Duration::from_secs(60));
            let frame = FrameContext::new(&self.camera, Extent2::new(64.0, 64.0), 1.0, time, Instant::now());
            let mut env = ChunkEnv {
                map: &self.map,
                tilesets: &mut self.tilesets,
                arena: &mut self.arena,
                cache_budget: &budget,
            };
            chunk.update(&mut self.ctx, &mut env, &frame).unwrap()
        }

        fn render(&mut self, chunk: &mut Chunk) -> bool {
            let mut state = RenderState::new();
            chunk.render(&mut self.ctx, &mut self.tilesets, &mut state)
        }
    }

    #[test]
    fn test_index_counts_match_tiles() {
        let mut h = Harness::new(GraphicsSettings::default());
        // row 0: flats, row 1: cubes, row 2: one unknown id, rest empty
        h.map.fill(0, 0, 8, 1, |_, _| Some(FLAT));
        h.map.fill(0, 1, 8, 1, |_, _| Some(CUBE));
        h.map.set_tile(3, 2, Some(999));

        let mut chunk = Chunk::new(ChunkCoord::new(0, 0));
        assert_eq!(chunk.state(), ChunkState::Empty);
        h.update(&mut chunk, 0.0);
        assert_eq!(chunk.state(), ChunkState::Populated);

        assert_eq!(chunk.index_count() as usize, 8 * FLAT_INDICES + 8 * CUBE_INDICES);
        assert_eq!(chunk.vertex_tiles.len(), 8 * FLAT_VERTS + 8 * CUBE_VERTS);
        assert!(chunk.is_missing_tile_types());
        assert_eq!(chunk.tile_id(3, 2), Some(999));
        assert_eq!(chunk.tile_id(0, 5), None);

        let batch_total: u32 = chunk.batches().iter().map(|b| b.index_count).sum();
        assert_eq!(batch_total, chunk.index_count());
    }

    #[test]
    fn test_batches_split_on_tileset_change() {
        let mut h = Harness::new(GraphicsSettings::default());
        // FLAT FLAT OTHER FLAT in scan order
        h.map.set_tile(0, 0, Some(FLAT));
        h.map.set_tile(1, 0, Some(FLAT));
        h.map.set_tile(2, 0, Some(OTHER_SET));
        h.map.set_tile(3, 0, Some(FLAT));

        let mut chunk = Chunk::new(ChunkCoord::new(0, 0));
        h.update(&mut chunk, 0.0);
        let counts: Vec<u32> = chunk.batches().iter().map(|b| b.index_count).collect();
        let n = FLAT_INDICES as u32;
        assert_eq!(counts, vec![2 * n, n, n]);
        assert_eq!(chunk.batches()[0].tileset, chunk.batches()[2].tileset);
        assert_eq!(chunk.batches()[1].index_pos, 2 * n);
    }

    #[test]
    fn test_local_light_round_trip() {
        let mut h = Harness::new(GraphicsSettings::default());
        // in scan order
        let cells = [(0, 0), (7, 2), (3, 5)];
        for &(x, y) in &cells {
            h.map.set_tile(16 + x, -8 + y, Some(LAMP));
        }
        let coord = ChunkCoord::new(2, -1);
        let mut chunk = Chunk::new(coord);
        h.update(&mut chunk, 0.0);

        let origin = Vec3::new(16.0, -8.0, 0.0);
        assert_eq!(chunk.point_lights().len(), 3);
        for (light, &(x, y)) in chunk.point_lights().iter().zip(&cells) {
            let local = Vec3::new(x as f32 + 0.5, y as f32 + 0.5, 0.5);
            assert!((light.pos - (origin + local)).magnitude() < 1e-5, "{:?}", light.pos);
            assert_eq!(light.radiance, Rgb::new(2.0, 1.5, 1.0));
        }
    }

    #[test]
    fn test_update_is_idempotent_within_frame() {
        let mut h = Harness::new(GraphicsSettings::default());
        h.map.fill(0, 0, 8, 8, |x, _| Some(if x == 0 { ANIMATED } else { FLAT }));
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0));
        h.update(&mut chunk, 0.0);
        h.update(&mut chunk, 0.5);
        let frame = chunk.animation_frame(ANIMATED);

        h.log.clear();
        h.update(&mut chunk, 0.5);
        h.update(&mut chunk, 0.5);
        assert_eq!(h.log.count(|c| matches!(c, GpuCommand::WriteBuffer { .. })), 0);
        assert_eq!(chunk.animation_frame(ANIMATED), frame);
    }

    #[test]
    fn test_animation_follows_tick() {
        let mut h = Harness::new(GraphicsSettings::default());
        h.map.set_tile(2, 2, Some(ANIMATED));
        h.map.set_tile(4, 4, Some(ANIMATED));
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0));
        h.update(&mut chunk, 0.0);
        assert!(chunk.macrotile().is_none());

        // steps that don't line up with the tick
        let dt = 1.0 / 60.0;
        for step in 1..=150 {
            let elapsed = step as f64 * dt;
            h.update(&mut chunk, elapsed);
            let expected = ((elapsed * 24.0 + 1e-6).floor() as usize) % 4;
            assert_eq!(chunk.animation_frame(ANIMATED), expected, "at {}s", elapsed);
        }
    }

    #[test]
    fn test_macrotile_valid_only_after_live_render() {
        let mut h = Harness::new(GraphicsSettings::default());
        h.map.fill(0, 0, 8, 8, |_, _| Some(FLAT));
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0));

        let first = h.update(&mut chunk, 0.0);
        assert!(!first.did_cache_render);
        assert!(!chunk.macrotile().unwrap().is_valid());

        // not rendered live yet
        assert!(!h.update(&mut chunk, 0.1).did_cache_render);
        assert!(!chunk.macrotile().unwrap().is_valid());

        assert!(h.render(&mut chunk));
        assert!(h.update(&mut chunk, 0.2).did_cache_render);
        assert!(chunk.macrotile().unwrap().is_valid());

        // cached render draws the impostor only
        h.log.clear();
        h.render(&mut chunk);
        assert_eq!(h.log.draws(), vec![Some("macrotile".to_owned())]);

        // a tile change invalidates until the next cache render
        h.map.set_tile(0, 0, Some(CUBE));
        chunk.buffers_need_update = true;
        h.update(&mut chunk, 0.3);
        assert!(!chunk.macrotile().unwrap().is_valid());
        h.update(&mut chunk, 0.4);
        assert!(!chunk.macrotile().unwrap().is_valid());
    }

    #[test]
    fn test_chunk_without_data_animates_in() {
        let mut h = Harness::new(GraphicsSettings::default());
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0));
        h.update(&mut chunk, 0.0);
        assert_eq!(chunk.load_anim_time(), 0.0);
        assert!(!h.render(&mut chunk));

        h.map.fill(0, 0, 8, 8, |_, _| Some(FLAT));
        chunk.buffers_need_update = true;
        h.update(&mut chunk, 1.0);
        assert_eq!(chunk.load_anim_time(), 1.0);
        h.update(&mut chunk, 2.0);
        assert_eq!(chunk.load_anim_time(), 2.0);
        h.update(&mut chunk, 8.0);
        assert_eq!(chunk.load_anim_time(), LOAD_ANIM_COMPLETE_TIME);
    }

    #[test]
    fn test_light_passes_blend_additively() {
        let mut h = Harness::new(GraphicsSettings::default());
        h.map.fill(0, 0, 8, 8, |_, _| Some(FLAT));
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0));
        h.update(&mut chunk, 0.0);

        let external = (0..10)
            .map(|i| PointLight::new([i as f32, 0.0, 1.0], [1.0, 1.0, 1.0]))
            .collect();
        chunk.set_external_point_lights(external);
        chunk.update_lighting(h.ctx.gpu(), RenderBackend::UniformBlocks, true).unwrap();
        assert_eq!(chunk.light_pass_count(), 3);

        h.log.clear();
        h.render(&mut chunk);
        assert_eq!(h.log.draws().len(), 3);
        let blends: Vec<BlendMode> = h.log.commands().into_iter()
            .filter_map(|c| match c {
                GpuCommand::SetBlendMode(mode) => Some(mode),
                _ => None,
            })
            .collect();
        assert_eq!(blends, vec![BlendMode::LightPass, BlendMode::Normal]);
    }

    #[test]
    fn test_lights_capped() {
        let mut h = Harness::new(GraphicsSettings::default());
        h.map.fill(0, 0, 8, 8, |_, _| Some(LAMP));
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0));
        h.update(&mut chunk, 0.0);
        assert_eq!(chunk.point_lights().len(), 64);
        assert_eq!(chunk.light_pass_count(), MAX_TOTAL_POINT_LIGHTS / MAX_POINT_LIGHTS);
    }

    #[test]
    fn test_dispose_idempotent() {
        let mut h = Harness::new(GraphicsSettings::default());
        h.map.fill(0, 0, 8, 8, |_, _| Some(FLAT));
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0));
        let buffers_before = h.log.live_buffers();
        h.update(&mut chunk, 0.0);
        assert!(h.log.live_buffers() > buffers_before);

        chunk.dispose(h.ctx.gpu());
        chunk.dispose(h.ctx.gpu());
        assert_eq!(chunk.state(), ChunkState::Disposed);
        assert_eq!(h.log.live_buffers(), buffers_before);
    }
}
