//! The set of live chunks, and everything decided across chunks: which ones
//! exist, which ones are drawn, and which lights reach which.

use crate::{
    chunk::{
        Chunk,
        ChunkEnv,
    },
    context::Context,
    frame::{
        FrameContext,
        TimeBudget,
    },
    lighting::{
        CHUNK_LIGHTING_SAMPLE_RADIUS,
        MAX_TOTAL_POINT_LIGHTS,
        GlobalLighting,
        LitEntity,
        LitEntityId,
        affects_chunk,
    },
    macrotile::MacrotileArena,
    render_state::RenderState,
    settings::StreamingConfig,
    tileset::TilesetMapping,
    uniforms::{
        UniformSlot,
        CameraBlock,
        GlobalLightingBlock,
    },
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::Instant,
};
use anyhow::*;
use anyhow::Context as _;
use std::result::Result::Ok;
use graphics::{
    Gpu,
    BlendMode,
};
use slab::Slab;
use tile_data::{
    CHUNK_SIZE,
    ChunkCoord,
    MapEvent,
    MapSource,
    MapSubscription,
    PointLight,
    TilesetReplaced,
};
use vek::*;


/// Height above the ground that view radius sampling accounts for.
const VIEW_SAMPLE_HEIGHT: f32 = 5.0;

const W_EPSILON: f32 = 1e-6;


/// Chunks around the camera.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct View {
    pub center: Option<ChunkCoord>,
    /// In chunks.
    pub radius: i32,
    /// Chunks kept alive and updated.
    pub view_chunks: Vec<ChunkCoord>,
    /// Subset of `view_chunks` that intersects the screen.
    pub render_chunks: Vec<ChunkCoord>,
}

impl View {
    /// Compute which chunks are near and which are on screen, from where
    /// the screen's corners hit the ground.
    pub fn compute(frame: &FrameContext, max_radius: i32) -> Self {
        let ground = |clip: Vec2<f32>, z: f32| {
            frame.camera
                .ground_point(frame.viewport, clip, z)
                .map(|p| p.xy())
        };
        let center_point = match ground(Vec2::zero(), 0.0) {
            Some(p) => p,
            None => return View::default(),
        };

        let samples = [
            (Vec2::new(-1.0, -1.0), 0.0),
            (Vec2::new(1.0, -1.0), 0.0),
            (Vec2::new(-1.0, 1.0), 0.0),
            (Vec2::new(1.0, 1.0), 0.0),
            (Vec2::new(-1.0, -1.0), VIEW_SAMPLE_HEIGHT),
        ];
        let view_radius = samples.iter()
            .filter_map(|&(clip, z)| ground(clip, z))
            .map(|p| p.distance(center_point))
            .fold(0.0, f32::max);

        let center = ChunkCoord::containing_point(center_point);
        let radius = ((view_radius / CHUNK_SIZE as f32).ceil() as i32).min(max_radius);
        let view_proj = frame.proj * frame.view;

        let mut view_chunks = Vec::new();
        let mut render_chunks = Vec::new();
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if (dx as f32).hypot(dy as f32) > (radius + 1) as f32 {
                    continue;
                }
                let coord = center.offset(dx, dy);
                if is_on_screen(view_proj, coord) {
                    render_chunks.push(coord);
                }
                view_chunks.push(coord);
            }
        }

        View {
            center: Some(center),
            radius,
            view_chunks,
            render_chunks,
        }
    }
}

/// Whether a chunk's projected bounds overlap normalized device coordinates.
fn is_on_screen(view_proj: Mat4<f32>, coord: ChunkCoord) -> bool {
    let (min, max) = coord.bounds();
    let corners = [
        Vec3::new(min.x, min.y, 0.0),
        Vec3::new(max.x, min.y, 0.0),
        Vec3::new(min.x, max.y, 0.0),
        Vec3::new(max.x, max.y, 0.0),
        Vec3::new(max.x, max.y, 1.0),
    ];

    let mut least = Vec2::broadcast(f32::INFINITY);
    let mut most = Vec2::broadcast(f32::NEG_INFINITY);
    for corner in corners {
        let p = view_proj * Vec4::from_point(corner);
        // behind the camera
        if p.w <= W_EPSILON {
            continue;
        }
        let ndc = p.xy() / p.w;
        least = Vec2::partial_min(least, ndc);
        most = Vec2::partial_max(most, ndc);
    }
    least.x < 1.0 && least.y < 1.0 && most.x > -1.0 && most.y > -1.0
}


#[derive(Debug)]
struct ChunkEntry {
    chunk: Chunk,
    last_update: Instant,
    lighting_needs_update: bool,
}


pub struct TileMap {
    map: Arc<dyn MapSource>,
    subscription: Option<MapSubscription>,
    tilesets: TilesetMapping,
    arena: MacrotileArena,
    chunks: HashMap<ChunkCoord, ChunkEntry>,

    camera_uniforms: UniformSlot<CameraBlock>,
    lighting_uniforms: UniformSlot<GlobalLightingBlock>,
    lighting: GlobalLighting,
    lighting_did_change: bool,

    lit_entities: Slab<LitEntity>,

    streaming: StreamingConfig,
    current_view: Option<View>,
    last_gc: Option<Instant>,
}

impl TileMap {
    pub fn new(
        ctx: &mut Context,
        map: Arc<dyn MapSource>,
        lighting: GlobalLighting,
        streaming: StreamingConfig,
    ) -> Result<Self> {
        let gpu = ctx.gpu.as_mut();
        let use_texture_arrays = gpu.capabilities().texture_arrays();
        let backend = ctx.params.backend;

        let camera_uniforms = UniformSlot::new(gpu, backend, CameraBlock {
            proj: Mat4::identity(),
            view: Mat4::identity(),
            pos: Vec3::zero(),
        })?;
        let lighting_uniforms = UniformSlot::new(gpu, backend, lighting.to_block())?;
        let arena = MacrotileArena::new(gpu, &ctx.params)
            .context("creating macrotile arena")?;
        let subscription = map.subscribe();

        Ok(TileMap {
            map,
            subscription: Some(subscription),
            tilesets: TilesetMapping::new(use_texture_arrays, ctx.params.linear_normals),
            arena,
            chunks: HashMap::new(),
            camera_uniforms,
            lighting_uniforms,
            lighting,
            lighting_did_change: false,
            lit_entities: Slab::new(),
            streaming,
            current_view: None,
            last_gc: None,
        })
    }

    pub fn map(&self) -> &Arc<dyn MapSource> {
        &self.map
    }

    pub fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.chunks.get(&coord).map(|entry| &entry.chunk)
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// View computed by the last update.
    pub fn view(&self) -> Option<&View> {
        self.current_view.as_ref()
    }

    pub fn lighting(&self) -> &GlobalLighting {
        &self.lighting
    }

    /// Replace global lighting. A change invalidates every macrotile.
    pub fn set_lighting(&mut self, lighting: GlobalLighting) {
        if lighting != self.lighting {
            self.lighting = lighting;
            self.lighting_did_change = true;
        }
    }

    /// Apply notifications received from the map source.
    pub(crate) fn process_events(&mut self) {
        let events: Vec<MapEvent> = match self.subscription.as_ref() {
            Some(sub) => sub.try_iter().collect(),
            None => return,
        };
        for event in events {
            match event {
                MapEvent::RegionUpdated { x, y, w, h } => self.signal_tile_updates(x, y, w, h),
                MapEvent::TilesetsUpdated(updates) => self.on_tilesets_updated(updates),
            }
        }
    }

    fn on_tilesets_updated(&mut self, updates: Option<Vec<TilesetReplaced>>) {
        match updates {
            Some(updates) => {
                // no way to tell which chunks use what changed
                for entry in self.chunks.values_mut() {
                    entry.chunk.buffers_need_update = true;
                }
                for replaced in &updates {
                    self.tilesets.update_tileset(replaced);
                }
                debug!(count = updates.len(), "tilesets changed, rebuilding all chunks");
            }
            None => {
                for entry in self.chunks.values_mut() {
                    if entry.chunk.is_missing_tile_types() {
                        entry.chunk.buffers_need_update = true;
                    }
                }
            }
        }
    }

    /// Mark chunks overlapping a region of tiles for rebuild.
    pub fn signal_tile_updates(&mut self, x: i32, y: i32, w: i32, h: i32) {
        if w <= 0 || h <= 0 {
            return;
        }
        let min = ChunkCoord::containing_tile(x, y);
        let max = ChunkCoord::containing_tile(x + w - 1, y + h - 1);
        for cy in min.y..=max.y {
            for cx in min.x..=max.x {
                if let Some(entry) = self.chunks.get_mut(&ChunkCoord::new(cx, cy)) {
                    entry.chunk.buffers_need_update = true;
                }
            }
        }
    }

    /// Mark the lighting of every chunk a chunk's lights may reach as stale.
    fn chunk_did_update_lights(&mut self, coord: ChunkCoord) {
        let r = CHUNK_LIGHTING_SAMPLE_RADIUS;
        for dy in -r..=r {
            for dx in -r..=r {
                if let Some(entry) = self.chunks.get_mut(&coord.offset(dx, dy)) {
                    entry.lighting_needs_update = true;
                }
            }
        }
    }

    pub fn add_lit_entity(&mut self, entity: LitEntity) -> LitEntityId {
        let coord = entity.chunk();
        let id = LitEntityId(self.lit_entities.insert(entity));
        self.chunk_did_update_lights(coord);
        id
    }

    /// Move a lit entity. Returns false if there is no such entity.
    pub fn move_lit_entity(&mut self, id: LitEntityId, position: Vec3<f32>, point_lights: Vec<PointLight>) -> bool {
        let entity = match self.lit_entities.get_mut(id.0) {
            Some(entity) => entity,
            None => return false,
        };
        let old = entity.chunk();
        entity.position = position;
        entity.point_lights = point_lights;
        let new = entity.chunk();
        self.chunk_did_update_lights(old);
        if new != old {
            self.chunk_did_update_lights(new);
        }
        true
    }

    pub fn remove_lit_entity(&mut self, id: LitEntityId) -> Option<LitEntity> {
        let entity = self.lit_entities.try_remove(id.0)?;
        self.chunk_did_update_lights(entity.chunk());
        Some(entity)
    }

    /// Move all lit entities out, keeping their ids.
    pub(crate) fn take_lit_entities(&mut self) -> Slab<LitEntity> {
        std::mem::take(&mut self.lit_entities)
    }

    pub(crate) fn restore_lit_entities(&mut self, entities: Slab<LitEntity>) {
        self.lit_entities = entities;
        let coords: Vec<ChunkCoord> = self.lit_entities.iter()
            .map(|(_, entity)| entity.chunk())
            .collect();
        for coord in coords {
            self.chunk_did_update_lights(coord);
        }
    }

    /// Lights shining on a lit entity: those of its chunk, its neighbors, and
    /// other lit entities.
    pub fn entity_lights(&self, id: LitEntityId) -> Vec<PointLight> {
        match self.lit_entities.get(id.0) {
            Some(entity) => self.collect_external_lights(entity.chunk(), Some(id)),
            None => Vec::new(),
        }
    }

    /// Lights from elsewhere that reach a chunk. For a chunk, its own lights
    /// are left out. For an entity, the entity's own lights are left out and
    /// its chunk's lights are included.
    fn collect_external_lights(&self, coord: ChunkCoord, for_entity: Option<LitEntityId>) -> Vec<PointLight> {
        let mut lights = Vec::new();

        'entities: for (key, entity) in &self.lit_entities {
            if for_entity == Some(LitEntityId(key)) {
                continue;
            }
            for light in &entity.point_lights {
                if lights.len() >= MAX_TOTAL_POINT_LIGHTS {
                    break 'entities;
                }
                if affects_chunk(light, coord) {
                    lights.push(*light);
                }
            }
        }

        let r = CHUNK_LIGHTING_SAMPLE_RADIUS;
        'chunks: for dy in -r..=r {
            for dx in -r..=r {
                if for_entity.is_none() && dx == 0 && dy == 0 {
                    continue;
                }
                let entry = match self.chunks.get(&coord.offset(dx, dy)) {
                    Some(entry) => entry,
                    None => continue,
                };
                for light in entry.chunk.point_lights() {
                    if lights.len() >= MAX_TOTAL_POINT_LIGHTS {
                        break 'chunks;
                    }
                    if affects_chunk(light, coord) {
                        lights.push(*light);
                    }
                }
            }
        }

        lights
    }

    /// Per-frame update: apply map events, stream chunks in around the
    /// camera, update them, and propagate light changes.
    pub fn update(&mut self, ctx: &mut Context, frame: &FrameContext) -> Result<()> {
        self.process_events();

        let view = View::compute(frame, self.streaming.max_view_radius);

        let gpu = ctx.gpu.as_mut();
        self.camera_uniforms.write(gpu, CameraBlock {
            proj: frame.proj,
            view: frame.view,
            pos: frame.camera.position,
        });
        if self.lighting_did_change {
            self.lighting_uniforms.write(gpu, self.lighting.to_block());
            for entry in self.chunks.values_mut() {
                entry.chunk.invalidate_macrotile();
            }
            self.lighting_did_change = false;
        }

        // for cache renders
        gpu.use_program(ctx.programs.tile_chunk);
        self.lighting_uniforms.bind(gpu);

        let creation_budget = TimeBudget::start(self.streaming.chunk_creation_budget());
        let cache_budget = TimeBudget::start(self.streaming.macrotile_budget());
        let mut did_create = false;
        let mut lights_changed = Vec::new();

        for &coord in &view.view_chunks {
            if !self.chunks.contains_key(&coord) {
                if did_create && creation_budget.is_exhausted() {
                    continue;
                }
                trace!(chunk = %coord, "creating chunk");
                self.chunks.insert(coord, ChunkEntry {
                    chunk: Chunk::new(coord),
                    last_update: frame.now,
                    // neighbors may already shine on it
                    lighting_needs_update: true,
                });
                did_create = true;
            }

            let entry = match self.chunks.get_mut(&coord) {
                Some(entry) => entry,
                None => continue,
            };
            entry.last_update = frame.now;
            let mut env = ChunkEnv {
                map: self.map.as_ref(),
                tilesets: &mut self.tilesets,
                arena: &mut self.arena,
                cache_budget: &cache_budget,
            };
            match entry.chunk.update(ctx, &mut env, frame) {
                Ok(update) => {
                    if update.point_lights_did_change {
                        lights_changed.push(coord);
                    }
                }
                Err(e) => warn!(chunk = %coord, error = %format!("{:#}", e), "chunk update failed"),
            }
        }
        for coord in lights_changed {
            self.chunk_did_update_lights(coord);
        }

        // all updates land before lighting is recomputed
        let point_lights = ctx.params.point_lights;
        let backend = ctx.params.backend;
        for &coord in &view.view_chunks {
            let needs_update = self.chunks.get(&coord)
                .map(|entry| entry.lighting_needs_update)
                .unwrap_or(false);
            if !needs_update {
                continue;
            }
            let lights = self.collect_external_lights(coord, None);
            if let Some(entry) = self.chunks.get_mut(&coord) {
                entry.chunk.set_external_point_lights(lights);
                match entry.chunk.update_lighting(ctx.gpu.as_mut(), backend, point_lights) {
                    // retried next frame
                    Err(e) => warn!(chunk = %coord, error = %e, "chunk lighting update failed"),
                    Ok(()) => entry.lighting_needs_update = false,
                }
            }
        }

        self.current_view = Some(view);
        Ok(())
    }

    /// Draw the chunks on screen into the bound target. Returns whether
    /// anything was drawn.
    pub fn render(&mut self, ctx: &mut Context, frame: &FrameContext) -> bool {
        let view = match self.current_view.as_ref() {
            Some(view) => view,
            None => return false,
        };

        let gpu = ctx.gpu.as_mut();
        gpu.use_program(ctx.programs.macrotile);
        self.camera_uniforms.bind(gpu);
        gpu.use_program(ctx.programs.tile_chunk);
        self.camera_uniforms.bind(gpu);
        self.lighting_uniforms.bind(gpu);

        let mut state = RenderState::new();
        state.set_blend(gpu, BlendMode::Normal);

        let mut screen_is_empty = true;
        for coord in &view.render_chunks {
            if let Some(entry) = self.chunks.get_mut(coord) {
                if entry.chunk.render(ctx, &mut self.tilesets, &mut state) {
                    screen_is_empty = false;
                }
            }
        }
        if screen_is_empty {
            for coord in &view.render_chunks {
                if let Some(entry) = self.chunks.get_mut(coord) {
                    entry.chunk.is_first_screen = true;
                }
            }
        }

        self.collect_garbage(ctx.gpu.as_mut(), frame.now);
        !screen_is_empty
    }

    /// Every GC interval, dispose chunks not updated within it.
    fn collect_garbage(&mut self, gpu: &mut dyn Gpu, now: Instant) {
        let interval = self.streaming.gc_interval();
        let last_gc = *self.last_gc.get_or_insert(now);
        if now.saturating_duration_since(last_gc) < interval {
            return;
        }
        self.last_gc = Some(now);

        let before = self.chunks.len();
        self.chunks.retain(|coord, entry| {
            let keep = now.saturating_duration_since(entry.last_update) < interval;
            if !keep {
                trace!(chunk = %coord, "disposing idle chunk");
                entry.chunk.dispose(gpu);
            }
            keep
        });
        let removed = before - self.chunks.len();
        if removed > 0 {
            debug!(removed, remaining = self.chunks.len(), "collected idle chunks");
        }
    }

    /// Release all GPU resources and stop listening to the map source.
    pub fn dispose(&mut self, gpu: &mut dyn Gpu) {
        for entry in self.chunks.values_mut() {
            entry.chunk.dispose(gpu);
        }
        self.chunks.clear();
        self.tilesets.dispose(gpu);
        self.arena.dispose(gpu);
        self.camera_uniforms.dispose(gpu);
        self.lighting_uniforms.dispose(gpu);
        if let Some(sub) = self.subscription.take() {
            self.map.unsubscribe(sub.id());
        }
    }
}

impl std::fmt::Debug for TileMap {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TileMap")
            .field("chunks", &self.chunks.len())
            .field("tilesets", &self.tilesets.num_tilesets())
            .field("lit_entities", &self.lit_entities.len())
            .field("view", &self.current_view)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        camera::Camera,
        chunk::ChunkState,
        settings::GraphicsSettings,
        uniforms::MAX_POINT_LIGHTS,
    };
    use std::time::Duration;
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
        TileType,
        TileTypeId,
    };

    const GROUND: TileTypeId = 1;
    const LAMP: TileTypeId = 2;
    const LATE: TileTypeId = 3;

    fn tileset() -> MemoryTileset {
        MemoryTileset::new(Extent2::new(16, 16), Extent2::new(4, 4))
            .with_tile_type(GROUND, TileType::still(Vec2::zero(), GeometryKind::Flat))
            .with_tile_type(LAMP, TileType::new(
                vec![Vec2::new(1.0, 0.0)],
                GeometryKind::CubeFront,
                // reaches 10 tiles
                Some(PointLight::new([0.5, 0.5, 1.0], [40.0, 40.0, 40.0])),
            ).unwrap())
    }

    struct Harness {
        ctx: Context,
        log: CommandLog,
        map: Arc<MemoryMap>,
        tile_map: TileMap,
        camera: Camera,
        viewport: Extent2<f32>,
        start: Instant,
    }

    impl Harness {
        fn new(streaming: StreamingConfig) -> Self {
            let mut surface = HeadlessSurface::new(Extent2::new(64, 64), HeadlessConfig::extended());
            let log = surface.log();
            let mut ctx = Context::new(&mut surface, &GraphicsSettings::default()).unwrap();
            let map = Arc::new(MemoryMap::new());
            map.add_tileset(Arc::new(tileset()));
            map.fill(-40, -40, 80, 80, |_, _| Some(GROUND));
            let tile_map = TileMap::new(
                &mut ctx,
                map.clone(),
                GlobalLighting::default(),
                streaming,
            ).unwrap();
            // top-down, centered on chunk <1,1>
            let mut camera = Camera::default();
            camera.position = Vec3::new(12.0, 12.0, 10.0);
            Harness {
                ctx,
                log,
                map,
                tile_map,
                camera,
                viewport: Extent2::new(64.0, 64.0),
                start: Instant::now(),
            }
        }

        fn frame(&mut self, secs: f64) {
            let now = self.start + Duration::from_secs_f64(secs);
            let frame = FrameContext::new(&self.camera, self.viewport, 1.0, secs, now);
            self.tile_map.update(&mut self.ctx, &frame).unwrap();
            self.tile_map.render(&mut self.ctx, &frame);
        }
    }

    fn unbudgeted() -> StreamingConfig {
        StreamingConfig {
            chunk_creation_budget: 60.0,
            macrotile_budget: 60.0,
            ..StreamingConfig::default()
        }
    }

    fn isometric_camera() -> Camera {
        let mut camera = Camera::default();
        camera.rotation = Quaternion::rotation_z(-std::f32::consts::FRAC_PI_4)
            * Quaternion::rotation_x(std::f32::consts::FRAC_PI_3);
        camera.position = camera.rotation * Vec3::new(0.0, 0.0, 50.0);
        camera
    }

    #[test]
    fn test_view_radius_grows_when_zooming_out() {
        let mut camera = isometric_camera();
        let viewport = Extent2::new(800.0, 600.0);
        let mut last = 0;
        for step in 0..20 {
            camera.ortho_scale = 0.25 / (1.0 + step as f32);
            let frame = FrameContext::new(&camera, viewport, 1.0, 0.0, Instant::now());
            let view = View::compute(&frame, 10);
            assert!(view.radius >= last, "radius shrank at scale {}", camera.ortho_scale);
            assert!(view.radius <= 10);
            assert!(view.render_chunks.len() <= view.view_chunks.len());
            assert!(view.render_chunks.iter().all(|c| view.view_chunks.contains(c)));
            last = view.radius;
        }
        assert_eq!(last, 10);
    }

    #[test]
    fn test_top_down_view() {
        let mut camera = Camera::default();
        camera.position = Vec3::new(12.0, 12.0, 10.0);
        let frame = FrameContext::new(&camera, Extent2::new(64.0, 64.0), 1.0, 0.0, Instant::now());
        let view = View::compute(&frame, 10);
        assert_eq!(view.center, Some(ChunkCoord::new(1, 1)));
        assert_eq!(view.radius, 1);
        assert_eq!(view.view_chunks.len(), 9);
        assert_eq!(view.render_chunks, vec![ChunkCoord::new(1, 1)]);
    }

    #[test]
    fn test_creation_throttled_by_budget() {
        let mut h = Harness::new(StreamingConfig {
            chunk_creation_budget: 0.0,
            ..unbudgeted()
        });
        h.frame(0.0);
        assert_eq!(h.tile_map.num_chunks(), 1);
        h.frame(0.1);
        assert_eq!(h.tile_map.num_chunks(), 2);

        let mut h = Harness::new(unbudgeted());
        h.frame(0.0);
        assert_eq!(h.tile_map.num_chunks(), 9);
    }

    #[test]
    fn test_region_update_marks_covered_chunks() {
        let mut h = Harness::new(unbudgeted());
        h.frame(0.0);

        // exactly chunk <1,0>
        h.map.fill(8, 0, 8, 8, |_, _| Some(LAMP));
        h.tile_map.process_events();
        for coord in h.tile_map.view().unwrap().view_chunks.clone() {
            let expected = if coord == ChunkCoord::new(1, 0) {
                ChunkState::Stale
            } else {
                ChunkState::Populated
            };
            assert_eq!(h.tile_map.chunk(coord).unwrap().state(), expected, "{}", coord);
        }

        h.frame(0.1);
        assert_eq!(h.tile_map.chunk(ChunkCoord::new(1, 0)).unwrap().point_lights().len(), 64);
    }

    #[test]
    fn test_lights_reach_neighbors_within_range() {
        let mut h = Harness::new(unbudgeted());
        // one lamp at the left edge of chunk <1,1>
        h.map.set_tile(8, 12, Some(LAMP));
        h.frame(0.0);
        h.camera.position.x = 28.0;
        h.frame(0.1);

        let external = |h: &Harness, x, y| h.tile_map.chunk(ChunkCoord::new(x, y))
            .unwrap()
            .external_point_lights()
            .len();
        assert_eq!(h.tile_map.chunk(ChunkCoord::new(1, 1)).unwrap().point_lights().len(), 1);
        assert_eq!(external(&h, 1, 1), 0);
        assert_eq!(external(&h, 0, 1), 1);
        assert_eq!(external(&h, 2, 1), 1);
        // 7.5 right and 3.5 down, within 10
        assert_eq!(external(&h, 2, 2), 1);
        // 15.5 right is not
        assert_eq!(external(&h, 3, 1), 0);
    }

    #[test]
    fn test_lit_entity_lifecycle() {
        let mut h = Harness::new(unbudgeted());
        h.map.set_tile(20, 12, Some(LAMP));
        h.frame(0.0);

        let id = h.tile_map.add_lit_entity(LitEntity {
            position: Vec3::new(12.0, 12.0, 0.0),
            point_lights: vec![PointLight::new([12.0, 12.0, 1.0], [1.0, 1.0, 1.0])],
        });
        h.frame(0.1);
        let centre = |h: &Harness| h.tile_map.chunk(ChunkCoord::new(1, 1))
            .unwrap()
            .external_point_lights()
            .to_vec();
        // entity light first, then the lamp of <2,1>
        let lights = centre(&h);
        assert_eq!(lights.len(), 2);
        assert_eq!(lights[0].pos, Vec3::new(12.0, 12.0, 1.0));

        // the entity sees the lamp but not itself
        let seen = h.tile_map.entity_lights(id);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].pos, Vec3::new(20.5, 12.5, 1.0));

        assert!(h.tile_map.move_lit_entity(id, Vec3::new(4.0, 4.0, 0.0), Vec::new()));
        h.frame(0.2);
        assert_eq!(centre(&h).len(), 1);

        assert!(h.tile_map.remove_lit_entity(id).is_some());
        assert!(h.tile_map.remove_lit_entity(id).is_none());
        assert!(h.tile_map.entity_lights(id).is_empty());
    }

    #[test]
    fn test_missing_tile_types_rebuilt_on_registration() {
        let mut h = Harness::new(unbudgeted());
        h.map.set_tile(12, 12, Some(LATE));
        h.frame(0.0);
        let coord = ChunkCoord::new(1, 1);
        assert!(h.tile_map.chunk(coord).unwrap().is_missing_tile_types());

        h.map.add_tileset(Arc::new(MemoryTileset::new(Extent2::new(16, 16), Extent2::new(4, 4))
            .with_tile_type(LATE, TileType::still(Vec2::zero(), GeometryKind::CubeBack))));
        h.tile_map.process_events();
        assert_eq!(h.tile_map.chunk(coord).unwrap().state(), ChunkState::Stale);
        assert_eq!(h.tile_map.chunk(ChunkCoord::new(0, 0)).unwrap().state(), ChunkState::Populated);

        h.frame(0.1);
        assert!(!h.tile_map.chunk(coord).unwrap().is_missing_tile_types());
    }

    #[test]
    fn test_replaced_tileset_reaches_chunks() {
        let mut h = Harness::new(unbudgeted());
        let coord = ChunkCoord::new(1, 1);
        h.frame(0.0);
        h.frame(0.1);
        let flat = h.tile_map.chunk(coord).unwrap().index_count();
        let uploads = h.log.count(|c| matches!(c, GpuCommand::UploadTexture { .. }));

        let old = h.map.tileset(GROUND).unwrap();
        let cubes = tileset()
            .with_tile_type(GROUND, TileType::still(Vec2::zero(), GeometryKind::CubeFront));
        assert!(h.map.replace_tileset(&old, Arc::new(cubes)));
        h.frame(0.2);
        h.frame(0.3);

        assert_eq!(h.tile_map.chunk(coord).unwrap().index_count(), flat * 3);
        assert!(h.log.count(|c| matches!(c, GpuCommand::UploadTexture { .. })) > uploads);
    }

    #[test]
    fn test_lighting_failure_is_retried() {
        let mut h = Harness::new(unbudgeted());
        let coord = ChunkCoord::new(1, 1);
        h.frame(0.0);
        h.frame(0.1);
        assert_eq!(h.tile_map.chunk(coord).unwrap().light_pass_count(), 1);

        // one more light than fits in a pass
        h.tile_map.add_lit_entity(LitEntity {
            position: Vec3::new(12.0, 12.0, 0.0),
            point_lights: (0..MAX_POINT_LIGHTS + 1)
                .map(|i| PointLight::new([12.0, 12.0 + i as f32 * 0.1, 1.0], [1.0, 1.0, 1.0]))
                .collect(),
        });
        h.log.limit_buffers(Some(h.log.live_buffers()));
        h.frame(0.2);
        assert_eq!(h.tile_map.chunk(coord).unwrap().light_pass_count(), 1);
        assert!(h.tile_map.chunks[&coord].lighting_needs_update);

        h.log.limit_buffers(None);
        h.frame(0.3);
        assert_eq!(h.tile_map.chunk(coord).unwrap().light_pass_count(), 2);
        assert!(!h.tile_map.chunks[&coord].lighting_needs_update);
    }

    #[test]
    fn test_global_lighting_invalidates_macrotiles() {
        let mut h = Harness::new(unbudgeted());
        let coord = ChunkCoord::new(1, 1);
        h.frame(0.0);
        h.frame(0.1);
        assert!(h.tile_map.chunk(coord).unwrap().macrotile().unwrap().is_valid());

        h.tile_map.set_lighting(GlobalLighting {
            sun_radiance: Rgb::new(2.0, 2.0, 2.0),
            ..GlobalLighting::default()
        });
        h.tile_map.update(&mut h.ctx, &FrameContext::new(
            &h.camera, h.viewport, 1.0, 0.2, h.start,
        )).unwrap();
        assert!(!h.tile_map.chunk(coord).unwrap().macrotile().unwrap().is_valid());
    }

    #[test]
    fn test_idle_chunks_collected() {
        let mut h = Harness::new(StreamingConfig {
            gc_interval: 5.0,
            ..unbudgeted()
        });
        h.frame(0.0);
        assert!(h.tile_map.chunk(ChunkCoord::new(0, 0)).is_some());

        // pan far away and keep rendering
        h.camera.position = Vec3::new(1000.0, 1000.0, 10.0);
        for i in 1..=12 {
            h.frame(i as f64);
        }
        assert!(h.tile_map.chunk(ChunkCoord::new(0, 0)).is_none());
        assert!(h.tile_map.chunk(ChunkCoord::containing_point(Vec2::new(1000.0, 1000.0))).is_some());
    }

    #[test]
    fn test_dispose_unsubscribes() {
        let mut h = Harness::new(unbudgeted());
        h.frame(0.0);
        assert_eq!(h.map.num_subscribers(), 1);
        h.tile_map.dispose(h.ctx.gpu());
        assert_eq!(h.map.num_subscribers(), 0);
        assert_eq!(h.tile_map.num_chunks(), 0);
    }
}
