//! The host-facing renderer: owns the graphics context and everything
//! built on it, and drives one frame per `render` call.

use crate::{
    camera::Camera,
    capture::Capture,
    composite::Composite,
    context::Context,
    frame::FrameContext,
    lighting::{
        GlobalLighting,
        LitEntity,
        LitEntityId,
    },
    settings::GraphicsSettings,
    tile_map::TileMap,
};
use std::{
    mem,
    sync::Arc,
    time::Instant,
};
use anyhow::*;
use std::result::Result::Ok;
use graphics::BackingSurface;
use slab::Slab;
use tile_data::{
    MapSource,
    PointLight,
};
use vek::*;


/// Longest frame delta the animation clock advances by, in seconds.
pub const MAX_FRAME_DELTA: f64 = 1.0 / 30.0;


/// Something drawn into the composite after the map, such as entities.
pub trait EntityLayer {
    fn render(&mut self, ctx: &mut Context, frame: &FrameContext) -> Result<()>;

    /// The context was replaced. Handles created on the old one are invalid.
    fn reset(&mut self) {}
}


/// Everything that lives and dies with one graphics context.
struct Scene {
    ctx: Context,
    tile_map: TileMap,
    composite: Composite,
}

impl Scene {
    fn dispose(mut self) {
        let gpu = self.ctx.gpu.as_mut();
        self.tile_map.dispose(gpu);
        self.composite.dispose(gpu);
        self.ctx.dispose();
    }
}

enum Output {
    Present,
    Capture,
}


/// Renders a tile map onto a backing surface.
///
/// The graphics context is created lazily on the first frame, and recreated
/// whenever it's lost or the settings change.
pub struct Renderer<S> {
    surface: S,
    map: Arc<dyn MapSource>,
    pub camera: Camera,
    settings: GraphicsSettings,
    lighting: GlobalLighting,
    needs_init: bool,
    scene: Option<Scene>,
    /// Lit entities while there is no tile map to hold them.
    detached_entities: Slab<LitEntity>,
    entity_layers: Vec<Box<dyn EntityLayer>>,
    time: f64,
    last_frame: Option<Instant>,
}

impl<S: BackingSurface> Renderer<S> {
    pub fn new(surface: S, map: Arc<dyn MapSource>, settings: GraphicsSettings) -> Self {
        Renderer {
            surface,
            map,
            camera: Camera::default(),
            settings,
            lighting: GlobalLighting::default(),
            needs_init: false,
            scene: None,
            detached_entities: Slab::new(),
            entity_layers: Vec::new(),
            time: 0.0,
            last_frame: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn map(&self) -> &Arc<dyn MapSource> {
        &self.map
    }

    /// Switch to another map. Everything built for the old one is dropped.
    pub fn set_map(&mut self, map: Arc<dyn MapSource>) {
        self.map = map;
        self.needs_init = true;
    }

    pub fn settings(&self) -> &GraphicsSettings {
        &self.settings
    }

    /// Replace the settings. They take effect on the next frame, which
    /// reinitializes the context.
    pub fn set_settings(&mut self, settings: GraphicsSettings) {
        if settings != self.settings {
            self.settings = settings;
            self.needs_init = true;
        }
    }

    pub fn lighting(&self) -> &GlobalLighting {
        &self.lighting
    }

    pub fn set_lighting(&mut self, lighting: GlobalLighting) {
        if let Some(scene) = self.scene.as_mut() {
            scene.tile_map.set_lighting(lighting.clone());
        }
        self.lighting = lighting;
    }

    pub fn add_lit_entity(&mut self, entity: LitEntity) -> LitEntityId {
        match self.scene.as_mut() {
            Some(scene) => scene.tile_map.add_lit_entity(entity),
            None => LitEntityId(self.detached_entities.insert(entity)),
        }
    }

    pub fn move_lit_entity(&mut self, id: LitEntityId, position: Vec3<f32>, point_lights: Vec<PointLight>) -> bool {
        match self.scene.as_mut() {
            Some(scene) => scene.tile_map.move_lit_entity(id, position, point_lights),
            None => match self.detached_entities.get_mut(id.0) {
                Some(entity) => {
                    entity.position = position;
                    entity.point_lights = point_lights;
                    true
                }
                None => false,
            },
        }
    }

    pub fn remove_lit_entity(&mut self, id: LitEntityId) -> Option<LitEntity> {
        match self.scene.as_mut() {
            Some(scene) => scene.tile_map.remove_lit_entity(id),
            None => self.detached_entities.try_remove(id.0),
        }
    }

    /// Lights shining on a lit entity, as of the last frame.
    pub fn entity_lights(&self, id: LitEntityId) -> Vec<PointLight> {
        self.scene.as_ref()
            .map(|scene| scene.tile_map.entity_lights(id))
            .unwrap_or_default()
    }

    pub fn add_entity_layer(&mut self, layer: Box<dyn EntityLayer>) {
        self.entity_layers.push(layer);
    }

    /// Animation time in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn context(&self) -> Option<&Context> {
        self.scene.as_ref().map(|scene| &scene.ctx)
    }

    pub fn tile_map(&self) -> Option<&TileMap> {
        self.scene.as_ref().map(|scene| &scene.tile_map)
    }

    /// Where a point on the surface, in logical pixels from the top left,
    /// looks at the ground plane.
    pub fn ground_location(&self, point: Vec2<f32>) -> Option<Vec2<f32>> {
        let size = self.surface.size().map(|n| n.max(1) as f32);
        let clip = Vec2::new(
            point.x / size.w * 2.0 - 1.0,
            1.0 - point.y / size.h * 2.0,
        );
        self.camera
            .ground_point(size, clip, 0.0)
            .map(|p| p.xy())
    }

    /// Draw one frame.
    pub fn render(&mut self) -> Result<()> {
        self.render_at(Instant::now())
    }

    /// Draw one frame as if at the given time.
    pub fn render_at(&mut self, now: Instant) -> Result<()> {
        self.frame(now, Output::Present).map(|_| ())
    }

    /// Render one frame and read it back instead of presenting it.
    pub fn capture(&mut self) -> Result<Capture> {
        self.capture_at(Instant::now())
    }

    pub fn capture_at(&mut self, now: Instant) -> Result<Capture> {
        self.frame(now, Output::Capture)?
            .ok_or_else(|| anyhow!("frame produced no capture"))
    }

    fn advance_clock(&mut self, now: Instant) {
        let dt = self.last_frame
            .map(|last| now.saturating_duration_since(last).as_secs_f64().min(MAX_FRAME_DELTA))
            .unwrap_or(0.0);
        self.time += dt;
        self.last_frame = Some(now);
    }

    fn frame(&mut self, now: Instant, output: Output) -> Result<Option<Capture>> {
        self.advance_clock(now);
        self.ensure_scene()?;

        let viewport = self.surface.size().map(|n| n.max(1) as f32);
        let pixel_scale = self.surface.pixel_scale();
        let drawing_size = self.surface.drawing_buffer_size();
        let Self {
            scene,
            camera,
            entity_layers,
            time,
            ..
        } = self;
        let scene = scene.as_mut().ok_or_else(|| anyhow!("no graphics context"))?;
        let frame = FrameContext::new(camera, viewport, pixel_scale, *time, now);

        scene.tile_map.update(&mut scene.ctx, &frame)?;
        scene.composite.begin(scene.ctx.gpu(), drawing_size)?;
        scene.tile_map.render(&mut scene.ctx, &frame);
        for layer in entity_layers.iter_mut() {
            layer.render(&mut scene.ctx, &frame)?;
        }

        match output {
            Output::Present => {
                scene.composite.present(&mut scene.ctx, drawing_size)?;
                Ok(None)
            }
            Output::Capture => scene.composite.capture(&mut scene.ctx).map(Some),
        }
    }

    fn ensure_scene(&mut self) -> Result<()> {
        let lost = self.scene.as_ref()
            .map(|scene| scene.ctx.gpu.is_context_lost())
            .unwrap_or(false);
        if lost {
            warn!("graphics context lost, reinitializing");
        }
        if self.scene.is_none() || lost || self.needs_init {
            self.init_scene()?;
        }
        Ok(())
    }

    fn init_scene(&mut self) -> Result<()> {
        if let Some(mut scene) = self.scene.take() {
            self.detached_entities = scene.tile_map.take_lit_entities();
            scene.dispose();
        }
        for layer in &mut self.entity_layers {
            layer.reset();
        }

        let mut ctx = Context::new(&mut self.surface, &self.settings)?;
        let mut tile_map = TileMap::new(
            &mut ctx,
            self.map.clone(),
            self.lighting.clone(),
            self.settings.streaming.clone(),
        )?;
        let composite = Composite::new(&mut ctx)?;
        tile_map.restore_lit_entities(mem::take(&mut self.detached_entities));

        self.scene = Some(Scene {
            ctx,
            tile_map,
            composite,
        });
        self.needs_init = false;
        Ok(())
    }

    /// Release every GPU resource. The next frame starts over.
    pub fn dispose(&mut self) {
        if let Some(mut scene) = self.scene.take() {
            self.detached_entities = scene.tile_map.take_lit_entities();
            scene.dispose();
        }
    }
}

impl<S> std::fmt::Debug for Renderer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("camera", &self.camera)
            .field("settings", &self.settings)
            .field("context", &self.scene.as_ref().map(|scene| &scene.ctx))
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::HdrMode;
    use std::time::Duration;
    use graphics::{
        HeadlessSurface,
        HeadlessConfig,
        GpuError,
        GpuCommand,
    };
    use tile_data::MemoryMap;

    fn renderer(config: HeadlessConfig, settings: GraphicsSettings) -> Renderer<HeadlessSurface> {
        let surface = HeadlessSurface::new(Extent2::new(64, 64), config);
        let mut renderer = Renderer::new(surface, Arc::new(MemoryMap::new()), settings);
        renderer.camera.position = Vec3::new(12.0, 12.0, 10.0);
        renderer
    }

    #[test]
    fn test_clock_caps_deltas() {
        let mut r = renderer(HeadlessConfig::extended(), GraphicsSettings::default());
        let start = Instant::now();
        r.render_at(start).unwrap();
        assert_eq!(r.time(), 0.0);
        r.render_at(start + Duration::from_millis(10)).unwrap();
        assert!((r.time() - 0.01).abs() < 1e-9);
        r.render_at(start + Duration::from_secs(10)).unwrap();
        assert!((r.time() - (0.01 + MAX_FRAME_DELTA)).abs() < 1e-9);
    }

    #[test]
    fn test_context_loss_reinitializes() {
        let mut r = renderer(HeadlessConfig::extended(), GraphicsSettings::default());
        let log = r.surface().log();
        let id = r.add_lit_entity(LitEntity {
            position: Vec3::new(12.0, 12.0, 0.0),
            point_lights: vec![PointLight::new([12.0, 12.0, 1.0], [1.0, 1.0, 1.0])],
        });
        let start = Instant::now();
        r.render_at(start).unwrap();
        assert_eq!(log.contexts_created(), 1);

        log.lose_context();
        r.render_at(start + Duration::from_millis(16)).unwrap();
        assert_eq!(log.contexts_created(), 2);
        assert!(!r.context().unwrap().gpu.is_context_lost());
        assert!(r.tile_map().unwrap().num_chunks() > 0);
        // lit entities survive
        assert!(r.move_lit_entity(id, Vec3::new(13.0, 12.0, 0.0), Vec::new()));
    }

    #[test]
    fn test_settings_apply_on_next_frame() {
        let mut r = renderer(HeadlessConfig::extended(), GraphicsSettings::default());
        let log = r.surface().log();
        r.render().unwrap();
        assert!(r.context().unwrap().params.composite.bloom);

        r.set_settings(GraphicsSettings::default());
        r.render().unwrap();
        assert_eq!(log.contexts_created(), 1);

        r.set_settings(GraphicsSettings {
            hdr: HdrMode::Off,
            ..GraphicsSettings::default()
        });
        assert!(r.context().unwrap().params.composite.bloom);
        r.render().unwrap();
        assert_eq!(log.contexts_created(), 2);
        assert!(!r.context().unwrap().params.composite.bloom);
    }

    #[test]
    fn test_shader_failure_is_fatal() {
        let mut config = HeadlessConfig::extended();
        config.failing_program = Some("tile_chunk".into());
        let mut r = renderer(config, GraphicsSettings::default());
        let err = r.render().unwrap_err();
        assert!(format!("{:#}", err).contains("tile_chunk"));
        assert!(r.context().is_none());
    }

    #[test]
    fn test_capture_hdr() {
        let mut r = renderer(HeadlessConfig::extended(), GraphicsSettings::default());
        let log = r.surface().log();
        let capture = r.capture().unwrap();
        assert_eq!(capture.size, Extent2::new(64, 64));
        assert_eq!(capture.pixels.len(), 64 * 64 * 4);
        assert_eq!(capture.pixel(0, 0), Some(Rgba::new(0.0, 0.0, 0.0, 1.0)));
        assert_eq!(log.count(|c| matches!(c, GpuCommand::ReadPixels { .. })), 1);
        // not presented
        assert!(!log.draws().contains(&Some("composite_final".to_owned())));
    }

    #[test]
    fn test_capture_from_8_bit_fails() {
        let settings = GraphicsSettings {
            hdr: HdrMode::Off,
            ..GraphicsSettings::default()
        };
        let mut r = renderer(HeadlessConfig::extended(), settings);
        let err = r.capture().unwrap_err();
        match err.downcast_ref::<GpuError>() {
            Some(GpuError::UnsupportedFormat(format)) => {
                assert_eq!(*format, graphics::TextureFormat::Rgba32F);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(format!("{}", err.root_cause()).contains("Rgba32F"));
    }

    #[test]
    fn test_ground_location() {
        let r = renderer(HeadlessConfig::extended(), GraphicsSettings::default());
        let centre = r.ground_location(Vec2::new(32.0, 32.0)).unwrap();
        assert!((centre - Vec2::new(12.0, 12.0)).magnitude() < 1e-4);
        let right = r.ground_location(Vec2::new(64.0, 32.0)).unwrap();
        assert!((right - Vec2::new(14.0, 12.0)).magnitude() < 1e-4);
    }

    #[test]
    fn test_entity_layer_drawn_before_present() {
        struct Layer(graphics::CommandLog, Arc<parking_lot::Mutex<usize>>);

        impl EntityLayer for Layer {
            fn render(&mut self, _: &mut Context, _: &FrameContext) -> Result<()> {
                // nothing presented yet this frame
                assert!(!self.0.draws().contains(&Some("composite_final".to_owned())));
                *self.1.lock() += 1;
                Ok(())
            }

            fn reset(&mut self) {
                self.0.clear();
            }
        }

        let mut r = renderer(HeadlessConfig::extended(), GraphicsSettings::default());
        let log = r.surface().log();
        let calls = Arc::new(parking_lot::Mutex::new(0));
        r.add_entity_layer(Box::new(Layer(log.clone(), calls.clone())));
        r.render().unwrap();
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn test_dispose_releases_resources() {
        let mut r = renderer(HeadlessConfig::extended(), GraphicsSettings::default());
        let log = r.surface().log();
        r.render().unwrap();
        assert!(log.live_textures() > 0);
        r.dispose();
        assert_eq!(log.live_textures(), 0);
        assert_eq!(log.live_buffers(), 0);
        assert_eq!(log.live_framebuffers(), 0);
        assert!(r.context().is_none());
    }
}
