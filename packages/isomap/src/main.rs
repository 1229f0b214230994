#[macro_use]
extern crate tracing;

use isomap::{
    logging::init_logging,
    Camera,
    GraphicsSettings,
    LitEntity,
    Renderer,
};
use std::{
    env::args,
    f32::consts::{
        FRAC_PI_3,
        FRAC_PI_4,
        TAU,
    },
    path::Path,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};
use anyhow::*;
use std::result::Result::Ok;
use graphics::{
    HeadlessConfig,
    HeadlessSurface,
};
use tile_data::{
    GeometryKind,
    MemoryMap,
    MemoryTileset,
    PointLight,
    TextureLayer,
    TileType,
    TileTypeId,
};
use vek::*;


const CLI_HELP: &'static str = r#"Renders a generated map headlessly and reports what it did.

Examples:

    [this command]
    Render with default settings.

    [this command] settings.json
    Render with graphics settings loaded from a JSON file.

    [this command] settings.json capture.exr
    Also capture the last frame as an OpenEXR image.

Env var examples:
    RUST_LOG=isomap=trace
    Changes logging levels"#;

const FRAMES: u32 = 180;
const LOSE_CONTEXT_AT: u32 = 90;
const MAP_RADIUS: i32 = 48;

const GRASS: TileTypeId = 1;
const WALL: TileTypeId = 2;
const LAMP: TileTypeId = 3;
const WATER: TileTypeId = 4;


fn main() {
    if let Err(e) = init_logging() {
        eprintln!("{:#}", e);
    }
    let args = args().collect::<Vec<_>>();
    if args.get(1).map(String::as_str) == Some("--help") {
        println!("{}", CLI_HELP);
        return;
    }
    if let Err(e) = run(&args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    let settings = match args.get(1) {
        Some(path) => GraphicsSettings::load(Path::new(path))?,
        None => GraphicsSettings::default(),
    };
    info!(?settings, "starting demo");

    let map = Arc::new(MemoryMap::new());
    map.add_tileset(Arc::new(demo_tileset()?));
    generate(&map);

    let surface = HeadlessSurface::new(Extent2::new(800, 600), HeadlessConfig::extended());
    let log = surface.log();
    let mut renderer = Renderer::new(surface, map.clone(), settings);
    renderer.camera = isometric_camera();

    let lantern = renderer.add_lit_entity(LitEntity {
        position: Vec3::zero(),
        point_lights: Vec::new(),
    });

    let start = Instant::now();
    for i in 0..FRAMES {
        let t = i as f32 / 60.0;
        let now = start + Duration::from_secs_f32(t);

        // pan east, with a lantern circling the view center
        let center = Vec2::new(t * 8.0, 0.0);
        renderer.camera.position = renderer.camera.rotation * Vec3::new(0.0, 0.0, 50.0)
            + Vec3::from(center);
        let angle = t * TAU / 3.0;
        let pos = Vec3::new(center.x + angle.cos() * 6.0, center.y + angle.sin() * 6.0, 1.0);
        renderer.move_lit_entity(lantern, pos, vec![PointLight::new(pos, [6.0, 4.0, 2.0])]);

        if i == LOSE_CONTEXT_AT {
            info!("simulating context loss");
            log.lose_context();
        }
        renderer.render_at(now)?;
    }

    let draws = log.draws();
    info!(
        frames = FRAMES,
        chunks = renderer.tile_map().map(|m| m.num_chunks()).unwrap_or(0),
        contexts = log.contexts_created(),
        draws_since_loss = draws.len(),
        macrotile_draws = draws.iter().filter(|d| d.as_deref() == Some("macrotile")).count(),
        live_textures = log.live_textures(),
        "finished rendering",
    );

    if let Some(path) = args.get(2) {
        let now = start + Duration::from_secs_f32(FRAMES as f32 / 60.0);
        let capture = renderer.capture_at(now)?;
        capture.save(Path::new(path))?;
    }

    renderer.dispose();
    Ok(())
}

fn isometric_camera() -> Camera {
    let mut camera = Camera::default();
    camera.rotation = Quaternion::rotation_z(-FRAC_PI_4) * Quaternion::rotation_x(FRAC_PI_3);
    camera
}

/// Tileset of solid colored tiles, 4 across.
fn demo_tileset() -> Result<MemoryTileset> {
    let pixel_size = Extent2::new(32, 32);
    let texture_size = Extent2::new(4, 4);
    let mut tileset = MemoryTileset::new(pixel_size, texture_size)
        .with_tile_type(GRASS, TileType::still(Vec2::new(0.0, 0.0), GeometryKind::Flat))
        .with_tile_type(WALL, TileType::still(Vec2::new(1.0, 0.0), GeometryKind::CubeBack))
        .with_tile_type(LAMP, TileType::new(
            vec![Vec2::new(2.0, 0.0)],
            GeometryKind::CubeFront,
            Some(PointLight::new([0.5, 0.5, 1.5], [20.0, 16.0, 10.0])),
        )?)
        .with_tile_type(WATER, TileType::new(
            (0..4).map(|i| Vec2::new(i as f32, 1.0)).collect(),
            GeometryKind::Flat,
            None,
        )?);

    let colors = [
        [0x4c, 0x9a, 0x3b],
        [0x8a, 0x84, 0x7a],
        [0xf2, 0xd0, 0x6b],
        [0x2f, 0x6f, 0xb5],
    ];
    let width = pixel_size.w * texture_size.w;
    if let Some(color) = tileset.layers.get_mut(&TextureLayer::Color) {
        for (i, px) in color.chunks_exact_mut(4).enumerate() {
            let x = i as u32 % width / pixel_size.w;
            let y = i as u32 / width / pixel_size.h;
            let [r, g, b] = colors[((x + y) % 4) as usize];
            px.copy_from_slice(&[r, g, b, 0xff]);
        }
    }
    Ok(tileset)
}

/// Grass with a river, walls along the river, and the odd lamp.
fn generate(map: &MemoryMap) {
    let r = MAP_RADIUS;
    map.fill(-r, -r, 2 * r, 2 * r, |x, y| {
        let river = (x as f32 * 0.2).sin() * 4.0;
        let d = (y as f32 - river).abs();
        Some(if d < 2.0 {
            WATER
        } else if d < 3.0 {
            if x.rem_euclid(11) == 0 { LAMP } else { WALL }
        } else {
            GRASS
        })
    });
}
