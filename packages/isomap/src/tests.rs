//! Whole-renderer scenarios against a headless context.

use crate::{
    renderer::Renderer,
    settings::{
        GraphicsSettings,
        StreamingConfig,
    },
};
use std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};
use graphics::{
    HeadlessConfig,
    HeadlessSurface,
};
use tile_data::{
    ChunkCoord,
    GeometryKind,
    MemoryMap,
    MemoryTileset,
    TileType,
    TileTypeId,
};
use vek::*;


const GROUND: TileTypeId = 1;
const WATER: TileTypeId = 2;

fn tileset() -> MemoryTileset {
    MemoryTileset::new(Extent2::new(16, 16), Extent2::new(4, 4))
        .with_tile_type(GROUND, TileType::still(Vec2::zero(), GeometryKind::Flat))
        .with_tile_type(WATER, TileType::new(
            (0..4).map(|i| Vec2::new(i as f32, 1.0)).collect(),
            GeometryKind::Flat,
            None,
        ).unwrap())
}

fn settings() -> GraphicsSettings {
    GraphicsSettings {
        streaming: StreamingConfig {
            chunk_creation_budget: 60.0,
            macrotile_budget: 60.0,
            ..StreamingConfig::default()
        },
        ..GraphicsSettings::default()
    }
}

/// Renderer over a 3x3 chunk grid of ground, looking straight down at the
/// middle chunk, which is the only one on screen.
fn grid_renderer() -> (Arc<MemoryMap>, Renderer<HeadlessSurface>) {
    let map = Arc::new(MemoryMap::new());
    map.add_tileset(Arc::new(tileset()));
    map.fill(0, 0, 24, 24, |_, _| Some(GROUND));
    let surface = HeadlessSurface::new(Extent2::new(64, 64), HeadlessConfig::extended());
    let mut renderer = Renderer::new(surface, map.clone(), settings());
    renderer.camera.position = Vec3::new(12.0, 12.0, 10.0);
    (map, renderer)
}

fn grid() -> impl Iterator<Item=ChunkCoord> {
    (0..3).flat_map(|y| (0..3).map(move |x| ChunkCoord::new(x, y)))
}

#[test]
fn test_only_live_rendered_chunks_get_macrotiles() {
    let (_map, mut renderer) = grid_renderer();
    let start = Instant::now();
    for i in 0..10 {
        renderer.render_at(start + Duration::from_millis(i * 16)).unwrap();
    }

    let tile_map = renderer.tile_map().unwrap();
    assert_eq!(tile_map.view().unwrap().render_chunks, vec![ChunkCoord::new(1, 1)]);
    for coord in grid() {
        let chunk = tile_map.chunk(coord).unwrap();
        let valid = chunk.macrotile().unwrap().is_valid();
        assert_eq!(valid, coord == ChunkCoord::new(1, 1), "{}", coord);
    }

    let log = renderer.surface().log();
    log.clear();
    renderer.render_at(start + Duration::from_millis(160)).unwrap();
    let draws = log.draws();
    assert_eq!(draws.iter().filter(|d| d.as_deref() == Some("macrotile")).count(), 1);
    assert_eq!(draws.iter().filter(|d| d.as_deref() == Some("tile_chunk")).count(), 0);
}

#[test]
fn test_panning_caches_chunks_once_seen() {
    let (_map, mut renderer) = grid_renderer();
    let start = Instant::now();
    renderer.render_at(start).unwrap();
    renderer.camera.position.x = 4.0;
    for i in 1..10 {
        renderer.render_at(start + Duration::from_millis(i * 16)).unwrap();
    }

    let tile_map = renderer.tile_map().unwrap();
    for coord in grid() {
        let seen = coord == ChunkCoord::new(1, 1) || coord == ChunkCoord::new(0, 1);
        let valid = tile_map.chunk(coord)
            .and_then(|chunk| chunk.macrotile())
            .map(|macrotile| macrotile.is_valid())
            .unwrap_or(false);
        assert_eq!(valid, seen, "{}", coord);
    }
}

#[test]
fn test_animation_advances_with_frame_clock() {
    let (map, mut renderer) = grid_renderer();
    map.set_tile(12, 12, Some(WATER));
    let coord = ChunkCoord::new(1, 1);

    // 13ms steps never land within 0.008 ticks of a tick boundary
    let start = Instant::now();
    for k in 0..100u64 {
        renderer.render_at(start + Duration::from_millis(k * 13)).unwrap();
        let elapsed = renderer.time();
        assert!((elapsed - k as f64 * 0.013).abs() < 1e-6);

        let chunk = renderer.tile_map().unwrap().chunk(coord).unwrap();
        let expected = (elapsed * 24.0).floor() as usize % 4;
        assert_eq!(chunk.animation_frame(WATER), expected, "at {}s", elapsed);
        assert!(chunk.macrotile().is_none());
    }
}

#[test]
fn test_context_loss_rebuilds_lazily() {
    let (_map, mut renderer) = grid_renderer();
    let log = renderer.surface().log();
    let start = Instant::now();
    for i in 0..3 {
        renderer.render_at(start + Duration::from_millis(i * 16)).unwrap();
    }
    assert!(renderer.tile_map().unwrap().chunk(ChunkCoord::new(1, 1)).unwrap()
        .macrotile().unwrap().is_valid());

    log.lose_context();
    renderer.render_at(start + Duration::from_millis(48)).unwrap();
    assert_eq!(log.contexts_created(), 2);

    // fresh chunks, so the cache has to be earned again
    let chunk = renderer.tile_map().unwrap().chunk(ChunkCoord::new(1, 1)).unwrap();
    assert!(!chunk.macrotile().unwrap().is_valid());
    renderer.render_at(start + Duration::from_millis(64)).unwrap();
    let chunk = renderer.tile_map().unwrap().chunk(ChunkCoord::new(1, 1)).unwrap();
    assert!(chunk.macrotile().unwrap().is_valid());
}
