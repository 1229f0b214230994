//! In-memory map and tileset, for hosts that generate content procedurally
//! and for tests.

use crate::{
    tile_type::{
        TileTypeId,
        TileType,
        TextureLayer,
    },
    source::{
        TilesetSource,
        MapSource,
        MapEvent,
        TilesetReplaced,
        MapSubscription,
        SubscriptionId,
        MapEventHub,
    },
};
use std::{
    collections::HashMap,
    sync::Arc,
};
use parking_lot::RwLock;
use vek::*;


/// Tileset held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryTileset {
    pub pixel_size: Extent2<u32>,
    pub texture_size: Extent2<u32>,
    pub tile_types: HashMap<TileTypeId, TileType>,
    pub layers: HashMap<TextureLayer, Vec<u8>>,
}

impl MemoryTileset {
    /// Tileset with blank color, normal and material layers.
    pub fn new(pixel_size: Extent2<u32>, texture_size: Extent2<u32>) -> Self {
        let len = (pixel_size.w * texture_size.w * pixel_size.h * texture_size.h * 4) as usize;
        let layers = TextureLayer::ALL.iter()
            .map(|&layer| (layer, vec![0xff; len]))
            .collect();
        MemoryTileset {
            pixel_size,
            texture_size,
            tile_types: HashMap::new(),
            layers,
        }
    }

    pub fn with_tile_type(mut self, id: TileTypeId, tile_type: TileType) -> Self {
        self.tile_types.insert(id, tile_type);
        self
    }
}

impl TilesetSource for MemoryTileset {
    fn pixel_size(&self) -> Extent2<u32> {
        self.pixel_size
    }

    fn texture_size(&self) -> Extent2<u32> {
        self.texture_size
    }

    fn tile_types(&self) -> Vec<TileTypeId> {
        let mut ids: Vec<TileTypeId> = self.tile_types.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn tile_type(&self, id: TileTypeId) -> Option<TileType> {
        self.tile_types.get(&id).cloned()
    }

    fn texture(&self, layer: TextureLayer) -> Option<&[u8]> {
        self.layers.get(&layer).map(Vec::as_slice)
    }
}


/// Map source backed by a hash map of loaded tiles.
///
/// Tiles absent from the map read as not loaded. Mutations publish the
/// corresponding events to subscribers.
#[derive(Debug, Default)]
pub struct MemoryMap {
    tiles: RwLock<HashMap<(i32, i32), TileTypeId>>,
    tilesets: RwLock<Vec<Arc<dyn TilesetSource>>>,
    hub: MapEventHub,
}

impl MemoryMap {
    pub fn new() -> Self {
        MemoryMap::default()
    }

    /// Register a tileset and notify subscribers.
    pub fn add_tileset(&self, tileset: Arc<dyn TilesetSource>) {
        self.tilesets.write().push(tileset);
        self.hub.emit(MapEvent::TilesetsUpdated(None));
    }

    /// Replace a registered tileset's content, notifying subscribers that it
    /// changed. Returns false if `old` was not registered.
    pub fn replace_tileset(
        &self,
        old: &Arc<dyn TilesetSource>,
        new: Arc<dyn TilesetSource>,
    ) -> bool {
        let mut tilesets = self.tilesets.write();
        let found = tilesets.iter_mut().find(|t| Arc::ptr_eq(t, old));
        match found {
            Some(slot) => {
                *slot = Arc::clone(&new);
                drop(tilesets);
                self.hub.emit(MapEvent::TilesetsUpdated(Some(vec![TilesetReplaced {
                    old: Arc::clone(old),
                    new,
                }])));
                true
            }
            None => false,
        }
    }

    /// Set one tile and notify subscribers.
    pub fn set_tile(&self, x: i32, y: i32, id: Option<TileTypeId>) {
        self.set_tiles_quiet(x, y, 1, 1, |_, _| id);
        self.hub.emit_region(x, y, 1, 1);
    }

    /// Fill the `w` x `h` region at `<x,y>` from `f(x, y)`, then notify
    /// subscribers of the region once.
    pub fn fill<F>(&self, x: i32, y: i32, w: i32, h: i32, f: F)
    where
        F: FnMut(i32, i32) -> Option<TileTypeId>,
    {
        self.set_tiles_quiet(x, y, w, h, f);
        self.hub.emit_region(x, y, w, h);
    }

    fn set_tiles_quiet<F>(&self, x: i32, y: i32, w: i32, h: i32, mut f: F)
    where
        F: FnMut(i32, i32) -> Option<TileTypeId>,
    {
        let mut tiles = self.tiles.write();
        for ty in y..y + h {
            for tx in x..x + w {
                match f(tx, ty) {
                    Some(id) => tiles.insert((tx, ty), id),
                    None => tiles.remove(&(tx, ty)),
                };
            }
        }
    }

    pub fn num_subscribers(&self) -> usize {
        self.hub.num_subscribers()
    }
}

impl MapSource for MemoryMap {
    fn tile(&self, x: i32, y: i32) -> Option<TileTypeId> {
        self.tiles.read().get(&(x, y)).copied()
    }

    fn tileset(&self, id: TileTypeId) -> Option<Arc<dyn TilesetSource>> {
        self.tilesets.read().iter()
            .find(|tileset| tileset.tile_type(id).is_some())
            .cloned()
    }

    fn subscribe(&self) -> MapSubscription {
        self.hub.subscribe()
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.hub.unsubscribe(id)
    }
}


#[test]
fn test_memory_map_events() {
    let map = MemoryMap::new();
    let sub = map.subscribe();
    map.fill(0, 0, 4, 4, |x, _| if x < 2 { Some(1) } else { None });
    assert_eq!(map.tile(1, 3), Some(1));
    assert_eq!(map.tile(2, 0), None);
    let events: Vec<MapEvent> = sub.try_iter().collect();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], MapEvent::RegionUpdated { x: 0, y: 0, w: 4, h: 4 }));
}


#[test]
fn test_replace_tileset_names_both_sides() {
    let map = MemoryMap::new();
    let old: Arc<dyn TilesetSource> = Arc::new(MemoryTileset::new(Extent2::new(8, 8), Extent2::new(1, 1)));
    let new: Arc<dyn TilesetSource> = Arc::new(MemoryTileset::new(Extent2::new(8, 8), Extent2::new(1, 1)));
    map.add_tileset(old.clone());
    let sub = map.subscribe();

    assert!(map.replace_tileset(&old, new.clone()));
    assert!(!map.replace_tileset(&old, new.clone()));
    let events: Vec<MapEvent> = sub.try_iter().collect();
    assert_eq!(events.len(), 1);
    match &events[0] {
        MapEvent::TilesetsUpdated(Some(replaced)) => {
            assert_eq!(replaced.len(), 1);
            assert!(Arc::ptr_eq(&replaced[0].old, &old));
            assert!(Arc::ptr_eq(&replaced[0].new, &new));
        }
        event => panic!("unexpected event {:?}", event),
    }
}
