//! Data-side types of an infinite isometric tile map.
//!
//! The map is an unbounded 2D grid of tiles, addressed by `i32` tile
//! coordinates. For streaming and rendering the grid is partitioned into
//! square chunks of `CHUNK_SIZE` x `CHUNK_SIZE` tiles, addressed by
//! `ChunkCoord`. Within a chunk, a tile is addressed by its local tile index
//! (`lti`), which runs row-major from the chunk's minimum corner.
//!
//! Tile content is not owned by the renderer. It comes from a `MapSource`,
//! which answers per-tile queries (possibly with "not loaded yet"), resolves
//! tile type ids to `TilesetSource`s, and publishes `MapEvent`s through
//! subscriptions when regions become available or tilesets change.

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;


mod coord;
mod per_tile;
mod tile_type;
mod source;
mod memory;


pub use crate::{
    coord::{
        CHUNK_SIZE,
        NUM_LTIS,
        ChunkCoord,
        chc,
        lti,
        lti_to_local,
    },
    per_tile::PerTile,
    tile_type::{
        TileTypeId,
        GeometryKind,
        PointLight,
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
    memory::{
        MemoryTileset,
        MemoryMap,
    },
};
