use std::fmt;
use vek::*;


/// Side length of a chunk, in tiles.
pub const CHUNK_SIZE: i32 = 8;

/// Number of tiles in a chunk.
pub const NUM_LTIS: usize = (CHUNK_SIZE * CHUNK_SIZE) as usize;


/// Chunk coord.
pub fn chc(x: i32, y: i32) -> ChunkCoord {
    ChunkCoord::new(x, y)
}

/// Local tile index of the tile at local coordinates `<x,y>`.
pub fn lti(x: i32, y: i32) -> usize {
    debug_assert!(x >= 0 && x < CHUNK_SIZE, "local x out of range");
    debug_assert!(y >= 0 && y < CHUNK_SIZE, "local y out of range");
    (y * CHUNK_SIZE + x) as usize
}

/// Local coordinates of a local tile index.
pub fn lti_to_local(lti: usize) -> Vec2<i32> {
    debug_assert!(lti < NUM_LTIS, "lti out of range");
    Vec2::new(lti as i32 % CHUNK_SIZE, lti as i32 / CHUNK_SIZE)
}


/// Chunk coord.
///
/// Chunk `<x,y>` covers world tiles `[x*N, x*N+N) x [y*N, y*N+N)`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
}

impl ChunkCoord {
    /// Construct from components.
    pub fn new(x: i32, y: i32) -> Self {
        ChunkCoord { x, y }
    }

    /// The chunk containing the tile at `<x,y>`.
    pub fn containing_tile(x: i32, y: i32) -> Self {
        ChunkCoord::new(x.div_euclid(CHUNK_SIZE), y.div_euclid(CHUNK_SIZE))
    }

    /// The chunk containing the world-space ground point `pos`.
    pub fn containing_point(pos: Vec2<f32>) -> Self {
        let n = CHUNK_SIZE as f32;
        ChunkCoord::new((pos.x / n).floor() as i32, (pos.y / n).floor() as i32)
    }

    /// Tile coordinates of the chunk's minimum corner.
    pub fn origin(self) -> Vec2<i32> {
        Vec2::new(self.x * CHUNK_SIZE, self.y * CHUNK_SIZE)
    }

    /// World-space minimum and maximum corners of the chunk's ground
    /// footprint.
    pub fn bounds(self) -> (Vec2<f32>, Vec2<f32>) {
        let min = self.origin().map(|n| n as f32);
        (min, min + Vec2::broadcast(CHUNK_SIZE as f32))
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        ChunkCoord::new(self.x + dx, self.y + dy)
    }
}


macro_rules! impl_fmt_chunk_coord {
    ($t:ident, $fstr:literal)=>{
        impl fmt::$t for ChunkCoord {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(
                    f, $fstr,
                    self.x, self.y,
                )
            }
        }
    };
}
impl_fmt_chunk_coord!(Debug, "<{},{}>");
impl_fmt_chunk_coord!(Display, "<{},{}>");


#[test]
fn test_containing_tile_negative() {
    assert_eq!(ChunkCoord::containing_tile(0, 7), chc(0, 0));
    assert_eq!(ChunkCoord::containing_tile(8, -1), chc(1, -1));
    assert_eq!(ChunkCoord::containing_tile(-8, -9), chc(-1, -2));
    assert_eq!(ChunkCoord::containing_point(Vec2::new(-0.5, 15.9)), chc(-1, 1));
}

#[test]
fn test_lti_round_trip() {
    for i in 0..NUM_LTIS {
        let l = lti_to_local(i);
        assert_eq!(lti(l.x, l.y), i);
    }
    assert_eq!(lti(7, 0), 7);
    assert_eq!(lti(0, 1), 8);
}
