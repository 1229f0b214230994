use anyhow::*;
use vek::*;


/// Identifies a tile's visual definition within some tileset. Stable for the
/// lifetime of the world.
pub type TileTypeId = u32;


/// Shape a tile is rendered as.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    /// A single ground-level quad.
    Flat,
    /// A cube with its far top corner collapsed, reading as recessed.
    CubeBack,
    /// A cube with its far top corner pulled out, reading as convex.
    CubeFront,
}


/// A point light.
///
/// Position is either local to a tile's unit cube or in world space,
/// depending on where it appears. Radiance is HDR and components may exceed 1.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PointLight {
    pub pos: Vec3<f32>,
    pub radiance: Rgb<f32>,
}

impl PointLight {
    pub fn new(pos: impl Into<Vec3<f32>>, radiance: impl Into<Rgb<f32>>) -> Self {
        PointLight {
            pos: pos.into(),
            radiance: radiance.into(),
        }
    }

    /// Largest radiance component.
    pub fn radiance_magnitude(&self) -> f32 {
        self.radiance.r.max(self.radiance.g).max(self.radiance.b)
    }
}


/// Visual definition of a tile. Immutable once obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct TileType {
    /// Animation frames, as tile offsets into the tileset texture.
    frames: Vec<Vec2<f32>>,
    geometry: GeometryKind,
    point_light: Option<PointLight>,
}

impl TileType {
    /// Errors if `frames` is empty.
    pub fn new(
        frames: Vec<Vec2<f32>>,
        geometry: GeometryKind,
        point_light: Option<PointLight>,
    ) -> Result<Self> {
        ensure!(!frames.is_empty(), "tile type must have at least one frame");
        Ok(TileType {
            frames,
            geometry,
            point_light,
        })
    }

    /// Single-frame tile type without a light.
    pub fn still(frame: Vec2<f32>, geometry: GeometryKind) -> Self {
        TileType {
            frames: vec![frame],
            geometry,
            point_light: None,
        }
    }

    pub fn frames(&self) -> &[Vec2<f32>] {
        &self.frames
    }

    pub fn geometry(&self) -> GeometryKind {
        self.geometry
    }

    pub fn point_light(&self) -> Option<&PointLight> {
        self.point_light.as_ref()
    }

    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }
}


/// Texture layer of a tileset atlas.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureLayer {
    Color,
    Normal,
    Material,
}

impl TextureLayer {
    pub const ALL: [TextureLayer; 3] = [
        TextureLayer::Color,
        TextureLayer::Normal,
        TextureLayer::Material,
    ];
}


#[test]
fn test_empty_frames_rejected() {
    assert!(TileType::new(Vec::new(), GeometryKind::Flat, None).is_err());
    let animated = TileType::new(
        vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0)],
        GeometryKind::CubeFront,
        None,
    ).unwrap();
    assert!(animated.is_animated());
}
