//! Point light culling, global lighting, and dynamic light emitters.

use crate::uniforms::GlobalLightingBlock;
use tile_data::{
    ChunkCoord,
    PointLight,
};
use vek::*;


/// Radiance below which a light no longer visibly contributes.
pub const LIGHT_CULL_EPSILON: f32 = 0.4;

/// Radius in chunks around a chunk whose lights are sampled for it.
pub const CHUNK_LIGHTING_SAMPLE_RADIUS: i32 = 2;

/// Cap on the lights of one chunk, local and external together.
pub const MAX_TOTAL_POINT_LIGHTS: usize = 16;


/// Distance at which a light of the given radiance magnitude attenuates
/// below `LIGHT_CULL_EPSILON` under the inverse square law.
pub fn light_cull_distance(radiance_magnitude: f32) -> f32 {
    (radiance_magnitude.max(0.0) / LIGHT_CULL_EPSILON).sqrt()
}

/// Distance on the ground plane from a point to a chunk's footprint. Zero
/// inside it.
pub fn distance_to_chunk(chunk: ChunkCoord, point: Vec2<f32>) -> f32 {
    let (min, max) = chunk.bounds();
    let dx = (min.x - point.x).max(0.0).max(point.x - max.x);
    let dy = (min.y - point.y).max(0.0).max(point.y - max.y);
    dx.hypot(dy)
}

/// Whether a light in world space is bright enough at a chunk to be used
/// when shading it.
pub fn affects_chunk(light: &PointLight, chunk: ChunkCoord) -> bool {
    distance_to_chunk(chunk, light.pos.xy()) < light_cull_distance(light.radiance_magnitude())
}


/// Scene-wide lighting.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalLighting {
    pub ambient_radiance: Rgb<f32>,
    /// Direction towards the sun.
    pub sun_dir: Vec3<f32>,
    pub sun_radiance: Rgb<f32>,
}

impl Default for GlobalLighting {
    fn default() -> Self {
        GlobalLighting {
            ambient_radiance: Rgb::new(0.5, 0.5, 0.5),
            sun_dir: Vec3::new(-0.5, 0.5, 1.0).normalized(),
            sun_radiance: Rgb::new(1.0, 1.0, 1.0),
        }
    }
}

impl GlobalLighting {
    pub fn to_block(&self) -> GlobalLightingBlock {
        let rgb = |c: Rgb<f32>| Vec3::new(c.r, c.g, c.b);
        GlobalLightingBlock {
            ambient_radiance: rgb(self.ambient_radiance),
            sun_dir: self.sun_dir,
            sun_radiance: rgb(self.sun_radiance),
        }
    }
}


/// Key of a lit entity within a tile map.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LitEntityId(pub usize);


/// A dynamic light emitter registered by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct LitEntity {
    pub position: Vec3<f32>,
    /// Lights in world space.
    pub point_lights: Vec<PointLight>,
}

impl LitEntity {
    pub fn chunk(&self) -> ChunkCoord {
        ChunkCoord::containing_point(self.position.xy())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tile_data::CHUNK_SIZE;

    #[test]
    fn test_distance_to_chunk() {
        let c = ChunkCoord::new(1, 0);
        assert_eq!(distance_to_chunk(c, Vec2::new(10.0, 3.0)), 0.0);
        assert_eq!(distance_to_chunk(c, Vec2::new(5.0, 3.0)), 3.0);
        assert_eq!(distance_to_chunk(c, Vec2::new(19.0, 12.0)), 5.0);
    }

    /// For each magnitude, walk a chunk away from a light one chunk at a time
    /// and check it stops being affected exactly where the gap crosses
    /// `sqrt(R / epsilon)`.
    #[test]
    fn test_cull_crossover_matches_threshold() {
        for radiance in [1.0, 10.0, 100.0] {
            let threshold = (radiance / LIGHT_CULL_EPSILON).sqrt();
            // in chunk <0,0>, at its right edge
            let light = PointLight::new([CHUNK_SIZE as f32, 4.0, 0.5], [radiance, 0.0, 0.0]);

            for dx in 1..12 {
                let target = ChunkCoord::new(dx, 0);
                let gap = ((dx - 1) * CHUNK_SIZE) as f32;
                assert_eq!(
                    affects_chunk(&light, target),
                    gap < threshold,
                    "radiance {} chunk {}",
                    radiance,
                    target,
                );
            }
            assert!((light_cull_distance(radiance) - threshold).abs() < 1e-5);
        }
    }
}
