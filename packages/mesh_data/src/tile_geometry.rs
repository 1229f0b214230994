//! Triangulated footprint of one tile cell.
//!
//! A single 2D tileset image is mapped onto 3D geometry through a UV plane
//! anchored at the near bottom corner of the unit cube and stood up by the
//! projection angle, so that the image reads correctly when viewed from the
//! fixed oblique camera angle.

use crate::{
    MeshData,
    plane::PlaneSubspace,
};
use tile_data::GeometryKind;
use vek::*;


pub const FLAT_VERTS: usize = 4;
pub const FLAT_INDICES: usize = 6;
pub const CUBE_VERTS: usize = 7;
pub const CUBE_INDICES: usize = 18;


/// Where in the shared mesh a tile's geometry was written.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TileGeometryInfo {
    pub vert_count: usize,
    pub index_pos: usize,
    pub index_count: usize,
}


fn uv_plane(kind: GeometryKind, projection_angle: f32) -> PlaneSubspace {
    let mut plane = PlaneSubspace::new(
        // bottom cube corner
        [1.0, 1.0, 0.0],
        // right
        [-1.0, 1.0, 0.0],
        // up, lying on the floor until rotated
        [-1.0, -1.0, 0.0],
    );
    plane.rotate_v_around_u(projection_angle);

    // align the plane origin with the left and bottom cube bounds
    let left = Vec3::new(1.0, 0.0, 0.0);
    let bottom = Vec3::new(1.0, 1.0, 0.0);
    let origin_uv = Vec2::new(
        plane.project_to_plane(left).x,
        plane.project_to_plane(bottom).y,
    );
    plane.move_origin_to_uv(origin_uv);

    if kind == GeometryKind::Flat {
        // pass through the middle of the cube rather than its bottom corner
        let dist = plane.normal_distance(left);
        plane.origin += plane.normal() * dist;
    }

    plane
}

/// Append the geometry of one tile at cell `pos` to `out`.
///
/// `Flat` tiles produce `FLAT_VERTS` vertices and `FLAT_INDICES` indices,
/// cubes produce `CUBE_VERTS` and `CUBE_INDICES`. Pure: equal arguments give
/// equal output.
pub fn build_tile_geometry(
    out: &mut MeshData,
    kind: GeometryKind,
    pos: Vec3<f32>,
    projection_angle: f32,
    texture_aspect: f32,
) -> TileGeometryInfo {
    let plane = uv_plane(kind, projection_angle);

    // squish cubes so they're as tall as the texture aspect ratio
    let z_squish = 1.0 / (texture_aspect * plane.project_from_plane(Vec2::new(0.0, 1.0)).z);

    let index_pos = out.indices.len();
    let mut vert_count = 0;

    let mut push = |out: &mut MeshData, cube_pos: Vec3<f32>| -> u16 {
        vert_count += 1;
        let raw_uv = plane.project_to_plane(cube_pos);
        let uv = Vec2::new(1.0 - raw_uv.x, 1.0 - raw_uv.y);
        let vert_pos = match kind {
            GeometryKind::Flat => plane.project_from_plane(raw_uv),
            GeometryKind::CubeBack | GeometryKind::CubeFront => cube_pos,
        };
        out.push_vertex(vert_pos + pos, uv)
    };

    match kind {
        GeometryKind::Flat => {
            let bot_l = push(out, plane.project_from_plane(Vec2::new(0.0, 0.0)));
            let bot_r = push(out, plane.project_from_plane(Vec2::new(1.0, 0.0)));
            let top_l = push(out, plane.project_from_plane(Vec2::new(0.0, 1.0)));
            let top_r = push(out, plane.project_from_plane(Vec2::new(1.0, 1.0)));

            out.push_triangle(bot_l, top_r, top_l);
            out.push_triangle(top_r, bot_r, bot_l);
        }
        GeometryKind::CubeBack | GeometryKind::CubeFront => {
            let z = z_squish;
            let p010 = push(out, Vec3::new(0.0, 1.0, 0.0));
            let p110 = push(out, Vec3::new(1.0, 1.0, 0.0));
            let p100 = push(out, Vec3::new(1.0, 0.0, 0.0));
            let p001 = push(out, Vec3::new(0.0, 0.0, z));
            let p011 = push(out, Vec3::new(0.0, 1.0, z));
            let p111 = if kind == GeometryKind::CubeFront {
                push(out, Vec3::new(1.0, 1.0, z))
            } else {
                push(out, Vec3::new(0.0, 0.0, 0.0))
            };
            let p101 = push(out, Vec3::new(1.0, 0.0, z));

            // left
            out.push_triangle(p010, p111, p110);
            out.push_triangle(p010, p011, p111);
            // top
            out.push_triangle(p001, p111, p011);
            out.push_triangle(p001, p101, p111);
            // right
            out.push_triangle(p100, p111, p101);
            out.push_triangle(p100, p110, p111);
        }
    }

    TileGeometryInfo {
        vert_count,
        index_pos,
        index_count: out.indices.len() - index_pos,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const ANGLE: f32 = std::f32::consts::FRAC_PI_3;

    #[test]
    fn test_counts_per_kind() {
        let mut out = MeshData::new();
        let flat = build_tile_geometry(&mut out, GeometryKind::Flat, Vec3::zero(), ANGLE, 1.0);
        assert_eq!(flat.vert_count, FLAT_VERTS);
        assert_eq!(flat.index_count, FLAT_INDICES);
        assert_eq!(flat.index_pos, 0);

        for kind in [GeometryKind::CubeBack, GeometryKind::CubeFront] {
            let before = out.indices.len();
            let info = build_tile_geometry(&mut out, kind, Vec3::new(3.0, 1.0, 0.0), ANGLE, 1.0);
            assert_eq!(info.vert_count, CUBE_VERTS);
            assert_eq!(info.index_count, CUBE_INDICES);
            assert_eq!(info.index_pos, before);
        }
        assert_eq!(out.num_vertices(), FLAT_VERTS + 2 * CUBE_VERTS);
        assert_eq!(out.uvs.len(), out.positions.len());
        assert!(out.indices.iter().all(|&i| (i as usize) < out.num_vertices()));
    }

    #[test]
    fn test_deterministic_and_translated() {
        let mut a = MeshData::new();
        let mut b = MeshData::new();
        build_tile_geometry(&mut a, GeometryKind::CubeFront, Vec3::zero(), ANGLE, 1.0);
        build_tile_geometry(&mut b, GeometryKind::CubeFront, Vec3::new(5.0, -2.0, 0.0), ANGLE, 1.0);
        assert_eq!(a.uvs, b.uvs);
        for (pa, pb) in a.positions.iter().zip(&b.positions) {
            assert!((*pb - *pa - Vec3::new(5.0, -2.0, 0.0)).magnitude() < 1e-5);
        }
    }

    #[test]
    fn test_cube_kinds_differ_in_far_corner() {
        let mut back = MeshData::new();
        let mut front = MeshData::new();
        build_tile_geometry(&mut back, GeometryKind::CubeBack, Vec3::zero(), ANGLE, 1.0);
        build_tile_geometry(&mut front, GeometryKind::CubeFront, Vec3::zero(), ANGLE, 1.0);
        assert_eq!(back.indices, front.indices);
        let differing = back.positions.iter()
            .zip(&front.positions)
            .filter(|(a, b)| (**a - **b).magnitude() > 1e-5)
            .count();
        assert_eq!(differing, 1);
        assert_eq!(back.positions[5], Vec3::zero());
    }

    #[test]
    fn test_flat_uvs_cover_unit_square() {
        let mut out = MeshData::new();
        build_tile_geometry(&mut out, GeometryKind::Flat, Vec3::zero(), ANGLE, 1.0);
        let expected = [
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 0.0),
        ];
        for (uv, expected) in out.uvs.iter().zip(expected) {
            assert!((*uv - expected).magnitude() < 1e-4, "{:?} != {:?}", uv, expected);
        }
    }
}
