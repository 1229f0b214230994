use vek::*;


/// A 2D affine subspace of 3D space: `origin + u * s + v * t`.
///
/// Plane coordinates are measured in multiples of `u` and `v`, which need
/// not be unit length or orthogonal to each other, though projection onto
/// the plane assumes they are orthogonal.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PlaneSubspace {
    pub origin: Vec3<f32>,
    pub u: Vec3<f32>,
    pub v: Vec3<f32>,
}

impl PlaneSubspace {
    pub fn new(
        origin: impl Into<Vec3<f32>>,
        u: impl Into<Vec3<f32>>,
        v: impl Into<Vec3<f32>>,
    ) -> Self {
        PlaneSubspace {
            origin: origin.into(),
            u: u.into(),
            v: v.into(),
        }
    }

    /// 3D position of plane coordinates.
    pub fn project_from_plane(&self, p: Vec2<f32>) -> Vec3<f32> {
        self.origin + self.u * p.x + self.v * p.y
    }

    /// Plane coordinates of the orthogonal projection of `p` onto the plane.
    pub fn project_to_plane(&self, p: Vec3<f32>) -> Vec2<f32> {
        let op = p - self.origin;
        Vec2::new(
            self.u.dot(op) / self.u.magnitude_squared(),
            self.v.dot(op) / self.v.magnitude_squared(),
        )
    }

    pub fn normal(&self) -> Vec3<f32> {
        self.u.cross(self.v).normalized()
    }

    /// Signed distance of `p` from the plane, along the normal.
    pub fn normal_distance(&self, p: Vec3<f32>) -> f32 {
        let on_plane = self.project_from_plane(self.project_to_plane(p));
        self.normal().dot(p - on_plane)
    }

    /// Rotate `v` around the axis `u` by `angle` radians, right-handed.
    pub fn rotate_v_around_u(&mut self, angle: f32) {
        let k = self.u.normalized();
        let v = self.v;
        let (sin, cos) = angle.sin_cos();
        self.v = v * cos + k.cross(v) * sin + k * (k.dot(v) * (1.0 - cos));
    }

    /// Move the origin to the point at plane coordinates `uv`.
    pub fn move_origin_to_uv(&mut self, uv: Vec2<f32>) {
        self.origin = self.project_from_plane(uv);
    }

    /// Intersect the ray `pos + dir * t` with the plane. Returns the distance
    /// `t` and the plane coordinates of the hit, or `None` if the ray is
    /// parallel to the plane.
    pub fn ray_intersect(&self, pos: Vec3<f32>, dir: Vec3<f32>) -> Option<(f32, Vec2<f32>)> {
        let normal = self.normal();
        let dn = dir.dot(normal);
        if dn == 0.0 {
            return None;
        }
        let t = (self.origin - pos).dot(normal) / dn;
        Some((t, self.project_to_plane(pos + dir * t)))
    }
}


#[test]
fn test_project_round_trip() {
    let plane = PlaneSubspace::new([1.0, 2.0, 0.5], [2.0, 0.0, 0.0], [0.0, 0.0, 3.0]);
    let p = Vec2::new(0.25, -1.5);
    let back = plane.project_to_plane(plane.project_from_plane(p));
    assert!((back - p).magnitude() < 1e-5);
    assert!(plane.normal_distance(Vec3::new(1.0, 5.0, 0.5)).abs() > 2.9);
}

#[test]
fn test_ray_intersect_ground() {
    let ground = PlaneSubspace::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
    let (t, hit) = ground.ray_intersect(Vec3::new(3.0, 4.0, 10.0), Vec3::new(0.0, 0.0, -1.0)).unwrap();
    assert!((t - 10.0).abs() < 1e-5);
    assert!((hit - Vec2::new(3.0, 4.0)).magnitude() < 1e-5);
    assert!(ground.ray_intersect(Vec3::zero(), Vec3::new(1.0, 0.0, 0.0)).is_none());
}

#[test]
fn test_rotate_v_around_u() {
    let mut plane = PlaneSubspace::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
    plane.rotate_v_around_u(std::f32::consts::FRAC_PI_2);
    assert!((plane.v - Vec3::new(0.0, 0.0, 1.0)).magnitude() < 1e-5);
}
