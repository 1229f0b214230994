use mesh_data::PlaneSubspace;
use vek::*;


/// Camera with a projection blended between orthographic and perspective.
///
/// Looks down its local -z axis with +y up, rotated by `rotation` and placed
/// at `position`. The blend is elementwise over the two projection matrices,
/// not a hard switch.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3<f32>,
    pub rotation: Quaternion<f32>,
    /// Vertical field of view of the perspective projection, in radians.
    pub fov: f32,
    pub ortho_scale: f32,
    pub clip_near: f32,
    pub clip_far: f32,
    /// Flip screen-space y, so that +y points down on screen.
    pub invert_y: bool,
    perspective: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Camera {
            position: Vec3::zero(),
            rotation: Quaternion::identity(),
            fov: std::f32::consts::FRAC_PI_3,
            ortho_scale: 0.25,
            clip_near: 0.1,
            clip_far: 200.0,
            invert_y: true,
            perspective: 0.0,
        }
    }
}

/// A ray in world space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3<f32>,
    pub dir: Vec3<f32>,
}

fn blend(a: Mat4<f32>, b: Mat4<f32>, t: f32) -> Mat4<f32> {
    let a = a.into_col_array();
    let b = b.into_col_array();
    let mut out = [0.0; 16];
    for i in 0..16 {
        out[i] = a[i] * (1.0 - t) + b[i] * t;
    }
    Mat4::from_col_array(out)
}

impl Camera {
    /// Blend factor between orthographic (0) and perspective (1).
    pub fn perspective(&self) -> f32 {
        self.perspective
    }

    /// Set the perspective blend factor, clamped to `[0, 1]`.
    pub fn set_perspective(&mut self, perspective: f32) {
        self.perspective = perspective.clamp(0.0, 1.0);
    }

    /// Pixels per world unit of the orthographic projection.
    pub fn actual_ortho_scale(&self) -> f32 {
        128.0 * self.ortho_scale
    }

    /// Projection matrix for a viewport of the given size in logical pixels.
    pub fn projection(&self, viewport: Extent2<f32>) -> Mat4<f32> {
        let scale = self.actual_ortho_scale();
        let ortho = Mat4::orthographic_rh_no(FrustumPlanes {
            left: -viewport.w / scale,
            right: viewport.w / scale,
            bottom: -viewport.h / scale,
            top: viewport.h / scale,
            near: self.clip_near,
            far: self.clip_far,
        });
        let persp = Mat4::perspective_rh_no(
            self.fov,
            viewport.w / viewport.h,
            self.clip_near,
            self.clip_far,
        );
        let proj = blend(ortho, persp, self.perspective);
        if self.invert_y {
            Mat4::<f32>::scaling_3d(Vec3::new(1.0, -1.0, 1.0)) * proj
        } else {
            proj
        }
    }

    /// Camera-to-world transform.
    pub fn world_transform(&self) -> Mat4<f32> {
        Mat4::<f32>::translation_3d(self.position) * Mat4::from(self.rotation)
    }

    /// World-to-camera transform.
    pub fn view(&self) -> Mat4<f32> {
        self.world_transform().inverted()
    }

    /// Ray through a point in clip space (`[-1, 1]` on both axes), in camera
    /// space.
    fn view_space_ray(&self, viewport: Extent2<f32>, clip: Vec2<f32>) -> Ray {
        let scale = self.actual_ortho_scale();
        let y_sign = if self.invert_y { -1.0 } else { 1.0 };

        let ortho_origin = Vec3::new(
            clip.x * viewport.w / scale,
            y_sign * clip.y * viewport.h / scale,
            -1.0,
        );
        let ortho_dir = Vec3::new(0.0, 0.0, -1.0);

        let half_y = (self.fov / 2.0).tan();
        let half_x = half_y * viewport.w / viewport.h;
        let persp_origin = Vec3::new(0.0, 0.0, -1.0);
        let persp_dir = Vec3::new(
            clip.x * half_x,
            y_sign * clip.y * half_y,
            -1.0,
        ).normalized();

        let t = self.perspective;
        Ray {
            origin: ortho_origin * (1.0 - t) + persp_origin * t,
            dir: ortho_dir * (1.0 - t) + persp_dir * t,
        }
    }

    /// World-space ray through a point in clip space.
    pub fn projection_ray(&self, viewport: Extent2<f32>, clip: Vec2<f32>) -> Ray {
        let ray = self.view_space_ray(viewport, clip);
        let m = self.world_transform();
        let origin = (m * Vec4::from_point(ray.origin)).xyz();
        let towards = (m * Vec4::from_point(ray.origin + ray.dir)).xyz();
        Ray {
            origin,
            dir: towards - origin,
        }
    }

    /// Where the ray through a clip-space point hits the horizontal plane at
    /// height `z`, or `None` if the ray is parallel to it.
    pub fn ground_point(&self, viewport: Extent2<f32>, clip: Vec2<f32>, z: f32) -> Option<Vec3<f32>> {
        let plane = PlaneSubspace::new([0.0, 0.0, z], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        let ray = self.projection_ray(viewport, clip);
        let (_, hit) = plane.ray_intersect(ray.origin, ray.dir)?;
        Some(Vec3::new(hit.x, hit.y, z))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn top_down() -> Camera {
        Camera {
            position: Vec3::new(12.0, 12.0, 10.0),
            ..Camera::default()
        }
    }

    #[test]
    fn test_perspective_clamped() {
        let mut camera = Camera::default();
        camera.set_perspective(1.5);
        assert_eq!(camera.perspective(), 1.0);
        camera.set_perspective(-0.5);
        assert_eq!(camera.perspective(), 0.0);
    }

    #[test]
    fn test_ortho_ground_point_matches_projection() {
        let camera = top_down();
        let viewport = Extent2::new(64.0, 64.0);
        let hit = camera.ground_point(viewport, Vec2::new(1.0, 1.0), 0.0).unwrap();

        // project the hit back and expect the same clip-space point
        let clip = camera.projection(viewport) * camera.view() * Vec4::from_point(hit);
        let ndc = clip.xy() / clip.w;
        assert!((ndc - Vec2::new(1.0, 1.0)).magnitude() < 1e-4, "{:?}", ndc);
        assert!((hit.x - 14.0).abs() < 1e-4);
    }

    #[test]
    fn test_center_ray_hits_below_camera() {
        let mut camera = top_down();
        camera.set_perspective(1.0);
        let hit = camera.ground_point(Extent2::new(100.0, 50.0), Vec2::zero(), 0.0).unwrap();
        assert!((hit - Vec3::new(12.0, 12.0, 0.0)).magnitude() < 1e-4);
    }
}
