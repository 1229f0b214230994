use crate::camera::Camera;
use std::time::{
    Duration,
    Instant,
};
use vek::*;


/// Ephemeral per-frame data. Created once per frame, never persisted.
#[derive(Debug, Clone)]
pub struct FrameContext<'a> {
    pub proj: Mat4<f32>,
    pub view: Mat4<f32>,
    /// Viewport size in logical pixels.
    pub viewport: Extent2<f32>,
    /// Device pixels per logical pixel.
    pub pixel_scale: f32,
    pub camera: &'a Camera,
    /// Animation time in seconds, accumulated from capped frame deltas.
    pub time: f64,
    /// Wall-clock time of the frame, for time budgets and idle tracking.
    pub now: Instant,
}

impl<'a> FrameContext<'a> {
    pub fn new(
        camera: &'a Camera,
        viewport: Extent2<f32>,
        pixel_scale: f32,
        time: f64,
        now: Instant,
    ) -> Self {
        FrameContext {
            proj: camera.projection(viewport),
            view: camera.view(),
            viewport,
            pixel_scale,
            camera,
            time,
            now,
        }
    }

    /// Where the center of the screen looks at the ground plane.
    pub fn look_at_ground(&self) -> Option<Vec2<f32>> {
        self.camera
            .ground_point(self.viewport, Vec2::zero(), 0.0)
            .map(|p| p.xy())
    }
}


/// Wall-clock budget for deferrable work within one frame.
#[derive(Debug, Copy, Clone)]
pub struct TimeBudget {
    start: Instant,
    budget: Duration,
}

impl TimeBudget {
    pub fn start(budget: Duration) -> Self {
        TimeBudget {
            start: Instant::now(),
            budget,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.start.elapsed() >= self.budget
    }
}
