use crate::gpu::{
    Gpu,
    GpuError,
    ContextTier,
};
use vek::*;


/// The window, canvas, or offscreen surface the renderer presents to.
pub trait BackingSurface {
    /// Size in logical pixels.
    fn size(&self) -> Extent2<u32>;

    /// Device pixels per logical pixel.
    fn pixel_scale(&self) -> f32;

    /// Create a fresh graphics context, replacing any previous one.
    ///
    /// May fall back to a lower tier than requested; callers inspect the
    /// returned context's capabilities.
    fn create_context(&mut self, tier: ContextTier) -> Result<Box<dyn Gpu>, GpuError>;

    /// Size of the default framebuffer in device pixels.
    fn drawing_buffer_size(&self) -> Extent2<u32> {
        let scale = self.pixel_scale();
        self.size().map(|n| ((n as f32 * scale).round() as u32).max(1))
    }
}
