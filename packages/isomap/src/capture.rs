//! High dynamic range frame export.

use std::path::Path;
use anyhow::*;
use std::result::Result::Ok;
use image::{
    DynamicImage,
    ImageFormat,
    Rgba32FImage,
};
use vek::*;


/// Raw float RGBA pixels of a rendered frame, as read back from the
/// composite target. Rows run bottom to top.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    /// Size in device pixels.
    pub size: Extent2<u32>,
    pub pixels: Vec<f32>,
}

impl Capture {
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<f32>> {
        if x >= self.size.w || y >= self.size.h {
            return None;
        }
        let i = (y * self.size.w + x) as usize * 4;
        self.pixels.get(i..i + 4).map(|p| Rgba::new(p[0], p[1], p[2], p[3]))
    }

    /// Convert to an image with the top row first.
    pub fn to_image(&self) -> Result<Rgba32FImage> {
        let row_len = self.size.w as usize * 4;
        ensure!(
            self.pixels.len() == row_len * self.size.h as usize,
            "capture of {}x{} has {} components",
            self.size.w,
            self.size.h,
            self.pixels.len(),
        );
        let flipped = self.pixels
            .chunks_exact(row_len.max(1))
            .rev()
            .flatten()
            .copied()
            .collect();
        Rgba32FImage::from_raw(self.size.w, self.size.h, flipped)
            .ok_or_else(|| anyhow!("capture buffer does not fit its size"))
    }

    /// Write an OpenEXR file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let image = DynamicImage::ImageRgba32F(self.to_image()?);
        image.save_with_format(path, ImageFormat::OpenExr)
            .with_context(|| format!("writing capture to {}", path.display()))?;
        info!(path = %path.display(), size = ?self.size, "saved capture");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_image_flips_rows() {
        let capture = Capture {
            size: Extent2::new(1, 2),
            pixels: vec![
                0.0, 0.0, 0.0, 1.0,
                4.5, 2.0, 1.0, 1.0,
            ],
        };
        assert_eq!(capture.pixel(0, 1), Some(Rgba::new(4.5, 2.0, 1.0, 1.0)));
        assert_eq!(capture.pixel(1, 0), None);

        let image = capture.to_image().unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [4.5, 2.0, 1.0, 1.0]);
        assert_eq!(image.get_pixel(0, 1).0, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_mismatched_buffer() {
        let capture = Capture {
            size: Extent2::new(2, 2),
            pixels: vec![0.0; 4],
        };
        assert!(capture.to_image().is_err());
    }
}
