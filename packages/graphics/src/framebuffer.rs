use crate::gpu::{
    Gpu,
    GpuError,
    FramebufferId,
    TextureId,
    TextureDesc,
    TextureFormat,
    RenderTarget,
};
use vek::*;


/// A color attachment texture and what it was created as.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub texture: TextureId,
    pub format: TextureFormat,
    pub size: Extent2<u32>,
}


/// Offscreen framebuffer whose attachments follow its configuration.
///
/// Set `size` and `color_formats`, then `bind`: missing or mismatched color
/// attachments are (re)created first. Attachment textures can be moved in
/// and out, which lets several owners render through one framebuffer into
/// textures they keep.
#[derive(Debug)]
pub struct Framebuffer {
    pub size: Extent2<u32>,
    pub color_formats: Vec<TextureFormat>,
    pub linear_sample: bool,
    pub depth: bool,
    color: Vec<Option<Attachment>>,
    framebuffer: Option<(FramebufferId, Vec<TextureId>)>,
}

impl Framebuffer {
    pub fn new(color_formats: Vec<TextureFormat>) -> Self {
        Framebuffer {
            size: Extent2::new(1, 1),
            color_formats,
            linear_sample: false,
            depth: true,
            color: Vec::new(),
            framebuffer: None,
        }
    }

    /// Bring attachments in line with the configuration, then bind with the
    /// viewport covering the whole framebuffer.
    pub fn bind(&mut self, gpu: &mut dyn Gpu) -> Result<(), GpuError> {
        self.update_attachments(gpu)?;

        let ids: Vec<TextureId> = self.color.iter()
            .flatten()
            .map(|attachment| attachment.texture)
            .collect();
        let fb = match self.framebuffer {
            Some((fb, ref attached)) if *attached == ids => fb,
            _ => {
                if let Some((old, _)) = self.framebuffer.take() {
                    gpu.delete_framebuffer(old);
                }
                let fb = gpu.create_framebuffer(&ids, self.depth)?;
                self.framebuffer = Some((fb, ids));
                fb
            }
        };
        gpu.bind_target(RenderTarget::Offscreen(fb), self.size);
        Ok(())
    }

    fn update_attachments(&mut self, gpu: &mut dyn Gpu) -> Result<(), GpuError> {
        while self.color.len() > self.color_formats.len() {
            if let Some(Some(attachment)) = self.color.pop() {
                gpu.delete_texture(attachment.texture);
            }
        }
        self.color.resize(self.color_formats.len(), None);

        for (slot, &format) in self.color.iter_mut().zip(&self.color_formats) {
            let matches = slot
                .map(|a| a.format == format && a.size == self.size)
                .unwrap_or(false);
            if matches {
                continue;
            }
            if let Some(old) = slot.take() {
                gpu.delete_texture(old.texture);
            }
            let desc = TextureDesc::attachment(self.size, format, self.linear_sample);
            let texture = gpu.create_texture(&desc)?;
            *slot = Some(Attachment {
                texture,
                format,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Framebuffer handle, if bound at least once.
    pub fn id(&self) -> Option<FramebufferId> {
        self.framebuffer.as_ref().map(|&(fb, _)| fb)
    }

    pub fn color(&self, i: usize) -> Option<TextureId> {
        self.color.get(i).copied().flatten().map(|a| a.texture)
    }

    /// Put a texture into a color slot, returning what was there.
    pub fn set_color(&mut self, i: usize, attachment: Attachment) -> Option<Attachment> {
        if self.color.len() <= i {
            self.color.resize(i + 1, None);
        }
        self.color[i].replace(attachment)
    }

    /// Move a texture out of a color slot.
    pub fn take_color(&mut self, i: usize) -> Option<Attachment> {
        self.color.get_mut(i).and_then(Option::take)
    }

    pub fn dispose(&mut self, gpu: &mut dyn Gpu) {
        for attachment in self.color.drain(..).flatten() {
            gpu.delete_texture(attachment.texture);
        }
        if let Some((fb, _)) = self.framebuffer.take() {
            gpu.delete_framebuffer(fb);
        }
    }
}
