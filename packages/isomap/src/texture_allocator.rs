//! Slot allocation of tileset textures within texture arrays.
//!
//! On the extended tier, textures of equal size and format share 2D array
//! textures of `TEX_ARRAY_SIZE` layers, and a handle is one layer. On the
//! basic tier every "array" is a plain 2D texture with a single slot. When
//! the GPU runs out of memory, the least recently bound array is evicted and
//! allocation retried. Handles into an evicted array report unavailable and
//! their owners reallocate.

use graphics::{
    Gpu,
    GpuError,
    TextureId,
    TextureDesc,
    TextureFormat,
    Filter,
};
use slab::Slab;
use vek::*;


/// Layers per texture array.
pub const TEX_ARRAY_SIZE: u32 = 8;

pub const TEX_MIP_LEVELS: u32 = 4;

/// Allocation attempts, each after evicting one array, before giving up.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 64;


/// Parameters of one texture to allocate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TextureRequest {
    pub size: Extent2<u32>,
    pub format: TextureFormat,
    pub mag_filter: Filter,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct ArrayKey {
    request: TextureRequest,
    parallel_index: usize,
}

#[derive(Debug)]
struct TextureArray {
    key: ArrayKey,
    texture: TextureId,
    serial: u64,
    /// Id of the handle occupying each slot.
    slots: Vec<Option<u64>>,
    last_used: u64,
}

impl TextureArray {
    fn first_free_slot(&self) -> Option<u32> {
        self.slots.iter().position(Option::is_none).map(|i| i as u32)
    }

    fn is_taken(&self, slot: u32) -> bool {
        self.slots.get(slot as usize).map(Option::is_some).unwrap_or(true)
    }
}


/// One allocated texture slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    array: usize,
    serial: u64,
    id: u64,
    /// Layer within the array. Always 0 on the basic tier.
    pub index: u32,
}


#[derive(Debug)]
pub struct TextureAllocator {
    arrays: Slab<TextureArray>,
    use_arrays: bool,
    next_serial: u64,
    next_handle: u64,
    clock: u64,
}

impl TextureAllocator {
    /// `use_arrays` selects 2D array textures over single 2D textures.
    pub fn new(use_arrays: bool) -> Self {
        TextureAllocator {
            arrays: Slab::new(),
            use_arrays,
            next_serial: 0,
            next_handle: 0,
            clock: 0,
        }
    }

    pub fn num_arrays(&self) -> usize {
        self.arrays.len()
    }

    fn array(&self, handle: &TextureHandle) -> Option<&TextureArray> {
        self.arrays.get(handle.array)
            .filter(|array| array.serial == handle.serial)
            .filter(|array| array.slots.get(handle.index as usize) == Some(&Some(handle.id)))
    }

    /// Whether the handle still refers to a live slot.
    pub fn is_available(&self, handle: &TextureHandle) -> bool {
        self.array(handle).is_some()
    }

    pub fn allocate(
        &mut self,
        gpu: &mut dyn Gpu,
        request: TextureRequest,
    ) -> Result<TextureHandle, GpuError> {
        let mut handles = self.parallel_allocate(gpu, &[request])?;
        Ok(handles.remove(0))
    }

    /// Allocate several textures at once, such that on the extended tier
    /// they're in distinct arrays but at the same layer index.
    pub fn parallel_allocate(
        &mut self,
        gpu: &mut dyn Gpu,
        requests: &[TextureRequest],
    ) -> Result<Vec<TextureHandle>, GpuError> {
        let mut last_err = GpuError::OutOfMemory { what: "texture array" };
        for attempt in 0..MAX_ALLOCATION_ATTEMPTS {
            match self.try_parallel_allocate(gpu, requests) {
                Ok(handles) => return Ok(handles),
                Err(e @ GpuError::OutOfMemory { .. }) => {
                    warn!(attempt, error = %e, "texture allocation failed, evicting oldest array");
                    last_err = e;
                    if !self.delete_oldest_array(gpu) {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    fn try_parallel_allocate(
        &mut self,
        gpu: &mut dyn Gpu,
        requests: &[TextureRequest],
    ) -> Result<Vec<TextureHandle>, GpuError> {
        let mut handles = Vec::with_capacity(requests.len());
        let mut parallel_slot = 0;

        for (i, &request) in requests.iter().enumerate() {
            let key = ArrayKey {
                request,
                parallel_index: if self.use_arrays { i } else { 0 },
            };
            // the first texture picks any free slot, the rest must match it
            let any_slot = i == 0 || !self.use_arrays;

            let found = self.arrays.iter()
                .filter(|(_, array)| array.key == key)
                .find_map(|(array_idx, array)| {
                    if any_slot {
                        array.first_free_slot().map(|slot| (array_idx, slot))
                    } else if !array.is_taken(parallel_slot) {
                        Some((array_idx, parallel_slot))
                    } else {
                        None
                    }
                });

            let (array_idx, slot) = match found {
                Some(found) => found,
                None => match self.create_array(gpu, key) {
                    Ok(array_idx) => (array_idx, if any_slot { 0 } else { parallel_slot }),
                    Err(e) => {
                        for handle in handles {
                            self.free(&handle);
                        }
                        return Err(e);
                    }
                },
            };
            if i == 0 {
                parallel_slot = slot;
            }
            handles.push(self.take_slot(array_idx, slot));
        }
        Ok(handles)
    }

    fn create_array(&mut self, gpu: &mut dyn Gpu, key: ArrayKey) -> Result<usize, GpuError> {
        let layers = if self.use_arrays { TEX_ARRAY_SIZE } else { 1 };
        let texture = gpu.create_texture(&TextureDesc {
            size: key.request.size,
            layers: if self.use_arrays { Some(layers) } else { None },
            format: key.request.format,
            mip_levels: TEX_MIP_LEVELS,
            min_filter: Filter::LinearMipmap,
            mag_filter: key.request.mag_filter,
        })?;
        let serial = self.next_serial;
        self.next_serial += 1;
        trace!(?key, serial, "created texture array");
        Ok(self.arrays.insert(TextureArray {
            key,
            texture,
            serial,
            slots: vec![None; layers as usize],
            last_used: self.clock,
        }))
    }

    fn take_slot(&mut self, array_idx: usize, slot: u32) -> TextureHandle {
        let id = self.next_handle;
        self.next_handle += 1;
        let array = &mut self.arrays[array_idx];
        array.slots[slot as usize] = Some(id);
        TextureHandle {
            array: array_idx,
            serial: array.serial,
            id,
            index: slot,
        }
    }

    /// Release a handle's slot. No-op if it's no longer available.
    pub fn free(&mut self, handle: &TextureHandle) {
        if self.is_available(handle) {
            self.arrays[handle.array].slots[handle.index as usize] = None;
        }
    }

    /// Upload RGBA8 pixels into a handle's slot and regenerate mipmaps.
    pub fn upload(
        &mut self,
        gpu: &mut dyn Gpu,
        handle: &TextureHandle,
        pixels: &[u8],
    ) -> Result<(), GpuError> {
        let texture = self.array(handle)
            .ok_or(GpuError::OutOfMemory { what: "evicted texture" })?
            .texture;
        gpu.upload_texture(texture, handle.index, pixels);
        gpu.generate_mipmaps(texture);
        Ok(())
    }

    /// The texture holding a handle's slot, marking its array as used.
    pub fn touch(&mut self, handle: &TextureHandle) -> Option<TextureId> {
        if !self.is_available(handle) {
            return None;
        }
        self.clock += 1;
        let array = &mut self.arrays[handle.array];
        array.last_used = self.clock;
        Some(array.texture)
    }

    /// Delete arrays with no occupied slots.
    pub fn delete_unused_arrays(&mut self, gpu: &mut dyn Gpu) {
        let unused: Vec<usize> = self.arrays.iter()
            .filter(|(_, array)| array.slots.iter().all(Option::is_none))
            .map(|(idx, _)| idx)
            .collect();
        for idx in unused {
            let array = self.arrays.remove(idx);
            gpu.delete_texture(array.texture);
        }
    }

    /// Delete the least recently used array. Returns false if there were
    /// none.
    pub fn delete_oldest_array(&mut self, gpu: &mut dyn Gpu) -> bool {
        let oldest = self.arrays.iter()
            .min_by_key(|(_, array)| array.last_used)
            .map(|(idx, _)| idx);
        match oldest {
            Some(idx) => {
                let array = self.arrays.remove(idx);
                debug!(key = ?array.key, "evicted texture array");
                gpu.delete_texture(array.texture);
                true
            }
            None => false,
        }
    }

    pub fn dispose(&mut self, gpu: &mut dyn Gpu) {
        for array in self.arrays.drain() {
            gpu.delete_texture(array.texture);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use graphics::{
        HeadlessGpu,
        HeadlessConfig,
        CommandLog,
    };

    fn request(format: TextureFormat) -> TextureRequest {
        TextureRequest {
            size: Extent2::new(64, 64),
            format,
            mag_filter: Filter::Nearest,
        }
    }

    #[test]
    fn test_parallel_allocate_same_index() {
        let mut gpu = HeadlessGpu::new(HeadlessConfig::extended(), CommandLog::new());
        let mut alloc = TextureAllocator::new(true);
        let req = [request(TextureFormat::Rgba8); 3];

        let a = alloc.parallel_allocate(&mut gpu, &req).unwrap();
        let b = alloc.parallel_allocate(&mut gpu, &req).unwrap();
        assert_eq!(alloc.num_arrays(), 3);
        assert!(a.iter().all(|h| h.index == a[0].index));
        assert!(b.iter().all(|h| h.index == b[0].index));
        assert_ne!(a[0].index, b[0].index);

        alloc.free(&a[1]);
        assert!(!alloc.is_available(&a[1]));
        assert!(alloc.is_available(&a[0]));
    }

    #[test]
    fn test_basic_tier_one_texture_per_slot() {
        let mut gpu = HeadlessGpu::new(HeadlessConfig::basic(), CommandLog::new());
        let mut alloc = TextureAllocator::new(false);
        let handles = alloc.parallel_allocate(&mut gpu, &[request(TextureFormat::Rgba8); 3]).unwrap();
        assert_eq!(alloc.num_arrays(), 3);
        assert!(handles.iter().all(|h| h.index == 0));
        alloc.free(&handles[2]);
        alloc.delete_unused_arrays(&mut gpu);
        assert_eq!(alloc.num_arrays(), 2);
        assert_eq!(gpu.log().live_textures(), 2);
    }

    #[test]
    fn test_exhaustion_evicts_least_recently_used() {
        let mut config = HeadlessConfig::basic();
        config.max_textures = Some(2);
        let mut gpu = HeadlessGpu::new(config, CommandLog::new());
        let mut alloc = TextureAllocator::new(false);

        let a = alloc.allocate(&mut gpu, request(TextureFormat::Rgba8)).unwrap();
        let b = alloc.allocate(&mut gpu, request(TextureFormat::Rgba8)).unwrap();
        // a was bound more recently than b
        alloc.touch(&b);
        alloc.touch(&a);

        let c = alloc.allocate(&mut gpu, request(TextureFormat::Rgba8)).unwrap();
        assert!(alloc.is_available(&a));
        assert!(!alloc.is_available(&b));
        assert!(alloc.is_available(&c));
        assert!(alloc.touch(&b).is_none());
    }

    #[test]
    fn test_exhaustion_without_anything_to_evict() {
        let mut config = HeadlessConfig::basic();
        config.max_textures = Some(0);
        let mut gpu = HeadlessGpu::new(config, CommandLog::new());
        let mut alloc = TextureAllocator::new(false);
        let err = alloc.allocate(&mut gpu, request(TextureFormat::Rgba8)).unwrap_err();
        assert!(matches!(err, GpuError::OutOfMemory { .. }));
    }
}
