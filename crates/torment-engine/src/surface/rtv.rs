use crate::device::SetupError;
use crate::hal::{Api, CpuDescriptor, DescriptorHeap, Device, HalError, Surface};

/// Validated backbuffer index, in `[0, buffer_count)`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FrameIndex(u32);

impl FrameIndex {
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }
}

/// A backbuffer image together with its render-target descriptor.
pub struct RenderTarget<'a, A: Api> {
    pub image: &'a A::Image,
    pub rtv: CpuDescriptor,
}

/// One render-target view per backbuffer, indexed by [`FrameIndex`].
pub struct RtvTable<A: Api> {
    images: Box<[A::Image]>,
    handles: Box<[CpuDescriptor]>,
    increment: usize,
    heap: A::DescriptorHeap,
}

impl<A: Api> RtvTable<A> {
    /// Allocates the descriptor heap and binds every backbuffer to its slot.
    ///
    /// Slot `i` lives at `heap start + i * increment`, with the increment
    /// queried from the device.
    pub fn create(device: &A::Device, surface: &A::Surface) -> Result<Self, SetupError> {
        let count = surface.buffer_count();
        let heap = device
            .create_rtv_heap(count)
            .map_err(SetupError::DescriptorHeap)?;
        let increment = device.rtv_descriptor_size();
        let start = heap.cpu_start();

        let mut images = Vec::with_capacity(count as usize);
        let mut handles = Vec::with_capacity(count as usize);
        for i in 0..count {
            let image = surface.buffer(i).map_err(SetupError::Surface)?;
            let handle = start.offset(i, increment);
            device.create_render_target_view(&image, handle);
            images.push(image);
            handles.push(handle);
        }

        log::debug!(
            "render-target views: {count} slots of {increment} bytes at {:#x}",
            start.ptr
        );

        Ok(Self {
            images: images.into_boxed_slice(),
            handles: handles.into_boxed_slice(),
            increment,
            heap,
        })
    }

    pub fn slot_count(&self) -> u32 {
        self.heap.capacity()
    }

    /// Descriptor increment the table was laid out with.
    pub fn increment(&self) -> usize {
        self.increment
    }

    /// Validates a backend-reported image index.
    pub fn frame_index(&self, raw: u32) -> Result<FrameIndex, HalError> {
        let count = self.images.len() as u32;
        if raw >= count {
            return Err(HalError::InvalidImageIndex { index: raw, count });
        }
        Ok(FrameIndex(raw))
    }

    pub fn handle(&self, index: FrameIndex) -> CpuDescriptor {
        self.handles[index.0 as usize]
    }

    pub fn target(&self, index: FrameIndex) -> RenderTarget<'_, A> {
        RenderTarget {
            image: &self.images[index.0 as usize],
            rtv: self.handles[index.0 as usize],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{create_device, create_queue};
    use crate::hal::SurfaceFormat;
    use crate::hal::null::{Null, NullConfig, NullImage, NullInstance};
    use crate::surface::create_surface;
    use crate::window::HeadlessWindow;

    fn table(config: NullConfig, buffer_count: u32) -> RtvTable<Null> {
        let instance = NullInstance::new(config);
        let device = create_device::<Null>(&instance, false).unwrap();
        let queue = create_queue::<Null>(&device).unwrap();
        let window = HeadlessWindow::new(64, 64);
        let surface = create_surface::<Null>(
            &device,
            &queue,
            &window,
            64,
            64,
            buffer_count,
            SurfaceFormat::Rgba8Unorm,
        )
        .unwrap();
        RtvTable::create(&device, &surface).unwrap()
    }

    #[test]
    fn handles_use_the_queried_increment() {
        let config = NullConfig {
            rtv_descriptor_size: 48,
            ..NullConfig::default()
        };
        let table = table(config, 3);

        assert_eq!(table.slot_count(), 3);
        assert_eq!(table.increment(), 48);

        let first = table.handle(table.frame_index(0).unwrap());
        for i in 1..3 {
            let handle = table.handle(table.frame_index(i).unwrap());
            assert_eq!(handle.ptr - first.ptr, i as usize * 48);
        }
    }

    #[test]
    fn targets_pair_image_and_view() {
        let table = table(NullConfig::default(), 2);
        let index = table.frame_index(1).unwrap();
        let target = table.target(index);

        assert_eq!(*target.image, NullImage { slot: 1 });
        assert_eq!(target.rtv, table.handle(index));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let table = table(NullConfig::default(), 2);
        assert!(matches!(
            table.frame_index(2),
            Err(HalError::InvalidImageIndex { index: 2, count: 2 })
        ));
    }
}
