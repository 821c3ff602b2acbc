use crate::config::{Color, DriverConfig};
use crate::device::{self, FrameError, FrameStage, SetupError};
use crate::frame::FrameRecorder;
use crate::hal::{AcquireStatus, Api, Surface};
use crate::surface::{self, FrameIndex, RtvTable};
use crate::sync::FrameFence;

/// What one call to [`GpuContext::render_frame`] did.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameOutcome {
    Presented,
    /// The surface had no backbuffer to give. Nothing was recorded, submitted
    /// or signaled.
    Skipped,
}

/// Every GPU object of the session.
///
/// Built once by [`GpuContext::create`] and passed explicitly; nothing here is
/// global. Fields are declared in reverse creation order, so dropping the
/// context releases the fence event first and the device last.
pub struct GpuContext<A: Api> {
    fence: FrameFence<A>,
    recorder: FrameRecorder<A>,
    rtv_table: RtvTable<A>,
    surface: A::Surface,
    queue: A::Queue,
    device: A::Device,
    frame_index: FrameIndex,
}

impl<A: Api> GpuContext<A> {
    /// Creates device, queue, swap surface, render-target views, the command
    /// allocator/list pair and the fence, in that order.
    pub fn create(
        instance: &A::Instance,
        window: &A::Window,
        width: u32,
        height: u32,
        config: &DriverConfig,
    ) -> Result<Self, SetupError> {
        let device = device::create_device::<A>(instance, config.debug_validation)?;
        let queue = device::create_queue::<A>(&device)?;
        let surface = surface::create_surface::<A>(
            &device,
            &queue,
            window,
            width,
            height,
            config.buffer_count,
            config.format,
        )?;
        let rtv_table = RtvTable::create(&device, &surface)?;
        let recorder = FrameRecorder::new(&device)?;
        let fence = FrameFence::new(&device)?;

        let frame_index = rtv_table
            .frame_index(surface.current_image_index())
            .map_err(SetupError::Surface)?;

        Ok(Self {
            fence,
            recorder,
            rtv_table,
            surface,
            queue,
            device,
            frame_index,
        })
    }

    /// Records, submits and presents one frame, then waits for the GPU.
    pub fn render_frame(
        &mut self,
        clear: Color,
        sync_interval: u32,
    ) -> Result<FrameOutcome, FrameError> {
        let status = self
            .surface
            .acquire_next_image()
            .map_err(FrameError::at(FrameStage::Acquiring))?;
        if status == AcquireStatus::Skipped {
            log::trace!("no backbuffer available, frame skipped");
            return Ok(FrameOutcome::Skipped);
        }

        let target = self.rtv_table.target(self.frame_index);
        self.recorder.record(target, clear)?;

        let raw = self.fence.submit_and_wait(
            &self.queue,
            &mut self.surface,
            &mut [self.recorder.list_mut()],
            sync_interval,
        )?;

        self.frame_index = self
            .rtv_table
            .frame_index(raw)
            .map_err(FrameError::at(FrameStage::QueryingImage))?;

        log::trace!(
            "frame done, fence at {}, next image {}",
            self.fence.completed_value(),
            raw
        );
        Ok(FrameOutcome::Presented)
    }

    /// Signals and waits on the current fence value without new work.
    pub fn drain(&mut self) -> Result<u64, FrameError> {
        self.fence.drain(&self.queue)
    }

    /// Releases every object in reverse creation order.
    pub fn teardown(self) {
        let Self {
            fence,
            recorder,
            rtv_table,
            surface,
            queue,
            device,
            ..
        } = self;

        drop(fence);
        log::debug!("released fence and wait event");
        drop(recorder);
        log::debug!("released command list and allocator");
        drop(rtv_table);
        log::debug!("released render-target views");
        drop(surface);
        log::debug!("released swap surface");
        drop(queue);
        drop(device);
        log::debug!("released queue and device");
    }

    pub fn device(&self) -> &A::Device {
        &self.device
    }

    pub fn queue(&self) -> &A::Queue {
        &self.queue
    }

    pub fn surface(&self) -> &A::Surface {
        &self.surface
    }

    pub fn rtv_table(&self) -> &RtvTable<A> {
        &self.rtv_table
    }

    pub fn recorder(&self) -> &FrameRecorder<A> {
        &self.recorder
    }

    pub fn fence(&self) -> &FrameFence<A> {
        &self.fence
    }

    pub fn frame_index(&self) -> FrameIndex {
        self.frame_index
    }
}
