//! Backend abstraction.
//!
//! The frame driver is written against an explicit graphics API shape: a
//! device creating every object, a single submission queue, a swap surface with
//! a ring of backbuffers, CPU descriptor handles for render-target views, a
//! command allocator/list pair and a fence with an OS wait event.
//!
//! Two backends implement it:
//! - [`native`] drives a real GPU through `wgpu`
//! - `null` simulates a GPU in memory and validates usage. It is compiled for
//!   tests and behind the `null` feature.

pub mod native;
#[cfg(any(test, feature = "null"))]
pub mod null;

use thiserror::Error;

/// Failure reported by a backend call.
#[derive(Debug, Error)]
pub enum HalError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("device request failed: {0}")]
    RequestDevice(String),

    #[error("surface is not supported: {0}")]
    UnsupportedSurface(String),

    #[error("backbuffer acquire failed: {0}")]
    Acquire(String),

    #[error("image index {index} out of range for {count} backbuffers")]
    InvalidImageIndex { index: u32, count: u32 },

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("{0}")]
    Backend(String),
}

/// Opaque CPU-side descriptor handle.
///
/// Handles are plain addresses into a backend's descriptor memory. Offsets must
/// be computed with the increment size queried from the device.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct CpuDescriptor {
    pub ptr: usize,
}

impl CpuDescriptor {
    /// Returns the handle `index` slots past `self`.
    #[inline]
    pub fn offset(self, index: u32, increment: usize) -> Self {
        Self {
            ptr: self.ptr + index as usize * increment,
        }
    }
}

/// Usage role of a backbuffer image.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResourceState {
    /// Owned by the presentation engine.
    Present,
    /// Writable as a color attachment.
    RenderTarget,
}

/// Outcome of asking the swap surface for the next backbuffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AcquireStatus {
    /// The current backbuffer can be recorded into and presented.
    Ready,
    /// No backbuffer this iteration: the window has no area, the acquire timed
    /// out or the surface was just reconfigured.
    Skipped,
}

/// Backbuffer pixel format. Only 8-bit-per-channel formats are exposed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceFormat {
    Rgba8Unorm,
    Bgra8Unorm,
}

/// Parameters for device creation.
#[derive(Debug, Clone, Default)]
pub struct DeviceDesc {
    /// Enable the backend validation layer if it is available.
    pub debug_validation: bool,
}

/// Parameters for swap surface creation.
#[derive(Debug, Clone)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    pub format: SurfaceFormat,
}

/// Type family of a backend.
pub trait Api: Sized + 'static {
    type Instance: Instance<Self>;
    type Window: ?Sized;
    type Device: Device<Self>;
    type Queue: Queue<Self>;
    type Surface: Surface<Self>;
    type Image;
    type DescriptorHeap: DescriptorHeap;
    type CommandAllocator: CommandAllocator;
    type CommandList: CommandList<Self>;
    type Fence: Fence<Self>;
    type Event: Event;
}

/// Entry point of a backend; enumerates adapters and creates the device.
pub trait Instance<A: Api> {
    fn create_device(&self, desc: &DeviceDesc) -> Result<A::Device, HalError>;
}

pub trait Device<A: Api> {
    /// Creates the direct (graphics) submission queue.
    fn create_command_queue(&self) -> Result<A::Queue, HalError>;

    fn create_swap_surface(
        &self,
        queue: &A::Queue,
        window: &A::Window,
        desc: &SurfaceDesc,
    ) -> Result<A::Surface, HalError>;

    fn create_rtv_heap(&self, count: u32) -> Result<A::DescriptorHeap, HalError>;

    /// Size in bytes between consecutive render-target descriptors.
    fn rtv_descriptor_size(&self) -> usize;

    /// Writes a render-target view of `image` at `dest`.
    fn create_render_target_view(&self, image: &A::Image, dest: CpuDescriptor);

    fn create_command_allocator(&self) -> Result<A::CommandAllocator, HalError>;

    /// Creates a command list in the recording state.
    fn create_command_list(
        &self,
        allocator: &A::CommandAllocator,
    ) -> Result<A::CommandList, HalError>;

    fn create_fence(&self, initial_value: u64) -> Result<A::Fence, HalError>;

    fn create_event(&self) -> Result<A::Event, HalError>;
}

pub trait Queue<A: Api> {
    /// Submits closed lists; they execute in order after earlier submissions.
    fn execute_command_lists(
        &self,
        lists: &mut [&mut A::CommandList],
    ) -> Result<(), HalError>;

    /// Sets `fence` to `value` once all previously submitted work completes.
    fn signal(&self, fence: &A::Fence, value: u64) -> Result<(), HalError>;
}

pub trait Surface<A: Api> {
    fn buffer_count(&self) -> u32;

    fn format(&self) -> SurfaceFormat;

    fn buffer(&self, index: u32) -> Result<A::Image, HalError>;

    /// Readies the current backbuffer for recording. Must return `Ready`
    /// before a frame targeting it is recorded and presented.
    fn acquire_next_image(&mut self) -> Result<AcquireStatus, HalError>;

    /// Index of the backbuffer the next frame must render into.
    fn current_image_index(&self) -> u32;

    fn present(&mut self, sync_interval: u32) -> Result<(), HalError>;
}

pub trait DescriptorHeap {
    fn cpu_start(&self) -> CpuDescriptor;

    /// Number of descriptor slots.
    fn capacity(&self) -> u32;
}

pub trait CommandAllocator {
    /// Reclaims recording memory. The GPU must be done with every list
    /// recorded from this allocator.
    fn reset(&mut self) -> Result<(), HalError>;
}

pub trait CommandList<A: Api> {
    /// Puts a closed list back into the recording state.
    fn reset(&mut self, allocator: &A::CommandAllocator) -> Result<(), HalError>;

    fn resource_barrier(
        &mut self,
        image: &A::Image,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<(), HalError>;

    fn clear_render_target_view(
        &mut self,
        rtv: CpuDescriptor,
        color: [f32; 4],
    ) -> Result<(), HalError>;

    /// Ends recording; the list becomes submittable.
    fn close(&mut self) -> Result<(), HalError>;

    fn is_recording(&self) -> bool;
}

pub trait Fence<A: Api> {
    fn completed_value(&self) -> u64;

    /// Arms `event` to fire once the fence reaches `value`.
    fn set_event_on_completion(&self, value: u64, event: &A::Event) -> Result<(), HalError>;
}

/// OS-level wait handle.
pub trait Event {
    /// Blocks until the event fires. There is no timeout.
    fn wait(&self) -> Result<(), HalError>;
}
