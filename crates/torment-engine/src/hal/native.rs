//! `wgpu` backend.
//!
//! wgpu tracks resource states and swapchain ownership itself, so several
//! explicit operations map onto implicit ones:
//! - acquiring the next image takes the surface texture; the present ->
//!   render-target barrier only checks that it was taken
//! - the render-target -> present barrier records nothing
//! - a clear is an empty render pass with a clear load op
//! - a fence signal is an `on_submitted_work_done` callback and a fence wait
//!   is a blocking device poll
//!
//! wgpu does not expose the swapchain ring, so the current image index counts
//! presents modulo the backbuffer count.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use raw_window_handle::{HasWindowHandle, RawWindowHandle};
use winit::dpi::PhysicalSize;
use winit::window::Window;

use super::{
    AcquireStatus, Api, CpuDescriptor, DeviceDesc, HalError, ResourceState, SurfaceDesc,
    SurfaceFormat,
};

/// Backend marker for wgpu.
#[derive(Debug)]
pub enum Native {}

impl Api for Native {
    type Instance = NativeInstance;
    type Window = Arc<Window>;
    type Device = NativeDevice;
    type Queue = NativeQueue;
    type Surface = NativeSurface;
    type Image = Backbuffer;
    type DescriptorHeap = NativeRtvHeap;
    type CommandAllocator = NativeAllocator;
    type CommandList = NativeCommandList;
    type Fence = NativeFence;
    type Event = NativeEvent;
}

/// Spacing between descriptor handles. Handles only key the view registry.
const RTV_DESCRIPTOR_SIZE: usize = 8;

type ViewRegistry = Rc<RefCell<BTreeMap<usize, Backbuffer>>>;

/// Adapter selection parameters.
#[derive(Debug, Clone)]
pub struct NativeInstance {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
}

impl Default for NativeInstance {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
        }
    }
}

impl super::Instance<Native> for NativeInstance {
    fn create_device(&self, desc: &DeviceDesc) -> Result<NativeDevice, HalError> {
        // Missing validation layers are skipped by wgpu without an error.
        let flags = if desc.debug_validation {
            wgpu::InstanceFlags::DEBUG | wgpu::InstanceFlags::VALIDATION
        } else {
            wgpu::InstanceFlags::empty()
        };

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: self.backends,
            flags,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: self.power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|_| HalError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!("GPU adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("torment device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| HalError::RequestDevice(e.to_string()))?;

        Ok(NativeDevice {
            instance,
            adapter,
            device,
            queue,
            views: Rc::default(),
            next_descriptor: Cell::new(RTV_DESCRIPTOR_SIZE),
        })
    }
}

pub struct NativeDevice {
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    views: ViewRegistry,
    next_descriptor: Cell<usize>,
}

impl NativeDevice {
    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }
}

impl super::Device<Native> for NativeDevice {
    fn create_command_queue(&self) -> Result<NativeQueue, HalError> {
        Ok(NativeQueue {
            queue: self.queue.clone(),
        })
    }

    fn create_swap_surface(
        &self,
        _queue: &NativeQueue,
        window: &Arc<Window>,
        desc: &SurfaceDesc,
    ) -> Result<NativeSurface, HalError> {
        if let Ok(handle) = window.window_handle() {
            log::debug!("binding swap surface to a {} window", platform_name(handle.as_raw()));
        }

        let surface = self
            .instance
            .create_surface(Arc::clone(window))
            .map_err(|e| HalError::UnsupportedSurface(e.to_string()))?;

        if !self.adapter.is_surface_supported(&surface) {
            return Err(HalError::UnsupportedSurface(
                "adapter cannot present to this window".to_string(),
            ));
        }

        let caps = surface.get_capabilities(&self.adapter);
        let format = choose_surface_format(&caps, desc.format).ok_or_else(|| {
            HalError::UnsupportedSurface("no 8-bit RGBA or BGRA surface format".to_string())
        })?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: texture_format(format),
            width: desc.width,
            height: desc.height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: choose_alpha_mode(&caps),
            view_formats: vec![],
            // Frames queued ahead of the one being presented.
            desired_maximum_frame_latency: desc.buffer_count.saturating_sub(1).max(1),
        };

        surface.configure(&self.device, &config);

        Ok(NativeSurface {
            swap: Rc::new(RefCell::new(SwapState {
                surface,
                config,
                device: self.device.clone(),
                window: Arc::clone(window),
                acquired: None,
            })),
            format,
            buffer_count: desc.buffer_count,
            presents: 0,
        })
    }

    fn create_rtv_heap(&self, count: u32) -> Result<NativeRtvHeap, HalError> {
        let start = self.next_descriptor.get();
        self.next_descriptor
            .set(start + count as usize * RTV_DESCRIPTOR_SIZE);

        Ok(NativeRtvHeap {
            views: Rc::clone(&self.views),
            start,
            capacity: count,
        })
    }

    fn rtv_descriptor_size(&self) -> usize {
        RTV_DESCRIPTOR_SIZE
    }

    fn create_render_target_view(&self, image: &Backbuffer, dest: CpuDescriptor) {
        self.views.borrow_mut().insert(dest.ptr, image.clone());
    }

    fn create_command_allocator(&self) -> Result<NativeAllocator, HalError> {
        Ok(NativeAllocator { _private: () })
    }

    fn create_command_list(
        &self,
        _allocator: &NativeAllocator,
    ) -> Result<NativeCommandList, HalError> {
        let mut list = NativeCommandList {
            device: self.device.clone(),
            views: Rc::clone(&self.views),
            encoder: None,
            finished: None,
        };
        list.begin();
        Ok(list)
    }

    fn create_fence(&self, initial_value: u64) -> Result<NativeFence, HalError> {
        Ok(NativeFence {
            completed: Arc::new(AtomicU64::new(initial_value)),
        })
    }

    fn create_event(&self) -> Result<NativeEvent, HalError> {
        Ok(NativeEvent {
            device: self.device.clone(),
            armed: RefCell::new(None),
        })
    }
}

pub struct NativeQueue {
    queue: wgpu::Queue,
}

impl super::Queue<Native> for NativeQueue {
    fn execute_command_lists(
        &self,
        lists: &mut [&mut NativeCommandList],
    ) -> Result<(), HalError> {
        let buffers: Vec<wgpu::CommandBuffer> = lists
            .iter_mut()
            .filter_map(|list| list.finished.take())
            .collect();
        self.queue.submit(buffers);
        Ok(())
    }

    fn signal(&self, fence: &NativeFence, value: u64) -> Result<(), HalError> {
        let completed = Arc::clone(&fence.completed);
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(value, Ordering::AcqRel);
        });
        Ok(())
    }
}

struct Acquired {
    texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

struct SwapState {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    device: wgpu::Device,
    window: Arc<Window>,
    acquired: Option<Acquired>,
}

impl SwapState {
    /// Takes ownership of the next backbuffer from the presentation engine.
    ///
    /// The surface follows the window's current size. Minimized windows,
    /// acquire timeouts and lost surfaces skip the frame instead of failing.
    fn acquire(&mut self) -> Result<AcquireStatus, HalError> {
        if self.acquired.is_some() {
            return Ok(AcquireStatus::Ready);
        }

        let Some((width, height)) = nonzero_extent(self.window.inner_size()) else {
            return Ok(AcquireStatus::Skipped);
        };
        if (width, height) != (self.config.width, self.config.height) {
            self.reconfigure(width, height);
        }

        let texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(err) => {
                return match recovery_for(&err) {
                    AcquireRecovery::Reconfigure => {
                        log::warn!("swap surface {err}; reconfiguring");
                        self.reconfigure(width, height);
                        Ok(AcquireStatus::Skipped)
                    }
                    AcquireRecovery::SkipFrame => {
                        log::debug!("no backbuffer this frame: {err}");
                        Ok(AcquireStatus::Skipped)
                    }
                    AcquireRecovery::Fatal => Err(HalError::OutOfMemory),
                };
            }
        };

        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.acquired = Some(Acquired { texture, view });
        Ok(AcquireStatus::Ready)
    }

    fn reconfigure(&mut self, width: u32, height: u32) {
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        log::debug!("swap surface configured at {width}x{height}");
    }
}

/// Swap surface over a wgpu `Surface`.
///
/// wgpu hides the swapchain ring, so the image index reported here is
/// `presents % buffer_count` and every [`Backbuffer`] aliases the same
/// surface texture. On this backend the render-target table and frame index
/// are bookkeeping; the texture actually rendered is whichever one the last
/// acquire returned.
pub struct NativeSurface {
    swap: Rc<RefCell<SwapState>>,
    format: SurfaceFormat,
    buffer_count: u32,
    presents: u64,
}

impl super::Surface<Native> for NativeSurface {
    fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    fn format(&self) -> SurfaceFormat {
        self.format
    }

    fn buffer(&self, index: u32) -> Result<Backbuffer, HalError> {
        if index >= self.buffer_count {
            return Err(HalError::InvalidImageIndex {
                index,
                count: self.buffer_count,
            });
        }
        Ok(Backbuffer {
            slot: index,
            swap: Rc::clone(&self.swap),
        })
    }

    fn acquire_next_image(&mut self) -> Result<AcquireStatus, HalError> {
        self.swap.borrow_mut().acquire()
    }

    fn current_image_index(&self) -> u32 {
        (self.presents % u64::from(self.buffer_count)) as u32
    }

    /// The vblank interval is fixed by `PresentMode::Fifo` at configure time.
    fn present(&mut self, _sync_interval: u32) -> Result<(), HalError> {
        let mut swap = self.swap.borrow_mut();
        let Some(acquired) = swap.acquired.take() else {
            return Err(HalError::Backend(
                "present without a rendered backbuffer".to_string(),
            ));
        };

        swap.window.pre_present_notify();
        drop(acquired.view);
        acquired.texture.present();

        self.presents += 1;
        Ok(())
    }
}

/// One slot of the swap ring. All slots share the surface's acquired texture.
#[derive(Clone)]
pub struct Backbuffer {
    slot: u32,
    swap: Rc<RefCell<SwapState>>,
}

impl Backbuffer {
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

pub struct NativeRtvHeap {
    views: ViewRegistry,
    start: usize,
    capacity: u32,
}

impl Drop for NativeRtvHeap {
    fn drop(&mut self) {
        let range = self.start..self.start + self.capacity as usize * RTV_DESCRIPTOR_SIZE;
        self.views.borrow_mut().retain(|ptr, _| !range.contains(ptr));
    }
}

impl super::DescriptorHeap for NativeRtvHeap {
    fn cpu_start(&self) -> CpuDescriptor {
        CpuDescriptor { ptr: self.start }
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// wgpu pools encoder memory internally; resets have nothing to reclaim.
pub struct NativeAllocator {
    _private: (),
}

impl super::CommandAllocator for NativeAllocator {
    fn reset(&mut self) -> Result<(), HalError> {
        Ok(())
    }
}

pub struct NativeCommandList {
    device: wgpu::Device,
    views: ViewRegistry,
    encoder: Option<wgpu::CommandEncoder>,
    finished: Option<wgpu::CommandBuffer>,
}

impl NativeCommandList {
    fn begin(&mut self) {
        self.finished = None;
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("torment frame encoder"),
                }),
        );
    }

    fn encoder(&mut self) -> Result<&mut wgpu::CommandEncoder, HalError> {
        self.encoder
            .as_mut()
            .ok_or_else(|| HalError::Backend("command list is closed".to_string()))
    }
}

impl super::CommandList<Native> for NativeCommandList {
    fn reset(&mut self, _allocator: &NativeAllocator) -> Result<(), HalError> {
        self.begin();
        Ok(())
    }

    fn resource_barrier(
        &mut self,
        image: &Backbuffer,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<(), HalError> {
        let acquired = image.swap.borrow().acquired.is_some();
        match (before, after) {
            (ResourceState::Present, ResourceState::RenderTarget) if !acquired => {
                Err(HalError::Acquire(format!(
                    "backbuffer {} recorded before it was acquired",
                    image.slot
                )))
            }
            _ => Ok(()),
        }
    }

    fn clear_render_target_view(
        &mut self,
        rtv: CpuDescriptor,
        color: [f32; 4],
    ) -> Result<(), HalError> {
        let image = self.views.borrow().get(&rtv.ptr).cloned().ok_or_else(|| {
            HalError::Backend(format!("no render-target view at {:#x}", rtv.ptr))
        })?;
        let swap = image.swap.borrow();
        let acquired = swap.acquired.as_ref().ok_or_else(|| {
            HalError::Backend(format!("backbuffer {} cleared before acquire", image.slot))
        })?;

        let [r, g, b, a] = color;
        let encoder = self.encoder()?;
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("torment clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &acquired.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: r as f64,
                        g: g as f64,
                        b: b as f64,
                        a: a as f64,
                    }),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), HalError> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| HalError::Backend("command list closed twice".to_string()))?;
        self.finished = Some(encoder.finish());
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.encoder.is_some()
    }
}

pub struct NativeFence {
    completed: Arc<AtomicU64>,
}

impl super::Fence<Native> for NativeFence {
    fn completed_value(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn set_event_on_completion(&self, value: u64, event: &NativeEvent) -> Result<(), HalError> {
        *event.armed.borrow_mut() = Some((Arc::clone(&self.completed), value));
        Ok(())
    }
}

/// Waits by polling the device until the armed fence value lands.
pub struct NativeEvent {
    device: wgpu::Device,
    armed: RefCell<Option<(Arc<AtomicU64>, u64)>>,
}

impl super::Event for NativeEvent {
    fn wait(&self) -> Result<(), HalError> {
        let Some((completed, value)) = self.armed.borrow_mut().take() else {
            return Ok(());
        };

        while completed.load(Ordering::Acquire) < value {
            self.device
                .poll(wgpu::PollType::wait_indefinitely())
                .map_err(|e| HalError::DeviceLost(e.to_string()))?;
        }
        Ok(())
    }
}

fn texture_format(format: SurfaceFormat) -> wgpu::TextureFormat {
    match format {
        SurfaceFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        SurfaceFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
    }
}

/// Picks the requested 8-bit format, falling back to the other channel order.
fn choose_surface_format(
    caps: &wgpu::SurfaceCapabilities,
    requested: SurfaceFormat,
) -> Option<SurfaceFormat> {
    let fallback = match requested {
        SurfaceFormat::Rgba8Unorm => SurfaceFormat::Bgra8Unorm,
        SurfaceFormat::Bgra8Unorm => SurfaceFormat::Rgba8Unorm,
    };

    [requested, fallback]
        .into_iter()
        .find(|f| caps.formats.contains(&texture_format(*f)))
}

fn choose_alpha_mode(caps: &wgpu::SurfaceCapabilities) -> wgpu::CompositeAlphaMode {
    Some(wgpu::CompositeAlphaMode::Opaque)
        .filter(|m| caps.alpha_modes.contains(m))
        .or_else(|| caps.alpha_modes.first().copied())
        .unwrap_or(wgpu::CompositeAlphaMode::Auto)
}

/// Response to a failed `get_current_texture`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum AcquireRecovery {
    /// Reconfigure the surface and render again next frame.
    Reconfigure,
    SkipFrame,
    Fatal,
}

fn recovery_for(err: &wgpu::SurfaceError) -> AcquireRecovery {
    match err {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => AcquireRecovery::Reconfigure,
        wgpu::SurfaceError::OutOfMemory => AcquireRecovery::Fatal,
        wgpu::SurfaceError::Timeout | wgpu::SurfaceError::Other => AcquireRecovery::SkipFrame,
    }
}

/// `None` while the window has no area to present to (e.g. minimized).
fn nonzero_extent(size: PhysicalSize<u32>) -> Option<(u32, u32)> {
    (size.width > 0 && size.height > 0).then_some((size.width, size.height))
}

fn platform_name(handle: RawWindowHandle) -> &'static str {
    match handle {
        RawWindowHandle::Win32(_) => "Win32",
        RawWindowHandle::Xlib(_) => "Xlib",
        RawWindowHandle::Xcb(_) => "XCB",
        RawWindowHandle::Wayland(_) => "Wayland",
        RawWindowHandle::AppKit(_) => "AppKit",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(formats: &[wgpu::TextureFormat]) -> wgpu::SurfaceCapabilities {
        wgpu::SurfaceCapabilities {
            formats: formats.to_vec(),
            alpha_modes: vec![wgpu::CompositeAlphaMode::Opaque],
            ..Default::default()
        }
    }

    #[test]
    fn rgba_is_preferred_when_offered() {
        let caps = caps(&[
            wgpu::TextureFormat::Bgra8Unorm,
            wgpu::TextureFormat::Rgba8Unorm,
        ]);
        assert_eq!(
            choose_surface_format(&caps, SurfaceFormat::Rgba8Unorm),
            Some(SurfaceFormat::Rgba8Unorm)
        );
    }

    #[test]
    fn bgra_is_the_fallback() {
        let caps = caps(&[
            wgpu::TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm,
        ]);
        assert_eq!(
            choose_surface_format(&caps, SurfaceFormat::Rgba8Unorm),
            Some(SurfaceFormat::Bgra8Unorm)
        );
    }

    #[test]
    fn wide_formats_are_not_accepted() {
        let caps = caps(&[wgpu::TextureFormat::Rgba16Float]);
        assert_eq!(choose_surface_format(&caps, SurfaceFormat::Rgba8Unorm), None);
    }

    #[test]
    fn transient_acquire_failures_skip_the_frame() {
        assert_eq!(
            recovery_for(&wgpu::SurfaceError::Timeout),
            AcquireRecovery::SkipFrame
        );
        assert_eq!(
            recovery_for(&wgpu::SurfaceError::Other),
            AcquireRecovery::SkipFrame
        );
    }

    #[test]
    fn lost_and_outdated_surfaces_are_reconfigured() {
        assert_eq!(
            recovery_for(&wgpu::SurfaceError::Lost),
            AcquireRecovery::Reconfigure
        );
        assert_eq!(
            recovery_for(&wgpu::SurfaceError::Outdated),
            AcquireRecovery::Reconfigure
        );
        assert_eq!(
            recovery_for(&wgpu::SurfaceError::OutOfMemory),
            AcquireRecovery::Fatal
        );
    }

    #[test]
    fn minimized_window_has_no_extent() {
        assert_eq!(nonzero_extent(PhysicalSize::new(0, 0)), None);
        assert_eq!(nonzero_extent(PhysicalSize::new(1280, 0)), None);
        assert_eq!(nonzero_extent(PhysicalSize::new(1280, 720)), Some((1280, 720)));
    }

    #[test]
    fn opaque_alpha_is_preferred() {
        let mut caps = caps(&[wgpu::TextureFormat::Rgba8Unorm]);
        caps.alpha_modes = vec![
            wgpu::CompositeAlphaMode::PreMultiplied,
            wgpu::CompositeAlphaMode::Opaque,
        ];
        assert_eq!(choose_alpha_mode(&caps), wgpu::CompositeAlphaMode::Opaque);

        caps.alpha_modes.clear();
        assert_eq!(choose_alpha_mode(&caps), wgpu::CompositeAlphaMode::Auto);
    }
}
