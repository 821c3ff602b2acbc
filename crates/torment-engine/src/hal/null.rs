//! Headless GPU simulator.
//!
//! Every object shares one in-memory GPU model. Submitted work is queued and
//! executed in order, either as soon as it is queued or only while the CPU is
//! blocked on a fence event (see [`Execution`]). Usage errors that a validation
//! layer would report on a real device panic here.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use super::{
    AcquireStatus, Api, CpuDescriptor, DeviceDesc, HalError, ResourceState, SurfaceDesc, SurfaceFormat,
};
use crate::window::HeadlessWindow;

/// Backend marker for the simulator.
#[derive(Debug)]
pub enum Null {}

impl Api for Null {
    type Instance = NullInstance;
    type Window = HeadlessWindow;
    type Device = NullDevice;
    type Queue = NullQueue;
    type Surface = NullSurface;
    type Image = NullImage;
    type DescriptorHeap = NullHeap;
    type CommandAllocator = NullAllocator;
    type CommandList = NullCommandList;
    type Fence = NullFence;
    type Event = NullEvent;
}

/// When queued GPU work runs.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Execution {
    /// Work completes as soon as it is queued; fence waits never block.
    Immediate,
    /// Work runs only while the CPU waits on an event.
    Deferred,
}

#[derive(Debug, Clone)]
pub struct NullConfig {
    pub execution: Execution,
    /// Backbuffer the presentation engine hands out first.
    pub initial_image_index: u32,
    pub rtv_descriptor_size: usize,
    /// Makes device creation fail as if no adapter were present.
    pub fail_device_creation: bool,
}

impl Default for NullConfig {
    fn default() -> Self {
        Self {
            execution: Execution::Deferred,
            initial_image_index: 0,
            rtv_descriptor_size: 32,
            fail_device_creation: false,
        }
    }
}

/// A command as the simulated GPU executed it.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier {
        image: u32,
        before: ResourceState,
        after: ResourceState,
    },
    Clear {
        image: u32,
        color: [f32; 4],
    },
}

enum Op {
    Execute { allocator: u32, commands: Vec<Command> },
    Present { image: u32 },
    Signal { fence: usize, value: u64 },
}

#[derive(Debug, Clone)]
struct ImageSlot {
    state: ResourceState,
    contents: Option<[f32; 4]>,
}

const DESCRIPTOR_BASE: usize = 0x1000;

#[derive(Default)]
struct Gpu {
    debug_validation: bool,
    pending: VecDeque<Op>,
    fences: Vec<u64>,
    images: Vec<ImageSlot>,
    current_image: u32,
    acquired: bool,
    skip_acquires: u32,
    skipped_acquires: u64,
    presents: u64,
    next_descriptor: usize,
    heaps: Vec<(usize, u32)>,
    views: BTreeMap<usize, u32>,
    busy_allocators: HashMap<u32, usize>,
    next_allocator: u32,
    executed: Vec<Command>,
    events_created: usize,
    events_released: usize,
    blocking_waits: usize,
    released: Vec<&'static str>,
}

impl Gpu {
    fn run(&mut self, op: Op) {
        match op {
            Op::Execute {
                allocator,
                commands,
            } => {
                for command in commands {
                    self.apply(&command);
                    self.executed.push(command);
                }
                if let Some(busy) = self.busy_allocators.get_mut(&allocator) {
                    *busy -= 1;
                }
            }
            Op::Present { image } => {
                let state = self.images[image as usize].state;
                assert_eq!(
                    state,
                    ResourceState::Present,
                    "backbuffer {image} presented while in {state:?}"
                );
            }
            Op::Signal { fence, value } => {
                let completed = &mut self.fences[fence];
                *completed = (*completed).max(value);
            }
        }
    }

    fn apply(&mut self, command: &Command) {
        match *command {
            Command::Barrier {
                image,
                before,
                after,
            } => {
                let slot = &mut self.images[image as usize];
                assert_eq!(
                    slot.state, before,
                    "barrier on backbuffer {image} expects {before:?} but the resource is in {:?}",
                    slot.state
                );
                slot.state = after;
            }
            Command::Clear { image, color } => {
                let slot = &mut self.images[image as usize];
                assert_eq!(
                    slot.state,
                    ResourceState::RenderTarget,
                    "backbuffer {image} cleared outside the render-target state"
                );
                slot.contents = Some(color);
            }
        }
    }

    fn flush(&mut self) {
        while let Some(op) = self.pending.pop_front() {
            self.run(op);
        }
    }

    fn heap_of(&self, ptr: usize, increment: usize) -> Option<(usize, u32)> {
        self.heaps
            .iter()
            .copied()
            .find(|&(start, count)| ptr >= start && ptr < start + count as usize * increment)
    }
}

struct Shared {
    config: NullConfig,
    gpu: RefCell<Gpu>,
}

impl Shared {
    fn enqueue(&self, op: Op) {
        let mut gpu = self.gpu.borrow_mut();
        gpu.pending.push_back(op);
        if self.config.execution == Execution::Immediate {
            gpu.flush();
        }
    }

    fn release(&self, name: &'static str) {
        self.gpu.borrow_mut().released.push(name);
    }
}

pub struct NullInstance {
    shared: Rc<Shared>,
}

impl NullInstance {
    pub fn new(config: NullConfig) -> Self {
        let gpu = Gpu {
            next_descriptor: DESCRIPTOR_BASE,
            ..Gpu::default()
        };
        Self {
            shared: Rc::new(Shared {
                config,
                gpu: RefCell::new(gpu),
            }),
        }
    }

    /// Inspection handle onto the simulated GPU.
    pub fn probe(&self) -> NullProbe {
        NullProbe {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl Default for NullInstance {
    fn default() -> Self {
        Self::new(NullConfig::default())
    }
}

impl super::Instance<Null> for NullInstance {
    fn create_device(&self, desc: &DeviceDesc) -> Result<NullDevice, HalError> {
        if self.shared.config.fail_device_creation {
            return Err(HalError::NoAdapter);
        }
        self.shared.gpu.borrow_mut().debug_validation = desc.debug_validation;
        Ok(NullDevice {
            shared: Rc::clone(&self.shared),
        })
    }
}

pub struct NullDevice {
    shared: Rc<Shared>,
}

impl fmt::Debug for NullDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NullDevice")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl Drop for NullDevice {
    fn drop(&mut self) {
        self.shared.release("device");
    }
}

impl super::Device<Null> for NullDevice {
    fn create_command_queue(&self) -> Result<NullQueue, HalError> {
        Ok(NullQueue {
            shared: Rc::clone(&self.shared),
        })
    }

    fn create_swap_surface(
        &self,
        _queue: &NullQueue,
        _window: &HeadlessWindow,
        desc: &SurfaceDesc,
    ) -> Result<NullSurface, HalError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(HalError::UnsupportedSurface(format!(
                "{}x{} surface",
                desc.width, desc.height
            )));
        }
        if desc.buffer_count == 0 {
            return Err(HalError::UnsupportedSurface("zero backbuffers".to_string()));
        }

        let mut gpu = self.shared.gpu.borrow_mut();
        let slot = ImageSlot {
            state: ResourceState::Present,
            contents: None,
        };
        gpu.images = vec![slot; desc.buffer_count as usize];
        gpu.current_image = self.shared.config.initial_image_index % desc.buffer_count;

        Ok(NullSurface {
            shared: Rc::clone(&self.shared),
            buffer_count: desc.buffer_count,
            format: desc.format,
        })
    }

    fn create_rtv_heap(&self, count: u32) -> Result<NullHeap, HalError> {
        let increment = self.rtv_descriptor_size();
        let mut gpu = self.shared.gpu.borrow_mut();
        let start = gpu.next_descriptor;
        // Leave one unused slot between heaps so overruns land nowhere.
        gpu.next_descriptor += (count as usize + 1) * increment;
        gpu.heaps.push((start, count));

        Ok(NullHeap {
            shared: Rc::clone(&self.shared),
            start,
            capacity: count,
        })
    }

    fn rtv_descriptor_size(&self) -> usize {
        self.shared.config.rtv_descriptor_size
    }

    fn create_render_target_view(&self, image: &NullImage, dest: CpuDescriptor) {
        let increment = self.rtv_descriptor_size();
        let mut gpu = self.shared.gpu.borrow_mut();
        let Some((start, _)) = gpu.heap_of(dest.ptr, increment) else {
            panic!("descriptor {:#x} lies outside every descriptor heap", dest.ptr);
        };
        assert_eq!(
            (dest.ptr - start) % increment,
            0,
            "descriptor {:#x} is not aligned to the {increment}-byte increment",
            dest.ptr
        );
        gpu.views.insert(dest.ptr, image.slot);
    }

    fn create_command_allocator(&self) -> Result<NullAllocator, HalError> {
        let mut gpu = self.shared.gpu.borrow_mut();
        let id = gpu.next_allocator;
        gpu.next_allocator += 1;
        gpu.busy_allocators.insert(id, 0);

        Ok(NullAllocator {
            shared: Rc::clone(&self.shared),
            id,
        })
    }

    fn create_command_list(&self, allocator: &NullAllocator) -> Result<NullCommandList, HalError> {
        Ok(NullCommandList {
            shared: Rc::clone(&self.shared),
            allocator: allocator.id,
            commands: Vec::new(),
            recording: true,
        })
    }

    fn create_fence(&self, initial_value: u64) -> Result<NullFence, HalError> {
        let mut gpu = self.shared.gpu.borrow_mut();
        gpu.fences.push(initial_value);

        Ok(NullFence {
            shared: Rc::clone(&self.shared),
            id: gpu.fences.len() - 1,
        })
    }

    fn create_event(&self) -> Result<NullEvent, HalError> {
        self.shared.gpu.borrow_mut().events_created += 1;
        Ok(NullEvent {
            shared: Rc::clone(&self.shared),
            armed: Cell::new(None),
        })
    }
}

pub struct NullQueue {
    shared: Rc<Shared>,
}

impl Drop for NullQueue {
    fn drop(&mut self) {
        self.shared.release("queue");
    }
}

impl super::Queue<Null> for NullQueue {
    fn execute_command_lists(&self, lists: &mut [&mut NullCommandList]) -> Result<(), HalError> {
        for list in lists.iter() {
            assert!(!list.recording, "executed a command list that is still recording");
            *self
                .shared
                .gpu
                .borrow_mut()
                .busy_allocators
                .entry(list.allocator)
                .or_default() += 1;
            self.shared.enqueue(Op::Execute {
                allocator: list.allocator,
                commands: list.commands.clone(),
            });
        }
        Ok(())
    }

    fn signal(&self, fence: &NullFence, value: u64) -> Result<(), HalError> {
        self.shared.enqueue(Op::Signal {
            fence: fence.id,
            value,
        });
        Ok(())
    }
}

pub struct NullSurface {
    shared: Rc<Shared>,
    buffer_count: u32,
    format: SurfaceFormat,
}

impl fmt::Debug for NullSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NullSurface")
            .field("buffer_count", &self.buffer_count)
            .field("format", &self.format)
            .field("current_image", &self.shared.gpu.borrow().current_image)
            .finish_non_exhaustive()
    }
}

impl Drop for NullSurface {
    fn drop(&mut self) {
        self.shared.release("surface");
    }
}

impl super::Surface<Null> for NullSurface {
    fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    fn format(&self) -> SurfaceFormat {
        self.format
    }

    fn buffer(&self, index: u32) -> Result<NullImage, HalError> {
        if index >= self.buffer_count {
            return Err(HalError::InvalidImageIndex {
                index,
                count: self.buffer_count,
            });
        }
        Ok(NullImage { slot: index })
    }

    fn acquire_next_image(&mut self) -> Result<AcquireStatus, HalError> {
        let mut gpu = self.shared.gpu.borrow_mut();
        if gpu.skip_acquires > 0 {
            gpu.skip_acquires -= 1;
            gpu.skipped_acquires += 1;
            return Ok(AcquireStatus::Skipped);
        }
        gpu.acquired = true;
        Ok(AcquireStatus::Ready)
    }

    fn current_image_index(&self) -> u32 {
        self.shared.gpu.borrow().current_image
    }

    fn present(&mut self, _sync_interval: u32) -> Result<(), HalError> {
        let image = {
            let mut gpu = self.shared.gpu.borrow_mut();
            let image = gpu.current_image;
            assert!(
                gpu.acquired,
                "backbuffer {image} presented without being acquired"
            );
            gpu.acquired = false;
            gpu.current_image = (image + 1) % self.buffer_count;
            gpu.presents += 1;
            image
        };
        self.shared.enqueue(Op::Present { image });
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct NullImage {
    pub slot: u32,
}

pub struct NullHeap {
    shared: Rc<Shared>,
    start: usize,
    capacity: u32,
}

impl Drop for NullHeap {
    fn drop(&mut self) {
        let increment = self.shared.config.rtv_descriptor_size;
        let end = self.start + self.capacity as usize * increment;
        let mut gpu = self.shared.gpu.borrow_mut();
        gpu.views.retain(|ptr, _| !(self.start..end).contains(ptr));
        gpu.heaps.retain(|&(start, _)| start != self.start);
        gpu.released.push("descriptor heap");
    }
}

impl super::DescriptorHeap for NullHeap {
    fn cpu_start(&self) -> CpuDescriptor {
        CpuDescriptor { ptr: self.start }
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }
}

pub struct NullAllocator {
    shared: Rc<Shared>,
    id: u32,
}

impl Drop for NullAllocator {
    fn drop(&mut self) {
        self.shared.release("command allocator");
    }
}

impl super::CommandAllocator for NullAllocator {
    fn reset(&mut self) -> Result<(), HalError> {
        let busy = self
            .shared
            .gpu
            .borrow()
            .busy_allocators
            .get(&self.id)
            .copied()
            .unwrap_or(0);
        assert_eq!(
            busy, 0,
            "command allocator reset while the GPU still executes {busy} list(s) recorded from it"
        );
        Ok(())
    }
}

pub struct NullCommandList {
    shared: Rc<Shared>,
    allocator: u32,
    commands: Vec<Command>,
    recording: bool,
}

impl NullCommandList {
    /// Commands recorded since the last reset.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

impl Drop for NullCommandList {
    fn drop(&mut self) {
        self.shared.release("command list");
    }
}

impl super::CommandList<Null> for NullCommandList {
    fn reset(&mut self, allocator: &NullAllocator) -> Result<(), HalError> {
        assert!(!self.recording, "reset of a command list that is still recording");
        self.allocator = allocator.id;
        self.commands.clear();
        self.recording = true;
        Ok(())
    }

    fn resource_barrier(
        &mut self,
        image: &NullImage,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<(), HalError> {
        assert!(self.recording, "barrier recorded into a closed command list");
        self.commands.push(Command::Barrier {
            image: image.slot,
            before,
            after,
        });
        Ok(())
    }

    fn clear_render_target_view(
        &mut self,
        rtv: CpuDescriptor,
        color: [f32; 4],
    ) -> Result<(), HalError> {
        assert!(self.recording, "clear recorded into a closed command list");
        let image = self.shared.gpu.borrow().views.get(&rtv.ptr).copied();
        let Some(image) = image else {
            panic!("descriptor {:#x} does not hold a render-target view", rtv.ptr);
        };
        self.commands.push(Command::Clear { image, color });
        Ok(())
    }

    fn close(&mut self) -> Result<(), HalError> {
        assert!(self.recording, "close of a command list that is not recording");
        self.recording = false;
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording
    }
}

pub struct NullFence {
    shared: Rc<Shared>,
    id: usize,
}

impl Drop for NullFence {
    fn drop(&mut self) {
        self.shared.release("fence");
    }
}

impl super::Fence<Null> for NullFence {
    fn completed_value(&self) -> u64 {
        self.shared.gpu.borrow().fences[self.id]
    }

    fn set_event_on_completion(&self, value: u64, event: &NullEvent) -> Result<(), HalError> {
        event.armed.set(Some((self.id, value)));
        Ok(())
    }
}

pub struct NullEvent {
    shared: Rc<Shared>,
    armed: Cell<Option<(usize, u64)>>,
}

impl Drop for NullEvent {
    fn drop(&mut self) {
        let mut gpu = self.shared.gpu.borrow_mut();
        gpu.events_released += 1;
        gpu.released.push("event");
    }
}

impl super::Event for NullEvent {
    fn wait(&self) -> Result<(), HalError> {
        let Some((fence, value)) = self.armed.take() else {
            panic!("wait on an event that no fence will signal");
        };

        let mut gpu = self.shared.gpu.borrow_mut();
        gpu.blocking_waits += 1;
        while gpu.fences[fence] < value {
            let Some(op) = gpu.pending.pop_front() else {
                panic!("fence {fence} can never reach {value}: the GPU queue is empty");
            };
            gpu.run(op);
        }
        Ok(())
    }
}

/// Read access to the simulated GPU for assertions.
#[derive(Clone)]
pub struct NullProbe {
    shared: Rc<Shared>,
}

impl NullProbe {
    /// Completed value of the first fence created.
    pub fn fence_completed(&self) -> Option<u64> {
        self.shared.gpu.borrow().fences.first().copied()
    }

    pub fn image_state(&self, slot: u32) -> ResourceState {
        self.shared.gpu.borrow().images[slot as usize].state
    }

    /// Last color the GPU cleared the backbuffer to.
    pub fn image_contents(&self, slot: u32) -> Option<[f32; 4]> {
        self.shared.gpu.borrow().images[slot as usize].contents
    }

    pub fn current_image(&self) -> u32 {
        self.shared.gpu.borrow().current_image
    }

    pub fn presents(&self) -> u64 {
        self.shared.gpu.borrow().presents
    }

    pub fn executed(&self) -> Vec<Command> {
        self.shared.gpu.borrow().executed.clone()
    }

    pub fn pending_ops(&self) -> usize {
        self.shared.gpu.borrow().pending.len()
    }

    /// Number of event waits that actually blocked.
    pub fn blocking_waits(&self) -> usize {
        self.shared.gpu.borrow().blocking_waits
    }

    pub fn events_created(&self) -> usize {
        self.shared.gpu.borrow().events_created
    }

    pub fn events_released(&self) -> usize {
        self.shared.gpu.borrow().events_released
    }

    pub fn debug_validation(&self) -> bool {
        self.shared.gpu.borrow().debug_validation
    }

    /// Object kinds in the order they were released.
    pub fn released(&self) -> Vec<&'static str> {
        self.shared.gpu.borrow().released.clone()
    }

    /// Makes the next `count` acquires report `Skipped`, like a minimized
    /// window or an acquire timeout.
    pub fn skip_acquires(&self, count: u32) {
        self.shared.gpu.borrow_mut().skip_acquires += count;
    }

    pub fn skipped_acquires(&self) -> u64 {
        self.shared.gpu.borrow().skipped_acquires
    }

    /// Runs every queued operation, leaving the GPU idle.
    pub fn flush(&self) {
        self.shared.gpu.borrow_mut().flush();
    }
}
