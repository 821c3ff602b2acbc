use crate::device::{FrameError, FrameStage, SetupError};
use crate::hal::{Api, Device, Fence, Queue, Surface};

use super::{EventWait, FenceWait};

/// Fence plus the CPU-side value the next signal will use.
///
/// `next_value` grows by exactly one per signal. A value returned by
/// [`signal`](Self::signal) is safe to treat as complete only after
/// [`wait_for`](Self::wait_for) returns for it.
pub struct FrameFence<A: Api, W: FenceWait<A> = EventWait<A>> {
    // Released before the fence it waits on.
    waiter: W,
    fence: A::Fence,
    next_value: u64,
}

impl<A: Api> FrameFence<A> {
    /// Creates a fence at 0 with an event-based waiter.
    pub fn new(device: &A::Device) -> Result<Self, SetupError> {
        let fence = device.create_fence(0).map_err(SetupError::Fence)?;
        let waiter = EventWait::new(device)?;
        Ok(Self::with_waiter(fence, waiter))
    }
}

impl<A: Api, W: FenceWait<A>> FrameFence<A, W> {
    /// Wraps an existing fence; the first signal uses `completed + 1`.
    pub fn with_waiter(fence: A::Fence, waiter: W) -> Self {
        let next_value = fence.completed_value() + 1;
        Self {
            waiter,
            fence,
            next_value,
        }
    }

    pub fn next_value(&self) -> u64 {
        self.next_value
    }

    pub fn completed_value(&self) -> u64 {
        self.fence.completed_value()
    }

    pub fn waiter(&self) -> &W {
        &self.waiter
    }

    /// Queues a signal of the current `next_value`, then advances it.
    pub fn signal(&mut self, queue: &A::Queue) -> Result<u64, FrameError> {
        let value = self.next_value;
        queue
            .signal(&self.fence, value)
            .map_err(FrameError::at(FrameStage::Signaling))?;
        self.next_value += 1;
        Ok(value)
    }

    /// Blocks until the fence reaches `value`. Returns at once if it already has.
    pub fn wait_for(&mut self, value: u64) -> Result<(), FrameError> {
        self.waiter
            .wait_for(&self.fence, value)
            .map_err(FrameError::at(FrameStage::Waiting))?;

        debug_assert!(self.fence.completed_value() >= value);
        Ok(())
    }

    /// Signals and waits with no new work: the GPU is idle on return.
    pub fn drain(&mut self, queue: &A::Queue) -> Result<u64, FrameError> {
        let value = self.signal(queue)?;
        self.wait_for(value)?;
        log::trace!("fence reached {value}");
        Ok(value)
    }

    /// Submits `lists`, presents, then blocks until the GPU has finished.
    ///
    /// Returns the surface's current image index, queried after the wait.
    pub fn submit_and_wait(
        &mut self,
        queue: &A::Queue,
        surface: &mut A::Surface,
        lists: &mut [&mut A::CommandList],
        sync_interval: u32,
    ) -> Result<u32, FrameError> {
        queue
            .execute_command_lists(lists)
            .map_err(FrameError::at(FrameStage::Submitting))?;
        surface
            .present(sync_interval)
            .map_err(FrameError::at(FrameStage::Presenting))?;

        self.drain(queue)?;
        Ok(surface.current_image_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{create_device, create_queue};
    use crate::hal::HalError;
    use crate::hal::null::{Execution, Null, NullConfig, NullDevice, NullInstance, NullProbe};

    fn device(execution: Execution) -> (NullDevice, NullProbe) {
        let instance = NullInstance::new(NullConfig {
            execution,
            ..NullConfig::default()
        });
        let probe = instance.probe();
        (create_device::<Null>(&instance, false).unwrap(), probe)
    }

    #[test]
    fn starts_one_past_the_fence() {
        let (device, probe) = device(Execution::Deferred);
        let fence = FrameFence::<Null>::new(&device).unwrap();

        assert_eq!(fence.next_value(), 1);
        assert_eq!(fence.completed_value(), 0);
        assert_eq!(probe.events_created(), 1);
    }

    #[test]
    fn signal_advances_by_exactly_one() {
        let (device, _probe) = device(Execution::Deferred);
        let queue = create_queue::<Null>(&device).unwrap();
        let mut fence = FrameFence::<Null>::new(&device).unwrap();

        for expected in 1..=5 {
            assert_eq!(fence.signal(&queue).unwrap(), expected);
            assert_eq!(fence.next_value(), expected + 1);
        }
    }

    #[test]
    fn drain_blocks_until_the_gpu_catches_up() {
        let (device, probe) = device(Execution::Deferred);
        let queue = create_queue::<Null>(&device).unwrap();
        let mut fence = FrameFence::<Null>::new(&device).unwrap();

        let value = fence.drain(&queue).unwrap();

        assert_eq!(value, 1);
        assert!(fence.completed_value() >= value);
        assert_eq!(probe.blocking_waits(), 1);
    }

    #[test]
    fn completed_value_skips_the_event() {
        let (device, probe) = device(Execution::Immediate);
        let queue = create_queue::<Null>(&device).unwrap();
        let mut fence = FrameFence::<Null>::new(&device).unwrap();

        fence.drain(&queue).unwrap();
        fence.drain(&queue).unwrap();

        assert_eq!(fence.completed_value(), 2);
        assert_eq!(probe.blocking_waits(), 0);
    }

    /// Counts waits and delegates to the event waiter.
    struct CountingWait {
        inner: EventWait<Null>,
        calls: Vec<u64>,
    }

    impl FenceWait<Null> for CountingWait {
        fn wait_for(&mut self, fence: &<Null as Api>::Fence, value: u64) -> Result<(), HalError> {
            self.calls.push(value);
            self.inner.wait_for(fence, value)
        }
    }

    #[test]
    fn wait_primitive_is_replaceable() {
        let (device, _probe) = device(Execution::Deferred);
        let queue = create_queue::<Null>(&device).unwrap();
        let waiter = CountingWait {
            inner: EventWait::new(&device).unwrap(),
            calls: Vec::new(),
        };
        let raw = crate::hal::Device::create_fence(&device, 0).unwrap();
        let mut fence = FrameFence::<Null, _>::with_waiter(raw, waiter);

        fence.drain(&queue).unwrap();
        fence.drain(&queue).unwrap();

        assert_eq!(fence.waiter().calls, vec![1, 2]);
        assert_eq!(fence.completed_value(), 2);
    }
}
