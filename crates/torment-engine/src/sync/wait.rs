use crate::device::SetupError;
use crate::hal::{Api, Device, Event, Fence, HalError};

/// Blocks the calling thread until a fence reaches a value.
pub trait FenceWait<A: Api> {
    fn wait_for(&mut self, fence: &A::Fence, value: u64) -> Result<(), HalError>;
}

/// Waits on an OS event armed through the fence. No timeout: a GPU that never
/// completes hangs the caller.
pub struct EventWait<A: Api> {
    event: A::Event,
}

impl<A: Api> EventWait<A> {
    pub fn new(device: &A::Device) -> Result<Self, SetupError> {
        let event = device.create_event().map_err(SetupError::Event)?;
        Ok(Self { event })
    }
}

impl<A: Api> FenceWait<A> for EventWait<A> {
    fn wait_for(&mut self, fence: &A::Fence, value: u64) -> Result<(), HalError> {
        if fence.completed_value() >= value {
            return Ok(());
        }

        fence.set_event_on_completion(value, &self.event)?;
        self.event.wait()
    }
}
