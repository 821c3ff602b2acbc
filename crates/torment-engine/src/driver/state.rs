use crate::config::DriverConfig;
use crate::device::{FrameError, SetupError};
use crate::hal::Api;
use crate::surface::FrameIndex;

use super::{FrameOutcome, GpuContext};

/// Lifecycle of a [`FrameDriver`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DriverState {
    Uninitialized,
    Ready,
    Rendering,
    ShuttingDown,
    Terminated,
}

/// Drives initialize -> render* -> shutdown over one GPU session.
///
/// Calls out of order (`render` before `initialize` or after `shutdown`, a
/// second `initialize`, `shutdown` without `initialize`) are caller bugs and
/// panic.
pub struct FrameDriver<A: Api> {
    context: Option<GpuContext<A>>,
    instance: A::Instance,
    config: DriverConfig,
    state: DriverState,
    frames: u64,
}

impl<A: Api> FrameDriver<A> {
    pub fn new(instance: A::Instance, config: DriverConfig) -> Self {
        Self {
            context: None,
            instance,
            config,
            state: DriverState::Uninitialized,
            frames: 0,
        }
    }

    /// Creates every GPU object. Uninitialized -> Ready.
    pub fn initialize(
        &mut self,
        window: &A::Window,
        width: u32,
        height: u32,
    ) -> Result<(), SetupError> {
        assert_eq!(
            self.state,
            DriverState::Uninitialized,
            "initialize() called while the driver is {:?}",
            self.state
        );

        let context = GpuContext::create(&self.instance, window, width, height, &self.config)?;
        log::info!(
            "frame driver ready, first backbuffer {}",
            context.frame_index().get()
        );

        self.context = Some(context);
        self.state = DriverState::Ready;
        Ok(())
    }

    /// Records and presents one frame, waiting for the GPU to finish it.
    ///
    /// A skipped frame leaves the fence, the frame index and the frame count
    /// untouched.
    pub fn render(&mut self) -> Result<FrameOutcome, FrameError> {
        let (DriverState::Ready, Some(context)) = (self.state, self.context.as_mut()) else {
            panic!("render() called while the driver is {:?}", self.state);
        };

        self.state = DriverState::Rendering;
        let result = context.render_frame(self.config.clear_color, self.config.sync_interval);
        self.state = DriverState::Ready;

        if let Ok(FrameOutcome::Presented) = result {
            self.frames += 1;
        }
        result
    }

    /// Waits for the GPU to go idle, then releases the session.
    /// Ready -> ShuttingDown -> Terminated.
    pub fn shutdown(&mut self) -> Result<(), FrameError> {
        let (DriverState::Ready, Some(mut context)) = (self.state, self.context.take()) else {
            panic!("shutdown() called while the driver is {:?}", self.state);
        };

        self.state = DriverState::ShuttingDown;
        let drained = context.drain();
        if let Err(e) = &drained {
            log::error!("final GPU drain failed: {e}");
        }

        context.teardown();
        self.state = DriverState::Terminated;
        log::info!("frame driver shut down after {} frames", self.frames);

        drained.map(|_| ())
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    pub fn frame_index(&self) -> Option<FrameIndex> {
        self.context.as_ref().map(GpuContext::frame_index)
    }

    pub fn context(&self) -> Option<&GpuContext<A>> {
        self.context.as_ref()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}

impl<A: Api> Drop for FrameDriver<A> {
    fn drop(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };

        // Never shut down: the GPU may still reference the objects below.
        if !std::thread::panicking() {
            log::warn!("frame driver dropped without shutdown(); draining the GPU");
            if let Err(e) = context.drain() {
                log::error!("GPU drain on drop failed: {e}");
            }
        }
        context.teardown();
    }
}
