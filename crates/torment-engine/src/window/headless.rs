use std::cell::Cell;

use super::{PlatformWindow, PumpStatus};

/// Window stand-in with no platform behind it.
///
/// The pump reports `Quit` once the optional frame limit is used up, which lets
/// the main loop run a fixed number of frames.
#[derive(Debug, Clone)]
pub struct HeadlessWindow {
    width: u32,
    height: u32,
    frame_limit: Option<u64>,
    pumped: u64,
    visible: Cell<bool>,
}

impl HeadlessWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_limit: None,
            pumped: 0,
            visible: Cell::new(false),
        }
    }

    /// Lets the pump return `Continue` exactly `frames` times.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }
}

impl PlatformWindow for HeadlessWindow {
    type Handle = Self;

    fn handle(&self) -> &Self {
        self
    }

    fn inner_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn show(&self) {
        self.visible.set(true);
    }

    fn pump_messages(&mut self) -> PumpStatus {
        if self.frame_limit.is_some_and(|limit| self.pumped >= limit) {
            return PumpStatus::Quit;
        }
        self.pumped += 1;
        PumpStatus::Continue
    }
}
