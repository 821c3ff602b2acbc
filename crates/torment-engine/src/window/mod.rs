//! Platform window collaborator.
//!
//! The frame driver never creates or destroys windows. It consumes a
//! [`PlatformWindow`]: a stable native handle, the current size and a
//! non-blocking message pump that the loop calls once per frame.

#[cfg(any(test, feature = "null"))]
mod headless;
mod runtime;

#[cfg(any(test, feature = "null"))]
pub use headless::HeadlessWindow;
pub use runtime::{WindowConfig, WinitWindow};

/// Outcome of one message pump.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PumpStatus {
    Continue,
    Quit,
}

pub trait PlatformWindow {
    /// Native handle the GPU backend binds its swap surface to.
    type Handle: ?Sized;

    fn handle(&self) -> &Self::Handle;

    /// Inner size in physical pixels.
    fn inner_size(&self) -> (u32, u32);

    /// Makes the window visible. Called once the GPU is ready.
    fn show(&self);

    /// Dispatches pending platform messages without blocking.
    fn pump_messages(&mut self) -> PumpStatus;
}
