//! CPU-GPU frame synchronization.
//!
//! After every submission the CPU signals the fence and blocks until the GPU
//! reaches that value, so exactly one frame is ever in flight. The blocking
//! primitive sits behind [`FenceWait`].

mod fence;
mod wait;

pub use fence::FrameFence;
pub use wait::{EventWait, FenceWait};
