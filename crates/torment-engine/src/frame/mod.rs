//! Per-frame command recording.

mod recorder;

pub use recorder::{FrameRecorder, record_frame};
