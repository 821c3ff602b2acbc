use std::fmt;

use thiserror::Error;

use crate::hal::HalError;

/// Failure while bringing the GPU session up. Always fatal.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to create GPU device")]
    Device(#[source] HalError),

    #[error("failed to create command queue")]
    Queue(#[source] HalError),

    #[error("invalid surface size {width}x{height}")]
    InvalidSurfaceSize { width: u32, height: u32 },

    #[error("invalid backbuffer count {0}")]
    InvalidBufferCount(u32),

    #[error("failed to create swap surface")]
    Surface(#[source] HalError),

    #[error("failed to create render-target descriptor heap")]
    DescriptorHeap(#[source] HalError),

    #[error("failed to create command allocator")]
    CommandAllocator(#[source] HalError),

    #[error("failed to create command list")]
    CommandList(#[source] HalError),

    #[error("failed to create fence")]
    Fence(#[source] HalError),

    #[error("failed to create fence wait event")]
    Event(#[source] HalError),
}

/// Step of the frame loop a GPU call failed in.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameStage {
    Acquiring,
    Recording,
    Submitting,
    Presenting,
    Signaling,
    Waiting,
    QueryingImage,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameStage::Acquiring => "acquiring the backbuffer",
            FrameStage::Recording => "recording",
            FrameStage::Submitting => "submitting",
            FrameStage::Presenting => "presenting",
            FrameStage::Signaling => "signaling the fence",
            FrameStage::Waiting => "waiting on the fence",
            FrameStage::QueryingImage => "querying the backbuffer index",
        };
        f.write_str(s)
    }
}

/// A GPU call failed inside the frame loop. Treated as fatal; there is no retry.
#[derive(Debug, Error)]
#[error("GPU call failed while {stage}")]
pub struct FrameError {
    pub stage: FrameStage,
    #[source]
    pub source: HalError,
}

impl FrameError {
    /// Adapter for `map_err` at a given stage.
    pub(crate) fn at(stage: FrameStage) -> impl FnOnce(HalError) -> FrameError {
        move |source| FrameError { stage, source }
    }
}
