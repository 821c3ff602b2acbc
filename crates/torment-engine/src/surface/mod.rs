//! Presentation surface and render-target views.
//!
//! The swap surface owns a ring of backbuffers; [`RtvTable`] holds one
//! render-target descriptor per backbuffer, created once and never
//! reallocated. A [`FrameIndex`] can only be obtained from the table, so
//! every descriptor lookup is in range.

mod rtv;

pub use rtv::{FrameIndex, RenderTarget, RtvTable};

use crate::device::SetupError;
use crate::hal::{Api, Device, Surface, SurfaceDesc, SurfaceFormat};

/// Creates the swap surface bound to `window` and `queue`.
///
/// Presents use flip/discard semantics locked to vertical blank. The first
/// backbuffer to render into is whatever `current_image_index` reports; it is
/// not necessarily 0.
pub fn create_surface<A: Api>(
    device: &A::Device,
    queue: &A::Queue,
    window: &A::Window,
    width: u32,
    height: u32,
    buffer_count: u32,
    format: SurfaceFormat,
) -> Result<A::Surface, SetupError> {
    if width == 0 || height == 0 {
        return Err(SetupError::InvalidSurfaceSize { width, height });
    }
    if buffer_count == 0 {
        return Err(SetupError::InvalidBufferCount(buffer_count));
    }

    let desc = SurfaceDesc {
        width,
        height,
        buffer_count,
        format,
    };
    let surface = device
        .create_swap_surface(queue, window, &desc)
        .map_err(SetupError::Surface)?;

    log::info!(
        "swap surface {width}x{height}, {} backbuffers, {:?}, first image {}",
        surface.buffer_count(),
        surface.format(),
        surface.current_image_index()
    );
    Ok(surface)
}
