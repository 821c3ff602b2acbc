//! Compile-time configuration.
//!
//! There is no configuration file and no command-line surface. The constants
//! below are the whole configuration; [`DriverConfig`] groups them so tests can
//! vary individual values.

use crate::hal::SurfaceFormat;

/// Number of backbuffers in the swap surface.
pub const BUFFER_COUNT: u32 = 2;

/// Color every frame is cleared to.
pub const CLEAR_COLOR: Color = Color::rgba(0.0, 0.2, 0.4, 1.0);

/// Backbuffer format requested from the backend.
pub const SURFACE_FORMAT: SurfaceFormat = SurfaceFormat::Rgba8Unorm;

/// Presents wait for this many vertical blanks.
pub const SYNC_INTERVAL: u32 = 1;

/// Backend validation follows the build profile.
pub const DEBUG_VALIDATION: bool = cfg!(debug_assertions);

/// Linear, straight-alpha RGBA color.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    #[inline]
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    pub const fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Settings consumed by the frame driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub buffer_count: u32,
    pub clear_color: Color,
    pub format: SurfaceFormat,
    pub sync_interval: u32,
    pub debug_validation: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            buffer_count: BUFFER_COUNT,
            clear_color: CLEAR_COLOR,
            format: SURFACE_FORMAT,
            sync_interval: SYNC_INTERVAL,
            debug_validation: DEBUG_VALIDATION,
        }
    }
}
