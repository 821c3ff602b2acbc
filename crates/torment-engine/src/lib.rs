//! Torment engine crate.
//!
//! A minimal explicit-API frame driver: one device, one direct queue, a
//! double-buffered swap surface and a fence that keeps exactly one frame in
//! flight. Every frame clears the current backbuffer and presents it.
//!
//! GPU calls go through the [`hal`] traits. [`hal::native`] runs on wgpu; the
//! `null` backend (tests and the `null` feature) is a validating in-process
//! simulator.

pub mod config;
pub mod device;
pub mod driver;
pub mod frame;
pub mod hal;
pub mod logging;
pub mod surface;
pub mod sync;
pub mod window;

pub use config::{Color, DriverConfig};
pub use driver::{DriverState, FrameDriver, FrameOutcome, GpuContext, run};
