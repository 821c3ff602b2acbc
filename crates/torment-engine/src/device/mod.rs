//! Device/queue factory and the error taxonomy.
//!
//! Setup failures are [`SetupError`]s; GPU calls failing inside the frame loop
//! are [`FrameError`]s. Neither is recovered from.

mod error;
mod factory;

pub use error::{FrameError, FrameStage, SetupError};
pub use factory::{create_device, create_queue};
