use crate::hal::{Api, Device, DeviceDesc, Instance};

use super::SetupError;

/// Creates the logical device.
///
/// `debug_validation` asks the backend for its validation layer. The layer is
/// best-effort: backends skip it silently when it is unavailable.
pub fn create_device<A: Api>(
    instance: &A::Instance,
    debug_validation: bool,
) -> Result<A::Device, SetupError> {
    let desc = DeviceDesc { debug_validation };
    let device = instance.create_device(&desc).map_err(SetupError::Device)?;

    log::debug!("device created (validation requested: {debug_validation})");
    Ok(device)
}

/// Creates the single direct submission queue.
pub fn create_queue<A: Api>(device: &A::Device) -> Result<A::Queue, SetupError> {
    let queue = device.create_command_queue().map_err(SetupError::Queue)?;

    log::debug!("direct command queue created");
    Ok(queue)
}
