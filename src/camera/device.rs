//! Camera device enumeration and selection by facing.

use super::backend::CaptureBackend;
use super::types::{Device, Facing};

/// List all camera devices known to the backend.
///
/// If no cameras are found, returns an empty vector (not an error); callers
/// that need a camera turn that into [`CameraError::NoCameraAvailable`].
///
/// [`CameraError::NoCameraAvailable`]: super::CameraError::NoCameraAvailable
pub fn list_devices(backend: &dyn CaptureBackend) -> Vec<Device> {
    let devices = backend.discover_devices();
    log::debug!("Discovered {} camera device(s)", devices.len());
    devices
}

/// Pick the first device with the given facing, in enumeration order.
pub fn select(devices: &[Device], facing: Facing) -> Option<Device> {
    devices.iter().find(|d| d.facing == Some(facing)).cloned()
}

/// Facing to open first: rear if present, otherwise front.
pub fn default_facing(devices: &[Device]) -> Option<Facing> {
    if select(devices, Facing::Rear).is_some() {
        Some(Facing::Rear)
    } else if select(devices, Facing::Front).is_some() {
        Some(Facing::Front)
    } else {
        None
    }
}
