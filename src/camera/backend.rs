//! Seam between the session logic and the platform capture framework.
//!
//! The framework owns the device registry, the running pipeline and its own
//! worker threads. Everything the session needs from it goes through
//! [`CaptureBackend`], so the same lifecycle code drives real hardware or the
//! in-process [`VirtualRig`](super::VirtualRig).

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use super::types::{
    CaptureSettings, Device, FocusMode, OutputKind, SessionPreset, TorchMode,
};

/// Failure reported by the capture framework.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Completion events for one photo capture.
///
/// A live capture produces one of each, in either order, possibly from
/// different framework threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoEvent {
    ImageProcessed {
        data: Option<Vec<u8>>,
        error: Option<String>,
    },
    LiveMovieProcessed {
        path: Option<PathBuf>,
        error: Option<String>,
    },
}

/// Callback the framework invokes for each [`PhotoEvent`].
pub type PhotoCallback = Arc<dyn Fn(PhotoEvent) + Send + Sync>;

/// Platform capture framework.
///
/// Mutations are only legal between `begin_configuration` and
/// `commit_configuration`; the session guarantees that pairing.
pub trait CaptureBackend: Send {
    /// Enumerate video devices. Empty when the machine has no camera.
    fn discover_devices(&self) -> Vec<Device>;

    fn begin_configuration(&mut self);

    fn commit_configuration(&mut self);

    /// Attach `device` as a session input.
    fn add_input(&mut self, device: &Device) -> Result<(), BackendError>;

    fn remove_input(&mut self, device_id: &str);

    fn add_output(&mut self, kind: OutputKind) -> Result<(), BackendError>;

    fn remove_output(&mut self, kind: OutputKind);

    fn set_preset(&mut self, preset: SessionPreset);

    /// Lock the device, change focus mode, unlock.
    fn set_focus_mode(&mut self, device_id: &str, mode: FocusMode) -> Result<(), BackendError>;

    fn set_torch_mode(&mut self, device_id: &str, mode: TorchMode) -> Result<(), BackendError>;

    fn start_running(&mut self) -> Result<(), BackendError>;

    fn stop_running(&mut self);

    /// Issue one capture. Results arrive later through `on_event`.
    fn capture_photo(
        &mut self,
        settings: &CaptureSettings,
        on_event: PhotoCallback,
    ) -> Result<(), BackendError>;
}
