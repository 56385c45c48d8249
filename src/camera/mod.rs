//! Camera session lifecycle and capture coordination.
//!
//! - Device enumeration via [`list_devices`] and [`select`]
//! - Session configuration via [`Session`] and [`Transaction`]
//! - One-at-a-time captures via [`CaptureCoordinator`]
//! - A serialized async front end via [`CameraController`]
//! - An in-process backend via [`VirtualRig`]

mod backend;
mod controller;
mod coordinator;
mod device;
mod session;
mod types;
mod virtual_rig;

pub use backend::{BackendError, CaptureBackend, PhotoCallback, PhotoEvent};
pub use controller::{CameraController, LightState, SessionSnapshot};
pub use coordinator::{
    CaptureCoordinator, CaptureHandle, CompanionResult, CoordinatorOptions, LiveDelivery, Promise,
    DEFAULT_CAPTURE_TIMEOUT,
};
pub use device::{default_facing, list_devices, select};
pub use session::{Session, Transaction};
pub use types::{
    looks_like_jpeg, CameraError, Capabilities, CaptureResult, CaptureSettings, CapturedPhoto,
    Device, Facing, FlashMode, FocusMode, OutputKind, SessionPreset, SessionState, TorchMode,
};
pub use virtual_rig::{CaptureScript, RigOp, VirtualRig, PLACEHOLDER_MOVIE, PLACEHOLDER_STILL};
