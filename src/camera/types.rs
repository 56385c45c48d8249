//! Value types shared by the camera session, coordinator and controller.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which way a camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Rear,
}

impl Facing {
    /// The opposite facing, used when toggling cameras.
    pub fn flipped(self) -> Self {
        match self {
            Facing::Front => Facing::Rear,
            Facing::Rear => Facing::Front,
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Front => write!(f, "front"),
            Facing::Rear => write!(f, "rear"),
        }
    }
}

impl FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "front" => Ok(Facing::Front),
            "rear" | "back" => Ok(Facing::Rear),
            other => Err(format!("Unknown facing '{}'. Use 'front' or 'rear'", other)),
        }
    }
}

/// Hardware capabilities reported by the device registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub has_torch: bool,
    pub supports_live_capture: bool,
    pub supports_high_resolution: bool,
}

/// A camera device as enumerated by the backend. Immutable once listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Stable backend identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// `None` when the backend reports no position; never selected by facing
    pub facing: Option<Facing>,
    pub capabilities: Capabilities,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>, facing: Facing) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            facing: Some(facing),
            capabilities: Capabilities::default(),
        }
    }

    /// Device whose position the backend does not report.
    pub fn unpositioned(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            facing: None,
            capabilities: Capabilities::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.facing {
            Some(facing) => write!(f, "[{}] {} ({})", self.id, self.name, facing)?,
            None => write!(f, "[{}] {} (unspecified)", self.id, self.name)?,
        }
        let caps = &self.capabilities;
        let mut flags = Vec::new();
        if caps.has_torch {
            flags.push("torch");
        }
        if caps.supports_live_capture {
            flags.push("live");
        }
        if caps.supports_high_resolution {
            flags.push("high-res");
        }
        if !flags.is_empty() {
            write!(f, " {}", flags.join(","))?;
        }
        Ok(())
    }
}

/// The single output attached to a session. Photo and video are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Photo,
    Video,
}

impl OutputKind {
    /// Session preset the backend should use while this output is attached.
    pub fn preset(self) -> SessionPreset {
        match self {
            OutputKind::Photo => SessionPreset::Photo,
            OutputKind::Video => SessionPreset::High,
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Photo => write!(f, "photo"),
            OutputKind::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPreset {
    Photo,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMode {
    #[default]
    Off,
    On,
    Auto,
}

impl FromStr for FlashMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(FlashMode::Off),
            "on" => Ok(FlashMode::On),
            "auto" => Ok(FlashMode::Auto),
            other => Err(format!("Unknown flash mode '{}'. Use off, on or auto", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TorchMode {
    #[default]
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    ContinuousAutoFocus,
    AutoFocus,
    Locked,
}

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Configured,
    Running,
}

/// Settings snapshotted when a capture is issued. Stills are always JPEG.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSettings {
    pub flash: FlashMode,
    /// Pair the still with a short companion movie
    pub live: bool,
}

/// A successfully captured still, optionally paired with its live movie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPhoto {
    /// JPEG-encoded image bytes
    pub data: Vec<u8>,
    pub live_movie: Option<PathBuf>,
}

pub type CaptureResult = Result<CapturedPhoto, CameraError>;

/// Errors surfaced by the camera session and capture pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("No camera available")]
    NoCameraAvailable,

    #[error("Capture session is not ready")]
    SessionNotReady,

    #[error("Capture session is already running")]
    SessionAlreadyRunning,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("A capture is already in progress")]
    CaptureInProgress,

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Capture timed out")]
    CaptureTimedOut,

    #[error("Capture produced no usable data")]
    UnknownFailure,

    #[error("Completion was already delivered")]
    AlreadyCompleted,

    #[error("Session configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("Camera controller has shut down")]
    ControllerClosed,
}

const JPEG_SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Whether `data` starts with a JPEG start-of-image marker.
pub fn looks_like_jpeg(data: &[u8]) -> bool {
    data.len() > JPEG_SOI.len() && data.starts_with(&JPEG_SOI)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_parse_accepts_back_alias() {
        assert_eq!("back".parse::<Facing>().unwrap(), Facing::Rear);
        assert_eq!("FRONT".parse::<Facing>().unwrap(), Facing::Front);
        assert!("side".parse::<Facing>().is_err());
    }

    #[test]
    fn test_output_kind_presets() {
        assert_eq!(OutputKind::Photo.preset(), SessionPreset::Photo);
        assert_eq!(OutputKind::Video.preset(), SessionPreset::High);
    }

    #[test]
    fn test_looks_like_jpeg() {
        assert!(looks_like_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]));
        assert!(!looks_like_jpeg(&[0xFF, 0xD8, 0xFF]));
        assert!(!looks_like_jpeg(b"\x89PNG\r\n"));
        assert!(!looks_like_jpeg(&[]));
    }

    #[test]
    fn test_device_display_lists_capabilities() {
        let device = Device::new("cam-0", "Back Camera", Facing::Rear).with_capabilities(
            Capabilities {
                has_torch: true,
                supports_live_capture: true,
                supports_high_resolution: false,
            },
        );
        assert_eq!(device.to_string(), "[cam-0] Back Camera (rear) torch,live");
    }

    #[test]
    fn test_unpositioned_device_display() {
        let device = Device::unpositioned("cam-9", "USB Camera");
        assert_eq!(device.facing, None);
        assert_eq!(device.to_string(), "[cam-9] USB Camera (unspecified)");
    }
}
