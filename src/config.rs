//! Configuration file handling for glitters.
//!
//! Loads configuration from `~/.config/glitters/config.toml` or a custom path.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::{DEFAULT_ENDPOINT, DEFAULT_TIMEOUT, ENDPOINT_ENV};
use crate::audio::{AudioSettings, DEFAULT_RECORDING_DURATION};
use crate::camera::{CoordinatorOptions, Facing, FlashMode, LiveDelivery, DEFAULT_CAPTURE_TIMEOUT};

/// Configuration file structure for glitters.
/// Loaded from ~/.config/glitters/config.toml (or custom path via --config).
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub library: LibraryConfig,
}

#[derive(Debug, Deserialize)]
pub struct CameraConfig {
    /// Camera to open first; rear when available if unset
    #[serde(default)]
    pub facing: Option<Facing>,
    #[serde(default)]
    pub flash: FlashMode,
    #[serde(default)]
    pub live: bool,
    #[serde(default)]
    pub live_delivery: LiveDelivery,
    /// Seconds to wait for a capture callback; 0 waits forever
    #[serde(default = "default_capture_timeout_secs")]
    pub capture_timeout_secs: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            facing: None,
            flash: FlashMode::default(),
            live: false,
            live_delivery: LiveDelivery::default(),
            capture_timeout_secs: default_capture_timeout_secs(),
        }
    }
}

impl CameraConfig {
    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            live_delivery: self.live_delivery,
            timeout: (self.capture_timeout_secs > 0)
                .then(|| Duration::from_secs(self.capture_timeout_secs)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_upload_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_upload_timeout_secs(),
        }
    }
}

impl UploadConfig {
    /// `GLITTERS_ENDPOINT` wins over the file, which wins over the default.
    pub fn resolved_endpoint(&self) -> String {
        std::env::var(ENDPOINT_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_recording_secs")]
    pub duration_secs: u64,
    /// Working directory for recordings
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub settings: AudioSettings,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_recording_secs(),
            dir: None,
            settings: AudioSettings::default(),
        }
    }
}

impl AudioConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Configured directory, or the user's documents directory.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::document_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("glitters")
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct LibraryConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_capture_timeout_secs() -> u64 {
    DEFAULT_CAPTURE_TIMEOUT.as_secs()
}

fn default_upload_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_recording_secs() -> u64 {
    DEFAULT_RECORDING_DURATION.as_secs()
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            Self::load_required(&path)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Config::default())
        }
    }

    /// Load configuration from a file that must exist.
    pub fn load_required(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(config)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    source
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("glitters").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/glitters/config.toml")
        })
}
