//! Fixed-length audio recording and hand-off for analysis.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::analysis::{AnalysisClient, AnalysisError, AnalysisResponse, ScreenModel, AUDIO_FILE_NAME};
use crate::permissions::{PermissionError, PermissionGate, PermissionProvider, PermissionType};

/// How long a heartbeat recording runs.
pub const DEFAULT_RECORDING_DURATION: Duration = Duration::from_secs(30);

/// How often recording progress is reported.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Bare `ftyp` box of an M4A file. Written when no recorded audio is supplied.
pub const PLACEHOLDER_AUDIO: &[u8] = &[
    0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p', b'M', b'4', b'A', b' ', 0x00, 0x00, 0x00,
    0x00, b'M', b'4', b'A', b' ', b'i', b's', b'o', b'm',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// MPEG-4 AAC in an .m4a container
    #[default]
    Aac,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioQuality {
    Low,
    Medium,
    #[default]
    High,
    Max,
}

/// Encoder settings handed to the recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
    pub quality: AudioQuality,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            format: AudioFormat::Aac,
            sample_rate: 44_100,
            channels: 2,
            quality: AudioQuality::High,
        }
    }
}

/// Fraction of the recording completed, in [0, 1].
pub fn progress_fraction(elapsed: Duration, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
}

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error(transparent)]
    PermissionDenied(#[from] PermissionError),

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("Recording did not finish successfully")]
    RecordingFailed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

/// Something that records audio to a file for a fixed duration.
pub trait AudioRecorder: Send + Sync {
    /// Start recording into `path`. The receiver resolves with whether the
    /// recording finished successfully.
    fn record(
        &self,
        path: &Path,
        settings: &AudioSettings,
        duration: Duration,
    ) -> Result<oneshot::Receiver<bool>, AudioError>;

    /// Time recorded so far in the current recording.
    fn elapsed(&self) -> Duration;
}

/// Recorder that waits out the duration and writes a fixed payload.
pub struct VirtualRecorder {
    payload: Vec<u8>,
    succeed: bool,
    started: Arc<Mutex<Option<Instant>>>,
}

impl VirtualRecorder {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            succeed: true,
            started: Arc::new(Mutex::new(None)),
        }
    }

    /// Recorder whose recordings always report failure.
    pub fn failing() -> Self {
        Self {
            succeed: false,
            ..Self::new(Vec::new())
        }
    }
}

impl AudioRecorder for VirtualRecorder {
    fn record(
        &self,
        path: &Path,
        settings: &AudioSettings,
        duration: Duration,
    ) -> Result<oneshot::Receiver<bool>, AudioError> {
        let (tx, rx) = oneshot::channel();
        let path = path.to_path_buf();
        let payload = self.payload.clone();
        let succeed = self.succeed;
        *self.started.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());

        log::debug!(
            "Recording {:?} {} Hz x{} for {:?} into {}",
            settings.format,
            settings.sample_rate,
            settings.channels,
            duration,
            path.display()
        );

        std::thread::Builder::new()
            .name("audio-recorder".to_string())
            .spawn(move || {
                std::thread::sleep(duration);
                let ok = succeed && std::fs::write(&path, &payload).is_ok();
                let _ = tx.send(ok);
            })
            .map_err(|e| AudioError::Recorder(e.to_string()))?;

        Ok(rx)
    }

    fn elapsed(&self) -> Duration {
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }
}

/// Permission-gated recording into a working directory.
pub struct RecordingSession<P> {
    gate: Arc<PermissionGate<P>>,
    recorder: Arc<dyn AudioRecorder>,
    dir: PathBuf,
    settings: AudioSettings,
    duration: Duration,
}

impl<P: PermissionProvider> RecordingSession<P> {
    pub fn new(gate: Arc<PermissionGate<P>>, recorder: Arc<dyn AudioRecorder>, dir: PathBuf) -> Self {
        Self {
            gate,
            recorder,
            dir,
            settings: AudioSettings::default(),
            duration: DEFAULT_RECORDING_DURATION,
        }
    }

    pub fn with_settings(mut self, settings: AudioSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Where recordings are written.
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(AUDIO_FILE_NAME)
    }

    /// Record for the configured duration, reporting progress as it goes.
    ///
    /// `on_progress` receives fractions in [0, 1] and always ends with 1.0
    /// on success.
    pub async fn record<F>(&self, mut on_progress: F) -> Result<PathBuf, AudioError>
    where
        F: FnMut(f64),
    {
        self.gate.ensure(PermissionType::Microphone)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.file_path();
        let mut done = self.recorder.record(&path, &self.settings, self.duration)?;
        log::info!("Recording audio for {:?}", self.duration);

        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        let finished = loop {
            tokio::select! {
                result = &mut done => break result.unwrap_or(false),
                _ = ticker.tick() => {
                    on_progress(progress_fraction(self.recorder.elapsed(), self.duration));
                }
            }
        };

        if !finished {
            log::warn!("Audio recording failed");
            return Err(AudioError::RecordingFailed);
        }
        on_progress(1.0);
        Ok(path)
    }

    /// Record, then upload the clip, publishing each step to `screen`.
    pub async fn record_and_analyze(
        &self,
        client: &AnalysisClient,
        screen: &ScreenModel,
    ) -> Result<AnalysisResponse, AudioError> {
        let progress_screen = screen.clone();
        let recorded = self
            .record(move |fraction| {
                progress_screen.apply(move |s| s.set_recording_progress(Some(fraction)));
            })
            .await;

        let path = match recorded {
            Ok(path) => path,
            Err(AudioError::PermissionDenied(e)) => {
                let report = e.clone();
                screen.apply(move |s| s.report_permission(&report));
                return Err(AudioError::PermissionDenied(e));
            }
            Err(e) => {
                screen.apply(|s| s.set_recording_progress(None));
                return Err(e);
            }
        };

        screen.apply(|s| s.set_recording_progress(None));
        let data = tokio::fs::read(&path).await?;
        Ok(screen.analyze_audio(client, data).await?)
    }

    /// Discard the previous clip and go through the whole flow again.
    pub async fn restart(
        &self,
        client: &AnalysisClient,
        screen: &ScreenModel,
    ) -> Result<AnalysisResponse, AudioError> {
        match tokio::fs::remove_file(self.file_path()).await {
            Ok(()) => log::debug!("Removed previous recording"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.record_and_analyze(client, screen).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{AuthorizationStatus, StaticPermissions};
    use tempfile::TempDir;

    #[test]
    fn test_progress_fraction_is_clamped() {
        let total = Duration::from_secs(30);
        assert_eq!(progress_fraction(Duration::ZERO, total), 0.0);
        assert_eq!(progress_fraction(Duration::from_secs(15), total), 0.5);
        assert_eq!(progress_fraction(Duration::from_secs(45), total), 1.0);
        assert_eq!(progress_fraction(Duration::from_secs(1), Duration::ZERO), 1.0);
    }

    #[test]
    fn test_default_settings() {
        let settings = AudioSettings::default();
        assert_eq!(settings.format, AudioFormat::Aac);
        assert_eq!(settings.sample_rate, 44_100);
        assert_eq!(settings.channels, 2);
        assert_eq!(settings.quality, AudioQuality::High);
    }

    #[tokio::test]
    async fn test_record_writes_file_and_reports_progress() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(PermissionGate::new(StaticPermissions::granted_all()));
        let session = RecordingSession::new(
            gate,
            Arc::new(VirtualRecorder::new(b"m4a-bytes".to_vec())),
            dir.path().to_path_buf(),
        )
        .with_duration(Duration::from_millis(250));

        let mut seen = Vec::new();
        let path = session.record(|f| seen.push(f)).await.unwrap();

        assert_eq!(path.file_name().unwrap(), AUDIO_FILE_NAME);
        assert_eq!(std::fs::read(&path).unwrap(), b"m4a-bytes");
        assert_eq!(seen.last(), Some(&1.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_denied_microphone_does_not_record() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(PermissionGate::new(
            StaticPermissions::granted_all()
                .with(PermissionType::Microphone, AuthorizationStatus::Denied),
        ));
        let session = RecordingSession::new(
            gate,
            Arc::new(VirtualRecorder::new(b"x".to_vec())),
            dir.path().to_path_buf(),
        );

        let result = session.record(|_| {}).await;
        assert!(matches!(result, Err(AudioError::PermissionDenied(_))));
        assert!(!session.file_path().exists());
    }

    #[tokio::test]
    async fn test_failed_recording_is_reported() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(PermissionGate::new(StaticPermissions::granted_all()));
        let session = RecordingSession::new(
            gate,
            Arc::new(VirtualRecorder::failing()),
            dir.path().to_path_buf(),
        )
        .with_duration(Duration::from_millis(20));

        let result = session.record(|_| {}).await;
        assert!(matches!(result, Err(AudioError::RecordingFailed)));
    }

    #[tokio::test]
    async fn test_record_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("clips").join("today");
        let gate = Arc::new(PermissionGate::new(StaticPermissions::granted_all()));
        let session = RecordingSession::new(
            gate,
            Arc::new(VirtualRecorder::new(b"m4a-bytes".to_vec())),
            nested.clone(),
        )
        .with_duration(Duration::from_millis(20));

        let path = session.record(|_| {}).await.unwrap();
        assert_eq!(path, nested.join(AUDIO_FILE_NAME));
        assert!(path.exists());
    }
}
