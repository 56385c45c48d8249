//! Presentation state for the analysis screens.
//!
//! [`AnalysisScreen`] is plain state. [`ScreenModel`] shares it and applies
//! every mutation through a [`DeliveryContext`], so completions arriving on
//! worker threads only touch it on the UI-bound context.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::client::{AnalysisClient, AnalysisError, AnalysisResponse};
use crate::camera::{CameraError, CaptureResult};
use crate::dispatch::DeliveryContext;
use crate::permissions::{PermissionError, PermissionType, APP_SETTINGS_URL};

/// Dismissible alert shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// Upload or response decoding failed
    Connection,
    /// A permission was denied; `settings_url` opens the app's Settings page
    NeedsAuthorization {
        permission: PermissionType,
        settings_url: String,
    },
    CaptureFailed { reason: String },
    /// The upload was refused before or after reaching the server
    UploadFailed { reason: String },
}

impl Alert {
    pub fn needs_authorization(permission: PermissionType) -> Self {
        Alert::NeedsAuthorization {
            permission,
            settings_url: APP_SETTINGS_URL.to_string(),
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Alert::Connection => "Connection Error",
            Alert::NeedsAuthorization { .. } => "Need Authorization",
            Alert::CaptureFailed { .. } => "Capture Failed",
            Alert::UploadFailed { .. } => "Upload Failed",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Alert::Connection => "There is an error occured while uploading data. \
                Please, check your internet connection."
                .to_string(),
            Alert::NeedsAuthorization {
                permission,
                settings_url,
            } => format!(
                "{}\n\nGrant access in {} ({})",
                permission.usage_message(),
                permission.settings_path(),
                settings_url
            ),
            Alert::CaptureFailed { reason } | Alert::UploadFailed { reason } => reason.clone(),
        }
    }

    /// Alert for a failed upload attempt.
    pub fn for_upload_error(error: &AnalysisError) -> Self {
        if error.is_connectivity() {
            Alert::Connection
        } else {
            Alert::UploadFailed {
                reason: error.to_string(),
            }
        }
    }
}

/// Where the screen is in the upload flow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Uploading,
    Showing(AnalysisResponse),
    Failed,
}

#[derive(Debug, Default)]
pub struct AnalysisScreen {
    phase: Phase,
    alerts: VecDeque<Alert>,
    photo: Option<Vec<u8>>,
    recording_progress: Option<f64>,
    attempts: u32,
}

impl AnalysisScreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// The circular progress indicator is shown while recording or uploading.
    pub fn progress_visible(&self) -> bool {
        self.phase == Phase::Uploading || self.recording_progress.is_some()
    }

    pub fn recording_progress(&self) -> Option<f64> {
        self.recording_progress
    }

    pub fn set_recording_progress(&mut self, fraction: Option<f64>) {
        self.recording_progress = fraction.map(|f| f.clamp(0.0, 1.0));
    }

    /// Alerts not yet dismissed, oldest first.
    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn current_alert(&self) -> Option<&Alert> {
        self.alerts.front()
    }

    pub fn dismiss_alert(&mut self) -> Option<Alert> {
        self.alerts.pop_front()
    }

    /// Number of upload attempts started on this screen.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn photo(&self) -> Option<&[u8]> {
        self.photo.as_deref()
    }

    pub fn set_photo(&mut self, data: Vec<u8>) {
        self.photo = Some(data);
        self.phase = Phase::Idle;
    }

    /// Store a successful capture or surface its failure.
    pub fn accept_capture(&mut self, result: CaptureResult) {
        match result {
            Ok(photo) => self.set_photo(photo.data),
            Err(e) => self.report_capture_failure(&e),
        }
    }

    pub fn report_capture_failure(&mut self, error: &CameraError) {
        log::warn!("Capture failed: {}", error);
        self.alerts.push_back(Alert::CaptureFailed {
            reason: error.to_string(),
        });
    }

    /// Only the first denial for a permission produces an alert.
    pub fn report_permission(&mut self, error: &PermissionError) {
        if error.should_prompt {
            self.alerts
                .push_back(Alert::needs_authorization(error.permission_type));
        }
    }

    pub fn begin_upload(&mut self) {
        self.attempts += 1;
        self.phase = Phase::Uploading;
    }

    /// Record the outcome of one upload attempt.
    pub fn finish_upload(&mut self, result: &Result<AnalysisResponse, AnalysisError>) {
        match result {
            Ok(response) => self.phase = Phase::Showing(response.clone()),
            Err(e) => {
                self.phase = Phase::Failed;
                self.alerts.push_back(Alert::for_upload_error(e));
            }
        }
    }

    /// Screen is going away: release the held photo and transient state.
    pub fn teardown(&mut self) {
        self.photo = None;
        self.recording_progress = None;
        self.phase = Phase::Idle;
    }
}

/// Shared [`AnalysisScreen`] whose mutations run on a delivery context.
#[derive(Clone)]
pub struct ScreenModel {
    state: Arc<Mutex<AnalysisScreen>>,
    context: Arc<dyn DeliveryContext>,
}

impl ScreenModel {
    pub fn new(context: Arc<dyn DeliveryContext>) -> Self {
        Self {
            state: Arc::new(Mutex::new(AnalysisScreen::new())),
            context,
        }
    }

    /// Read the current state.
    pub fn lock(&self) -> MutexGuard<'_, AnalysisScreen> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` against the state on the delivery context.
    pub fn apply<F>(&self, f: F)
    where
        F: FnOnce(&mut AnalysisScreen) + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.context.deliver(Box::new(move || {
            let mut screen = state.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut screen);
        }));
    }

    /// Upload `data` as a photo and publish the outcome.
    pub async fn analyze_photo(
        &self,
        client: &AnalysisClient,
        data: Vec<u8>,
    ) -> Result<AnalysisResponse, AnalysisError> {
        self.apply(AnalysisScreen::begin_upload);
        let result = client.upload_image(data).await;
        self.publish(&result);
        result
    }

    /// Upload the photo currently held by the screen.
    pub async fn analyze_current_photo(
        &self,
        client: &AnalysisClient,
    ) -> Result<AnalysisResponse, AnalysisError> {
        let photo = self.lock().photo().map(<[u8]>::to_vec);
        match photo {
            Some(data) => self.analyze_photo(client, data).await,
            None => {
                let result = Err(AnalysisError::InvalidPayload(
                    "no photo to analyze".to_string(),
                ));
                self.publish(&result);
                result
            }
        }
    }

    /// Upload recorded audio and publish the outcome.
    pub async fn analyze_audio(
        &self,
        client: &AnalysisClient,
        data: Vec<u8>,
    ) -> Result<AnalysisResponse, AnalysisError> {
        self.apply(AnalysisScreen::begin_upload);
        let result = client.upload_audio(data).await;
        self.publish(&result);
        result
    }

    fn publish(&self, result: &Result<AnalysisResponse, AnalysisError>) {
        let outcome = match result {
            Ok(response) => Ok(response.clone()),
            Err(e) => Err(Alert::for_upload_error(e)),
        };
        self.apply(move |screen| match outcome {
            Ok(response) => screen.finish_upload(&Ok(response)),
            Err(alert) => {
                screen.phase = Phase::Failed;
                screen.alerts.push_back(alert);
            }
        });
    }

    pub fn teardown(&self) {
        self.apply(AnalysisScreen::teardown);
    }
}
