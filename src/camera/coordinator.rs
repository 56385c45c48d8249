//! Capture coordination.
//!
//! The coordinator owns the single pending-capture slot for a session. It
//! issues one backend capture, correlates the backend's callbacks with the
//! request by id, classifies what comes back, and hands exactly one result to
//! the caller's continuation on the configured [`DeliveryContext`].

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::oneshot;

use super::backend::{PhotoCallback, PhotoEvent};
use super::session::Session;
use super::types::{
    looks_like_jpeg, CameraError, CaptureResult, CaptureSettings, CapturedPhoto, OutputKind,
};
use crate::dispatch::{DeliveryContext, Job};

/// Default time to wait for the backend to answer a capture.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of the companion movie of a live capture.
pub type CompanionResult = Result<PathBuf, CameraError>;

/// How a live capture's still and movie reach the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveDelivery {
    /// Hold the still until the movie is ready, then deliver both together
    #[default]
    Combined,
    /// Deliver the still at once and the movie through a second completion
    Split,
}

impl FromStr for LiveDelivery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "combined" => Ok(LiveDelivery::Combined),
            "split" => Ok(LiveDelivery::Split),
            other => Err(format!(
                "Unknown live delivery mode '{}'. Use combined or split",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    pub live_delivery: LiveDelivery,
    /// `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            live_delivery: LiveDelivery::default(),
            timeout: Some(DEFAULT_CAPTURE_TIMEOUT),
        }
    }
}

/// One-shot continuation. A second completion is refused with
/// [`CameraError::AlreadyCompleted`].
pub struct Promise<T> {
    slot: Mutex<Option<Box<dyn FnOnce(T) + Send>>>,
}

impl<T> Promise<T> {
    pub fn new(continuation: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            slot: Mutex::new(Some(Box::new(continuation))),
        }
    }

    pub fn complete(&self, value: T) -> Result<(), CameraError> {
        let continuation = self
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(CameraError::AlreadyCompleted)?;
        continuation(value);
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("completed", &self.is_completed())
            .finish()
    }
}

struct PendingCapture {
    id: u64,
    live: bool,
    primary: Option<Arc<Promise<CaptureResult>>>,
    companion: Option<Arc<Promise<CompanionResult>>>,
    held_image: Option<Vec<u8>>,
    early_movie: Option<CompanionResult>,
}

impl PendingCapture {
    fn is_finished(&self) -> bool {
        self.primary.is_none() && self.companion.is_none()
    }

    fn resolve_primary(&mut self, result: CaptureResult) -> Option<Job> {
        let promise = self.primary.take()?;
        let id = self.id;
        Some(Box::new(move || {
            if let Err(e) = promise.complete(result) {
                log::warn!("Capture {}: {}", id, e);
            }
        }))
    }

    fn resolve_companion(&mut self, result: CompanionResult) -> Option<Job> {
        let promise = self.companion.take()?;
        let id = self.id;
        Some(Box::new(move || {
            if let Err(e) = promise.complete(result) {
                log::warn!("Capture {} companion: {}", id, e);
            }
        }))
    }
}

type PendingSlot = Arc<Mutex<Option<PendingCapture>>>;

fn lock(slot: &PendingSlot) -> MutexGuard<'_, Option<PendingCapture>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Issues captures and routes their completions.
pub struct CaptureCoordinator {
    options: CoordinatorOptions,
    context: Arc<dyn DeliveryContext>,
    pending: PendingSlot,
    next_id: AtomicU64,
}

impl std::fmt::Debug for CaptureCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureCoordinator")
            .field("options", &self.options)
            .field("pending", &self.pending_id())
            .finish_non_exhaustive()
    }
}

impl CaptureCoordinator {
    pub fn new(context: Arc<dyn DeliveryContext>, options: CoordinatorOptions) -> Self {
        Self {
            options,
            context,
            pending: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn options(&self) -> CoordinatorOptions {
        self.options
    }

    pub fn set_live_delivery(&mut self, mode: LiveDelivery) {
        self.options.live_delivery = mode;
    }

    /// Id of the capture currently in flight, if any.
    pub fn pending_id(&self) -> Option<u64> {
        lock(&self.pending).as_ref().map(|p| p.id)
    }

    pub fn is_busy(&self) -> bool {
        self.pending_id().is_some()
    }

    /// Drop the in-flight capture, if any. Its continuations never run and
    /// late backend callbacks are discarded.
    pub fn abandon(&self) -> bool {
        let abandoned = lock(&self.pending).take();
        if let Some(p) = &abandoned {
            log::info!("Abandoning capture {}", p.id);
        }
        abandoned.is_some()
    }

    /// Issue a capture whose results are passed to callbacks on the delivery
    /// context. `on_companion` only runs for live captures in split mode.
    pub fn capture_with(
        &self,
        session: &mut Session,
        settings: CaptureSettings,
        on_result: impl FnOnce(CaptureResult) + Send + 'static,
        on_companion: impl FnOnce(CompanionResult) + Send + 'static,
    ) -> Result<u64, CameraError> {
        self.issue(
            session,
            settings,
            Promise::new(on_result),
            Promise::new(on_companion),
        )
    }

    /// Issue a capture and return a handle to await its result.
    pub fn capture(
        &self,
        session: &mut Session,
        settings: CaptureSettings,
    ) -> Result<CaptureHandle, CameraError> {
        let (result_tx, result_rx) = oneshot::channel();
        let (companion_tx, companion_rx) = oneshot::channel();
        let id = self.issue(
            session,
            settings,
            Promise::new(move |result| {
                let _ = result_tx.send(result);
            }),
            Promise::new(move |movie| {
                let _ = companion_tx.send(movie);
            }),
        )?;

        let split = settings.live && self.options.live_delivery == LiveDelivery::Split;
        Ok(CaptureHandle {
            id,
            result: Some(result_rx),
            companion: split.then_some(companion_rx),
        })
    }

    fn issue(
        &self,
        session: &mut Session,
        settings: CaptureSettings,
        primary: Promise<CaptureResult>,
        companion: Promise<CompanionResult>,
    ) -> Result<u64, CameraError> {
        if !session.is_running() || session.output_kind() != Some(OutputKind::Photo) {
            return Err(CameraError::SessionNotReady);
        }
        let device = session.active_input().ok_or(CameraError::SessionNotReady)?;
        if settings.live && !device.capabilities.supports_live_capture {
            return Err(CameraError::InvalidOperation(format!(
                "{} does not support live capture",
                device.name
            )));
        }

        let mode = self.options.live_delivery;
        let id = {
            let mut slot = lock(&self.pending);
            if let Some(pending) = slot.as_ref() {
                log::warn!("Rejecting capture while capture {} is pending", pending.id);
                return Err(CameraError::CaptureInProgress);
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            *slot = Some(PendingCapture {
                id,
                live: settings.live,
                primary: Some(Arc::new(primary)),
                companion: (settings.live && mode == LiveDelivery::Split)
                    .then(|| Arc::new(companion)),
                held_image: None,
                early_movie: None,
            });
            id
        };

        let shared = Arc::clone(&self.pending);
        let context = Arc::clone(&self.context);
        let callback: PhotoCallback = Arc::new(move |event| {
            let jobs = route_event(&shared, mode, id, event);
            for job in jobs {
                context.deliver(job);
            }
        });

        if let Err(e) = session.backend_mut().capture_photo(&settings, callback) {
            let mut slot = lock(&self.pending);
            if slot.as_ref().is_some_and(|p| p.id == id) {
                *slot = None;
            }
            log::warn!("Capture {} rejected by backend: {}", id, e);
            return Err(CameraError::CaptureFailed(e.to_string()));
        }

        if let Some(limit) = self.options.timeout {
            self.arm_timeout(id, limit);
        }

        log::debug!(
            "Capture {} issued (flash {:?}, live {})",
            id,
            settings.flash,
            settings.live
        );
        Ok(id)
    }

    /// Expire capture `id` after `limit` unless it finished first.
    ///
    /// The timer holds only weak references so it never keeps the coordinator
    /// or its delivery context alive.
    fn arm_timeout(&self, id: u64, limit: Duration) {
        let slot = Arc::downgrade(&self.pending);
        let context = Arc::downgrade(&self.context);
        let spawned = std::thread::Builder::new()
            .name(format!("capture-timeout-{}", id))
            .spawn(move || {
                std::thread::sleep(limit);
                let (Some(slot), Some(context)) = (slot.upgrade(), context.upgrade()) else {
                    return;
                };
                for job in expire(&slot, id) {
                    context.deliver(job);
                }
            });
        if let Err(e) = spawned {
            log::warn!("Capture {} has no timeout: {}", id, e);
        }
    }
}

/// Release the slot if it still holds capture `id` and fail what is left.
///
/// In combined mode a still that is already in hand is delivered without its
/// movie.
fn expire(slot: &PendingSlot, id: u64) -> Vec<Job> {
    let mut jobs = Vec::new();
    let mut guard = lock(slot);
    if !guard.as_ref().is_some_and(|p| p.id == id) {
        return jobs;
    }
    let Some(mut pending) = guard.take() else {
        return jobs;
    };
    drop(guard);

    log::warn!("Capture {} timed out; releasing pending slot", id);
    let primary = match pending.held_image.take() {
        Some(bytes) => combine(bytes, Err(CameraError::CaptureTimedOut)),
        None => Err(CameraError::CaptureTimedOut),
    };
    jobs.extend(pending.resolve_companion(Err(CameraError::CaptureTimedOut)));
    jobs.extend(pending.resolve_primary(primary));
    jobs
}

fn classify_image(data: Option<Vec<u8>>, error: Option<String>) -> Result<Vec<u8>, CameraError> {
    if let Some(reason) = error {
        return Err(CameraError::CaptureFailed(reason));
    }
    match data {
        Some(bytes) if looks_like_jpeg(&bytes) => Ok(bytes),
        _ => Err(CameraError::UnknownFailure),
    }
}

fn classify_movie(path: Option<PathBuf>, error: Option<String>) -> CompanionResult {
    if let Some(reason) = error {
        return Err(CameraError::CaptureFailed(reason));
    }
    path.ok_or(CameraError::UnknownFailure)
}

fn combine(data: Vec<u8>, movie: CompanionResult) -> CaptureResult {
    let live_movie = match movie {
        Ok(path) => Some(path),
        Err(e) => {
            log::warn!("Live movie unavailable, delivering still only: {}", e);
            None
        }
    };
    Ok(CapturedPhoto { data, live_movie })
}

/// Apply one backend event to the pending slot and return the jobs to deliver.
fn route_event(slot: &PendingSlot, mode: LiveDelivery, id: u64, event: PhotoEvent) -> Vec<Job> {
    let mut jobs = Vec::new();
    let mut guard = lock(slot);
    let pending = match guard.as_mut() {
        Some(p) if p.id == id => p,
        _ => {
            log::warn!("Dropping late callback for capture {}", id);
            return jobs;
        }
    };

    match event {
        PhotoEvent::ImageProcessed { data, error } => {
            if pending.primary.is_none() || pending.held_image.is_some() {
                log::warn!("Ignoring duplicate image for capture {}", id);
                return jobs;
            }
            match classify_image(data, error) {
                Err(e) => {
                    log::warn!("Capture {} failed: {}", id, e);
                    jobs.extend(pending.resolve_companion(Err(e.clone())));
                    jobs.extend(pending.resolve_primary(Err(e)));
                    pending.early_movie = None;
                }
                Ok(bytes) if !pending.live => {
                    jobs.extend(pending.resolve_primary(Ok(CapturedPhoto {
                        data: bytes,
                        live_movie: None,
                    })));
                }
                Ok(bytes) => match mode {
                    LiveDelivery::Combined => match pending.early_movie.take() {
                        Some(movie) => jobs.extend(pending.resolve_primary(combine(bytes, movie))),
                        None => pending.held_image = Some(bytes),
                    },
                    LiveDelivery::Split => {
                        jobs.extend(pending.resolve_primary(Ok(CapturedPhoto {
                            data: bytes,
                            live_movie: None,
                        })));
                    }
                },
            }
        }
        PhotoEvent::LiveMovieProcessed { path, error } => {
            if !pending.live {
                log::warn!("Ignoring live movie for non-live capture {}", id);
                return jobs;
            }
            let movie = classify_movie(path, error);
            match mode {
                LiveDelivery::Combined => match pending.held_image.take() {
                    Some(bytes) => jobs.extend(pending.resolve_primary(combine(bytes, movie))),
                    None if pending.primary.is_some() && pending.early_movie.is_none() => {
                        pending.early_movie = Some(movie);
                    }
                    None => log::warn!("Ignoring extra live movie for capture {}", id),
                },
                LiveDelivery::Split => match pending.resolve_companion(movie) {
                    Some(job) => jobs.push(job),
                    None => log::warn!("Ignoring extra live movie for capture {}", id),
                },
            }
        }
    }

    if pending.is_finished() {
        *guard = None;
    }
    jobs
}

/// Awaitable results of one capture.
///
/// Dropping the handle does not cancel the capture; the coordinator's timeout
/// still releases the slot.
pub struct CaptureHandle {
    id: u64,
    result: Option<oneshot::Receiver<CaptureResult>>,
    companion: Option<oneshot::Receiver<CompanionResult>>,
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("id", &self.id)
            .field("has_companion", &self.companion.is_some())
            .finish_non_exhaustive()
    }
}

impl CaptureHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True when the live movie is delivered separately.
    pub fn has_companion(&self) -> bool {
        self.companion.is_some()
    }

    /// Wait for the primary result. Resolves with `CaptureTimedOut` once the
    /// coordinator's timeout fires.
    pub async fn wait(&mut self) -> CaptureResult {
        let rx = self.result.take().ok_or(CameraError::AlreadyCompleted)?;
        // Sender dropped: the capture was abandoned with the session.
        rx.await.unwrap_or(Err(CameraError::SessionNotReady))
    }

    /// Wait for the companion movie in split mode. `None` when there is none.
    pub async fn wait_companion(&mut self) -> Option<CompanionResult> {
        let rx = self.companion.take()?;
        Some(rx.await.unwrap_or(Err(CameraError::SessionNotReady)))
    }
}
