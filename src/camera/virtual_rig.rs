//! In-process capture backend.
//!
//! `VirtualRig` behaves like a small phone camera stack: it enforces the
//! framework's one-input/one-output rule, only accepts mutations inside a
//! configuration transaction, and delivers capture results from its own
//! thread. Clones share state, so a test (or the CLI) can keep a handle to
//! script captures and inspect the operation journal after handing the rig to
//! a session.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::backend::{BackendError, CaptureBackend, PhotoCallback, PhotoEvent};
use super::types::{
    Capabilities, CaptureSettings, Device, Facing, FocusMode, OutputKind, SessionPreset,
    TorchMode,
};

/// JFIF header followed by an end-of-image marker. Stands in for a frame
/// when no still file is supplied.
pub const PLACEHOLDER_STILL: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xD9,
];

/// QuickTime `ftyp` box. Written as the companion movie of unscripted live
/// captures.
pub const PLACEHOLDER_MOVIE: &[u8] = &[
    0x00, 0x00, 0x00, 0x14, b'f', b't', b'y', b'p', b'q', b't', b' ', b' ', 0x00, 0x00, 0x00,
    0x00, b'q', b't', b' ', b' ',
];

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RigOp {
    Begin,
    Commit,
    AddInput(String),
    RemoveInput(String),
    AddOutput(OutputKind),
    RemoveOutput(OutputKind),
    Preset(SessionPreset),
    Focus(String, FocusMode),
    Torch(String, TorchMode),
    Start,
    Stop,
    Capture(CaptureSettings),
}

/// How the rig answers the next capture.
#[derive(Debug, Clone)]
pub enum CaptureScript {
    /// Deliver these bytes as the processed image
    Still(Vec<u8>),
    /// Deliver a still and a companion movie as two separate events
    Live {
        still: Vec<u8>,
        movie: PathBuf,
        movie_first: bool,
    },
    /// Deliver an error with no data
    Fail(String),
    /// Deliver neither data nor error
    Empty,
    /// Keep the callback until [`VirtualRig::release_held`] is called
    Hold,
    /// Deliver the same still twice
    Duplicate(Vec<u8>),
    /// Reject the capture call synchronously
    Refuse(String),
}

#[derive(Debug, Default)]
struct RigState {
    devices: Vec<Device>,
    journal: Vec<RigOp>,
    violations: Vec<String>,
    inputs: Vec<String>,
    outputs: Vec<OutputKind>,
    transaction_depth: u32,
    running: bool,
    rejected_inputs: HashSet<String>,
    rejected_outputs: HashSet<OutputKind>,
    fail_start: bool,
    scripts: VecDeque<CaptureScript>,
    default_still: Vec<u8>,
    delivery_delay: Duration,
    preset: Option<SessionPreset>,
}

/// Scriptable [`CaptureBackend`] with shared, inspectable state.
#[derive(Clone)]
pub struct VirtualRig {
    state: Arc<Mutex<RigState>>,
    held: Arc<Mutex<Vec<PhotoCallback>>>,
}

impl std::fmt::Debug for VirtualRig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("VirtualRig")
            .field("devices", &state.devices.len())
            .field("inputs", &state.inputs)
            .field("outputs", &state.outputs)
            .field("running", &state.running)
            .finish_non_exhaustive()
    }
}

impl VirtualRig {
    pub fn new(devices: Vec<Device>) -> Self {
        let state = RigState {
            devices,
            default_still: PLACEHOLDER_STILL.to_vec(),
            ..RigState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            held: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A rear camera with torch and live support plus a front camera.
    pub fn default_rig() -> Self {
        Self::new(vec![Self::rear_camera(), Self::front_camera()])
    }

    pub fn rear_camera() -> Device {
        Device::new("rig-rear", "Virtual Back Camera", Facing::Rear).with_capabilities(
            Capabilities {
                has_torch: true,
                supports_live_capture: true,
                supports_high_resolution: true,
            },
        )
    }

    pub fn front_camera() -> Device {
        Device::new("rig-front", "Virtual Front Camera", Facing::Front).with_capabilities(
            Capabilities {
                has_torch: false,
                supports_live_capture: true,
                supports_high_resolution: false,
            },
        )
    }

    fn state(&self) -> MutexGuard<'_, RigState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bytes delivered when no script is queued. Live captures pair them
    /// with [`PLACEHOLDER_MOVIE`] written to the temp directory.
    pub fn set_still(&self, still: Vec<u8>) {
        self.state().default_still = still;
    }

    pub fn push_script(&self, script: CaptureScript) {
        self.state().scripts.push_back(script);
    }

    /// Make `add_input` fail for this device.
    pub fn reject_input(&self, device_id: &str) {
        self.state().rejected_inputs.insert(device_id.to_string());
    }

    pub fn reject_output(&self, kind: OutputKind) {
        self.state().rejected_outputs.insert(kind);
    }

    pub fn fail_start(&self, fail: bool) {
        self.state().fail_start = fail;
    }

    /// Delay before the capture thread delivers results.
    pub fn set_delivery_delay(&self, delay: Duration) {
        self.state().delivery_delay = delay;
    }

    pub fn journal(&self) -> Vec<RigOp> {
        self.state().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }

    /// Mutations attempted outside a configuration transaction.
    pub fn violations(&self) -> Vec<String> {
        self.state().violations.clone()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.state().inputs.clone()
    }

    pub fn outputs(&self) -> Vec<OutputKind> {
        self.state().outputs.clone()
    }

    pub fn preset(&self) -> Option<SessionPreset> {
        self.state().preset
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn in_transaction(&self) -> bool {
        self.state().transaction_depth > 0
    }

    /// Deliver `event` to every held callback on the calling thread.
    /// Returns how many callbacks were fired.
    pub fn release_held(&self, event: PhotoEvent) -> usize {
        let held: Vec<PhotoCallback> = self
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for callback in &held {
            callback(event.clone());
        }
        held.len()
    }

    fn record(&self, op: RigOp) {
        self.state().journal.push(op);
    }

    fn guard_mutation(&self, what: &str) {
        let mut state = self.state();
        if state.transaction_depth == 0 {
            log::warn!("VirtualRig: {} outside configuration transaction", what);
            state.violations.push(what.to_string());
        }
    }
}

impl CaptureBackend for VirtualRig {
    fn discover_devices(&self) -> Vec<Device> {
        self.state().devices.clone()
    }

    fn begin_configuration(&mut self) {
        let mut state = self.state();
        state.transaction_depth += 1;
        state.journal.push(RigOp::Begin);
    }

    fn commit_configuration(&mut self) {
        let mut state = self.state();
        state.transaction_depth = state.transaction_depth.saturating_sub(1);
        state.journal.push(RigOp::Commit);
    }

    fn add_input(&mut self, device: &Device) -> Result<(), BackendError> {
        self.guard_mutation("add_input");
        let mut state = self.state();
        state.journal.push(RigOp::AddInput(device.id.clone()));
        if state.rejected_inputs.contains(&device.id) {
            return Err(BackendError::new(format!(
                "cannot add input for device {}",
                device.id
            )));
        }
        if !state.devices.iter().any(|d| d.id == device.id) {
            return Err(BackendError::new(format!("unknown device {}", device.id)));
        }
        if !state.inputs.is_empty() {
            return Err(BackendError::new("session already has an input"));
        }
        state.inputs.push(device.id.clone());
        Ok(())
    }

    fn remove_input(&mut self, device_id: &str) {
        self.guard_mutation("remove_input");
        let mut state = self.state();
        state.journal.push(RigOp::RemoveInput(device_id.to_string()));
        state.inputs.retain(|id| id != device_id);
    }

    fn add_output(&mut self, kind: OutputKind) -> Result<(), BackendError> {
        self.guard_mutation("add_output");
        let mut state = self.state();
        state.journal.push(RigOp::AddOutput(kind));
        if state.rejected_outputs.contains(&kind) {
            return Err(BackendError::new(format!("cannot add {} output", kind)));
        }
        if !state.outputs.is_empty() {
            return Err(BackendError::new("session already has an output"));
        }
        state.outputs.push(kind);
        Ok(())
    }

    fn remove_output(&mut self, kind: OutputKind) {
        self.guard_mutation("remove_output");
        let mut state = self.state();
        state.journal.push(RigOp::RemoveOutput(kind));
        state.outputs.retain(|k| *k != kind);
    }

    fn set_preset(&mut self, preset: SessionPreset) {
        self.guard_mutation("set_preset");
        let mut state = self.state();
        state.journal.push(RigOp::Preset(preset));
        state.preset = Some(preset);
    }

    fn set_focus_mode(&mut self, device_id: &str, mode: FocusMode) -> Result<(), BackendError> {
        self.record(RigOp::Focus(device_id.to_string(), mode));
        Ok(())
    }

    fn set_torch_mode(&mut self, device_id: &str, mode: TorchMode) -> Result<(), BackendError> {
        let state = self.state();
        let has_torch = state
            .devices
            .iter()
            .any(|d| d.id == device_id && d.capabilities.has_torch);
        drop(state);
        self.record(RigOp::Torch(device_id.to_string(), mode));
        if mode == TorchMode::On && !has_torch {
            return Err(BackendError::new(format!("device {} has no torch", device_id)));
        }
        Ok(())
    }

    fn start_running(&mut self) -> Result<(), BackendError> {
        let mut state = self.state();
        state.journal.push(RigOp::Start);
        if state.fail_start {
            return Err(BackendError::new("pipeline failed to start"));
        }
        state.running = true;
        Ok(())
    }

    fn stop_running(&mut self) {
        let mut state = self.state();
        state.journal.push(RigOp::Stop);
        state.running = false;
    }

    fn capture_photo(
        &mut self,
        settings: &CaptureSettings,
        on_event: PhotoCallback,
    ) -> Result<(), BackendError> {
        let (script, delay) = {
            let mut state = self.state();
            state.journal.push(RigOp::Capture(*settings));
            if !state.running {
                return Err(BackendError::new("pipeline is not running"));
            }
            let script = match state.scripts.pop_front() {
                Some(script) => script,
                None if settings.live => CaptureScript::Live {
                    still: state.default_still.clone(),
                    movie: placeholder_movie_path(),
                    movie_first: false,
                },
                None => CaptureScript::Still(state.default_still.clone()),
            };
            (script, state.delivery_delay)
        };

        let events = match script {
            CaptureScript::Refuse(reason) => return Err(BackendError::new(reason)),
            CaptureScript::Hold => {
                self.held
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(on_event);
                return Ok(());
            }
            CaptureScript::Still(data) => vec![image(Some(data), None)],
            CaptureScript::Duplicate(data) => {
                vec![image(Some(data.clone()), None), image(Some(data), None)]
            }
            CaptureScript::Fail(reason) => vec![image(None, Some(reason))],
            CaptureScript::Empty => vec![image(None, None)],
            CaptureScript::Live {
                still,
                movie,
                movie_first,
            } => {
                let still = image(Some(still), None);
                let movie = match write_placeholder_movie(&movie) {
                    Ok(()) => PhotoEvent::LiveMovieProcessed {
                        path: Some(movie),
                        error: None,
                    },
                    Err(e) => PhotoEvent::LiveMovieProcessed {
                        path: None,
                        error: Some(format!("failed to write {}: {}", movie.display(), e)),
                    },
                };
                if movie_first {
                    vec![movie, still]
                } else {
                    vec![still, movie]
                }
            }
        };

        thread::Builder::new()
            .name("rig-capture".to_string())
            .spawn(move || {
                for event in events {
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    on_event(event);
                }
            })
            .map_err(|e| BackendError::new(format!("failed to spawn capture thread: {}", e)))?;
        Ok(())
    }
}

fn placeholder_movie_path() -> PathBuf {
    std::env::temp_dir().join("glitters-rig-live.mov")
}

/// Scripted movie paths are taken as given; only the placeholder is written.
fn write_placeholder_movie(path: &Path) -> std::io::Result<()> {
    if path == placeholder_movie_path() {
        std::fs::write(path, PLACEHOLDER_MOVIE)?;
    }
    Ok(())
}

fn image(data: Option<Vec<u8>>, error: Option<String>) -> PhotoEvent {
    PhotoEvent::ImageProcessed { data, error }
}
