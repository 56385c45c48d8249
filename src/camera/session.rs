//! Capture session configuration.
//!
//! A [`Session`] owns the backend and tracks the single active input and the
//! single active output. Every mutation runs inside a [`Transaction`], which
//! begins a backend configuration block on creation and commits it when
//! dropped, so early returns and rollbacks still commit.

use std::ops::{Deref, DerefMut};

use super::backend::CaptureBackend;
use super::device::select;
use super::types::{
    CameraError, Device, Facing, FocusMode, OutputKind, SessionState, TorchMode,
};

/// Scoped configuration block. Commits on drop.
pub struct Transaction<'a> {
    backend: &'a mut dyn CaptureBackend,
}

impl<'a> Transaction<'a> {
    pub fn begin(backend: &'a mut dyn CaptureBackend) -> Self {
        backend.begin_configuration();
        Self { backend }
    }
}

impl<'a> Deref for Transaction<'a> {
    type Target = dyn CaptureBackend + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.backend
    }
}

impl<'a> DerefMut for Transaction<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.backend
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.backend.commit_configuration();
    }
}

/// Camera pipeline aggregate: at most one input, at most one output.
pub struct Session {
    backend: Box<dyn CaptureBackend>,
    state: SessionState,
    input: Option<Device>,
    output: Option<OutputKind>,
    torch: TorchMode,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("input", &self.input.as_ref().map(|d| &d.id))
            .field("output", &self.output)
            .field("torch", &self.torch)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(backend: Box<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            state: SessionState::Uninitialized,
            input: None,
            output: None,
            torch: TorchMode::Off,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn active_input(&self) -> Option<&Device> {
        self.input.as_ref()
    }

    pub fn output_kind(&self) -> Option<OutputKind> {
        self.output
    }

    pub fn torch(&self) -> TorchMode {
        self.torch
    }

    pub fn backend(&self) -> &dyn CaptureBackend {
        self.backend.as_ref()
    }

    pub(crate) fn backend_mut(&mut self) -> &mut dyn CaptureBackend {
        self.backend.as_mut()
    }

    /// Attach `device` and an output of `kind` in one transaction.
    ///
    /// Only legal from `Uninitialized`. On failure nothing stays attached.
    pub fn configure(&mut self, device: &Device, kind: OutputKind) -> Result<(), CameraError> {
        match self.state {
            SessionState::Uninitialized => {}
            SessionState::Configured => {
                return Err(CameraError::InvalidOperation(
                    "session is already configured".to_string(),
                ))
            }
            SessionState::Running => return Err(CameraError::SessionAlreadyRunning),
        }

        let mut tx = Transaction::begin(self.backend.as_mut());
        tx.add_input(device)
            .map_err(|e| CameraError::ConfigurationFailed(e.to_string()))?;
        if let Err(e) = tx.add_output(kind) {
            tx.remove_input(&device.id);
            return Err(CameraError::ConfigurationFailed(e.to_string()));
        }
        tx.set_preset(kind.preset());
        if device.facing == Some(Facing::Rear) {
            request_continuous_focus(&mut *tx, device);
        }
        drop(tx);

        log::info!("Session configured with {} and {} output", device, kind);
        self.input = Some(device.clone());
        self.output = Some(kind);
        self.torch = TorchMode::Off;
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Select the first device with `facing` and configure with it.
    pub fn configure_facing(
        &mut self,
        devices: &[Device],
        facing: Facing,
        kind: OutputKind,
    ) -> Result<(), CameraError> {
        let device = select(devices, facing).ok_or(CameraError::NoCameraAvailable)?;
        self.configure(&device, kind)
    }

    /// Start delivering frames. Configured → Running.
    pub fn start(&mut self) -> Result<(), CameraError> {
        match self.state {
            SessionState::Uninitialized => return Err(CameraError::SessionNotReady),
            SessionState::Running => return Err(CameraError::SessionAlreadyRunning),
            SessionState::Configured => {}
        }
        self.backend
            .start_running()
            .map_err(|e| CameraError::ConfigurationFailed(e.to_string()))?;
        self.state = SessionState::Running;
        log::info!("Capture session running");
        Ok(())
    }

    /// Stop the pipeline and detach everything. Any state → Uninitialized.
    ///
    /// Also the fallback when a failed switch cannot restore what it removed.
    pub fn stop(&mut self) {
        if self.state == SessionState::Uninitialized {
            return;
        }
        if self.state == SessionState::Running {
            self.backend.stop_running();
        }

        let mut tx = Transaction::begin(self.backend.as_mut());
        if let Some(output) = self.output.take() {
            tx.remove_output(output);
        }
        if let Some(input) = self.input.take() {
            tx.remove_input(&input.id);
        }
        drop(tx);

        self.torch = TorchMode::Off;
        self.state = SessionState::Uninitialized;
        log::info!("Capture session torn down");
    }

    /// Replace the active input with `device`.
    ///
    /// If the new input cannot be attached the previous one is re-attached and
    /// the session is left exactly as it was.
    pub fn switch_device(&mut self, device: &Device) -> Result<(), CameraError> {
        let current = match (&self.state, &self.input) {
            (SessionState::Uninitialized, _) | (_, None) => {
                return Err(CameraError::SessionNotReady)
            }
            (_, Some(current)) => current.clone(),
        };
        if current.id == device.id {
            return Ok(());
        }

        let mut tx = Transaction::begin(self.backend.as_mut());
        if self.torch == TorchMode::On {
            if let Err(e) = tx.set_torch_mode(&current.id, TorchMode::Off) {
                log::warn!("Failed to turn torch off on {}: {}", current.id, e);
            }
        }
        tx.remove_input(&current.id);
        if let Err(e) = tx.add_input(device) {
            log::warn!("Switch to {} failed, restoring {}: {}", device.id, current.id, e);
            if let Err(restore) = tx.add_input(&current) {
                log::error!("Failed to restore input {}: {}", current.id, restore);
                drop(tx);
                self.input = None;
                self.stop();
                return Err(CameraError::ConfigurationFailed(format!(
                    "{}; input {} could not be restored: {}",
                    e, current.id, restore
                )));
            }
            return Err(CameraError::ConfigurationFailed(e.to_string()));
        }
        if device.facing == Some(Facing::Rear) {
            request_continuous_focus(&mut *tx, device);
        }
        drop(tx);

        log::info!("Switched camera input to {}", device);
        self.input = Some(device.clone());
        self.torch = TorchMode::Off;
        Ok(())
    }

    /// Switch to the first device with `facing`.
    pub fn switch_facing(&mut self, devices: &[Device], facing: Facing) -> Result<(), CameraError> {
        let device = select(devices, facing).ok_or_else(|| {
            CameraError::InvalidOperation(format!("no {} camera available", facing))
        })?;
        self.switch_device(&device)
    }

    /// Move the session to `kind`, detaching the other output first.
    pub fn set_output_kind(&mut self, kind: OutputKind) -> Result<(), CameraError> {
        let current = match (&self.state, self.output) {
            (SessionState::Uninitialized, _) | (_, None) => {
                return Err(CameraError::SessionNotReady)
            }
            (_, Some(current)) => current,
        };
        if current == kind {
            return Ok(());
        }

        let torch_device = (self.torch == TorchMode::On)
            .then(|| self.input.as_ref().map(|d| d.id.clone()))
            .flatten();

        let mut tx = Transaction::begin(self.backend.as_mut());
        tx.remove_output(current);
        if let Err(e) = tx.add_output(kind) {
            log::warn!("Switch to {} output failed, restoring {}: {}", kind, current, e);
            if let Err(restore) = tx.add_output(current) {
                log::error!("Failed to restore {} output: {}", current, restore);
                drop(tx);
                self.output = None;
                self.stop();
                return Err(CameraError::ConfigurationFailed(format!(
                    "{}; {} output could not be restored: {}",
                    e, current, restore
                )));
            }
            return Err(CameraError::ConfigurationFailed(e.to_string()));
        }
        tx.set_preset(kind.preset());
        if let Some(device_id) = torch_device {
            if let Err(e) = tx.set_torch_mode(&device_id, TorchMode::Off) {
                log::warn!("Failed to turn torch off on {}: {}", device_id, e);
            }
        }
        drop(tx);

        log::info!("Session output switched from {} to {}", current, kind);
        self.output = Some(kind);
        self.torch = TorchMode::Off;
        Ok(())
    }

    /// Turn the torch on or off. Only valid while recording video on a device
    /// with a torch.
    pub fn set_torch(&mut self, mode: TorchMode) -> Result<(), CameraError> {
        if self.output != Some(OutputKind::Video) {
            return Err(CameraError::InvalidOperation(
                "torch is only available in video mode".to_string(),
            ));
        }
        let device = self.input.as_ref().ok_or(CameraError::SessionNotReady)?;
        if mode == TorchMode::On && !device.capabilities.has_torch {
            return Err(CameraError::InvalidOperation(format!(
                "{} has no torch",
                device.name
            )));
        }
        self.backend
            .set_torch_mode(&device.id, mode)
            .map_err(|e| CameraError::ConfigurationFailed(e.to_string()))?;
        self.torch = mode;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn request_continuous_focus(backend: &mut dyn CaptureBackend, device: &Device) {
    if let Err(e) = backend.set_focus_mode(&device.id, FocusMode::ContinuousAutoFocus) {
        log::warn!("Continuous autofocus unavailable on {}: {}", device.id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::virtual_rig::{RigOp, VirtualRig};
    use crate::camera::SessionPreset;

    fn running_session() -> (Session, VirtualRig, Vec<Device>) {
        let rig = VirtualRig::default_rig();
        let devices = rig.discover_devices();
        let mut session = Session::new(Box::new(rig.clone()));
        session
            .configure_facing(&devices, Facing::Rear, OutputKind::Photo)
            .unwrap();
        session.start().unwrap();
        (session, rig, devices)
    }

    #[test]
    fn test_configure_then_start() {
        let (session, rig, _) = running_session();
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(rig.inputs(), vec!["rig-rear".to_string()]);
        assert_eq!(rig.outputs(), vec![OutputKind::Photo]);
        assert_eq!(rig.preset(), Some(SessionPreset::Photo));
        assert!(rig.is_running());
        assert!(!rig.in_transaction());
        assert!(rig.violations().is_empty());
    }

    #[test]
    fn test_configure_rear_requests_continuous_focus() {
        let (_session, rig, _) = running_session();
        assert!(rig.journal().contains(&RigOp::Focus(
            "rig-rear".to_string(),
            FocusMode::ContinuousAutoFocus
        )));
    }

    #[test]
    fn test_start_before_configure_is_not_ready() {
        let mut session = Session::new(Box::new(VirtualRig::default_rig()));
        assert_eq!(session.start(), Err(CameraError::SessionNotReady));
    }

    #[test]
    fn test_start_twice_fails() {
        let (mut session, _, _) = running_session();
        assert_eq!(session.start(), Err(CameraError::SessionAlreadyRunning));
    }

    #[test]
    fn test_failed_start_stays_configured() {
        let rig = VirtualRig::default_rig();
        rig.fail_start(true);
        let devices = rig.discover_devices();
        let mut session = Session::new(Box::new(rig.clone()));
        session.configure(&devices[0], OutputKind::Photo).unwrap();
        assert!(matches!(
            session.start(),
            Err(CameraError::ConfigurationFailed(_))
        ));
        assert_eq!(session.state(), SessionState::Configured);
    }

    #[test]
    fn test_configure_output_failure_detaches_input() {
        let rig = VirtualRig::default_rig();
        rig.reject_output(OutputKind::Photo);
        let devices = rig.discover_devices();
        let mut session = Session::new(Box::new(rig.clone()));
        let result = session.configure(&devices[0], OutputKind::Photo);
        assert!(matches!(result, Err(CameraError::ConfigurationFailed(_))));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(rig.inputs().is_empty());
        assert!(!rig.in_transaction());
    }

    #[test]
    fn test_stop_detaches_everything() {
        let (mut session, rig, _) = running_session();
        session.stop();
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(rig.inputs().is_empty());
        assert!(rig.outputs().is_empty());
        assert!(!rig.is_running());
    }

    #[test]
    fn test_drop_tears_down_session() {
        let (session, rig, _) = running_session();
        drop(session);
        assert!(!rig.is_running());
        assert!(rig.inputs().is_empty());
    }

    #[test]
    fn test_switch_to_same_device_is_noop() {
        let (mut session, rig, devices) = running_session();
        rig.clear_journal();
        session.switch_device(&devices[0]).unwrap();
        assert!(rig.journal().is_empty());
    }

    #[test]
    fn test_torch_requires_video_output() {
        let (mut session, _, _) = running_session();
        assert!(matches!(
            session.set_torch(TorchMode::On),
            Err(CameraError::InvalidOperation(_))
        ));
        session.set_output_kind(OutputKind::Video).unwrap();
        session.set_torch(TorchMode::On).unwrap();
        assert_eq!(session.torch(), TorchMode::On);
    }

    #[test]
    fn test_leaving_video_turns_torch_off() {
        let (mut session, rig, _) = running_session();
        session.set_output_kind(OutputKind::Video).unwrap();
        session.set_torch(TorchMode::On).unwrap();
        session.set_output_kind(OutputKind::Photo).unwrap();
        assert_eq!(session.torch(), TorchMode::Off);
        assert_eq!(
            rig.journal().last().cloned(),
            Some(RigOp::Commit),
        );
        assert!(rig
            .journal()
            .contains(&RigOp::Torch("rig-rear".to_string(), TorchMode::Off)));
    }
}
