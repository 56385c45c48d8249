//! Camera controller: one worker thread per session.
//!
//! Configuration, switching and capture issuance are not safe to interleave,
//! so every operation is sent as a [`Command`] to a single worker thread that
//! owns the [`Session`] and the [`CaptureCoordinator`]. Callers get an async
//! reply for each command and never block on backend configuration.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;

use super::backend::CaptureBackend;
use super::coordinator::{CaptureCoordinator, CaptureHandle, CoordinatorOptions};
use super::device::{default_facing, list_devices};
use super::session::Session;
use super::types::{
    CameraError, CaptureSettings, Device, Facing, FlashMode, OutputKind, SessionState, TorchMode,
};
use crate::dispatch::DeliveryContext;

/// Light source state after a flash/torch toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightState {
    Flash(FlashMode),
    Torch(TorchMode),
}

/// Point-in-time view of the controller's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub device: Option<Device>,
    pub output: Option<OutputKind>,
    pub flash: FlashMode,
    pub torch: TorchMode,
    pub live: bool,
    pub capture_pending: bool,
}

type Reply<T> = oneshot::Sender<Result<T, CameraError>>;

/// Commands sent to the session worker.
enum Command {
    Prepare(Reply<Facing>),
    SwitchCamera(Reply<Facing>),
    SwitchTo(Facing, Reply<()>),
    SetOutputKind(OutputKind, Reply<()>),
    ToggleFlash(Reply<LightState>),
    SetFlash(FlashMode, Reply<()>),
    SetLive(bool, Reply<()>),
    Capture(Reply<CaptureHandle>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Teardown(Reply<()>),
    Shutdown,
}

/// Async handle to a session worker.
pub struct CameraController {
    tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CameraController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraController")
            .field("running", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl CameraController {
    /// Spawn the session worker.
    pub fn spawn(
        backend: Box<dyn CaptureBackend>,
        context: Arc<dyn DeliveryContext>,
        options: CoordinatorOptions,
    ) -> Result<Self, CameraError> {
        let (tx, rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("session-queue".to_string())
            .spawn(move || {
                let mut worker = SessionWorker::new(backend, context, options);
                worker.run(rx);
            })
            .map_err(|e| {
                CameraError::ConfigurationFailed(format!("failed to spawn session worker: {}", e))
            })?;
        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, CameraError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| CameraError::ControllerClosed)?;
        rx.await.map_err(|_| CameraError::ControllerClosed)?
    }

    /// Discover devices, configure the preferred camera with a photo output
    /// and start the session. Returns the facing that was opened.
    pub async fn prepare(&self) -> Result<Facing, CameraError> {
        self.request(Command::Prepare).await
    }

    /// Toggle between front and rear. Returns the new facing.
    pub async fn switch_camera(&self) -> Result<Facing, CameraError> {
        self.request(Command::SwitchCamera).await
    }

    pub async fn switch_to(&self, facing: Facing) -> Result<(), CameraError> {
        self.request(|reply| Command::SwitchTo(facing, reply)).await
    }

    pub async fn set_output_kind(&self, kind: OutputKind) -> Result<(), CameraError> {
        self.request(|reply| Command::SetOutputKind(kind, reply)).await
    }

    /// Flash in photo mode, torch in video mode.
    pub async fn toggle_flash(&self) -> Result<LightState, CameraError> {
        self.request(Command::ToggleFlash).await
    }

    pub async fn set_flash(&self, mode: FlashMode) -> Result<(), CameraError> {
        self.request(|reply| Command::SetFlash(mode, reply)).await
    }

    pub async fn set_live(&self, live: bool) -> Result<(), CameraError> {
        self.request(|reply| Command::SetLive(live, reply)).await
    }

    /// Issue a capture with the current flash and live settings.
    pub async fn capture(&self) -> Result<CaptureHandle, CameraError> {
        self.request(Command::Capture).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, CameraError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply))
            .map_err(|_| CameraError::ControllerClosed)?;
        rx.await.map_err(|_| CameraError::ControllerClosed)
    }

    /// Stop the session and drop any in-flight capture.
    pub async fn teardown(&self) -> Result<(), CameraError> {
        self.request(Command::Teardown).await
    }

    /// Stop the worker thread and wait for it to exit.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct SessionWorker {
    session: Session,
    coordinator: CaptureCoordinator,
    devices: Vec<Device>,
    flash: FlashMode,
    live: bool,
}

impl SessionWorker {
    fn new(
        backend: Box<dyn CaptureBackend>,
        context: Arc<dyn DeliveryContext>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            session: Session::new(backend),
            coordinator: CaptureCoordinator::new(context, options),
            devices: Vec::new(),
            flash: FlashMode::Off,
            live: false,
        }
    }

    fn run(&mut self, rx: Receiver<Command>) {
        for command in rx {
            match command {
                Command::Prepare(reply) => respond(reply, self.prepare()),
                Command::SwitchCamera(reply) => respond(reply, self.switch_camera()),
                Command::SwitchTo(facing, reply) => respond(reply, self.switch_to(facing)),
                Command::SetOutputKind(kind, reply) => respond(reply, self.set_output_kind(kind)),
                Command::ToggleFlash(reply) => respond(reply, self.toggle_flash()),
                Command::SetFlash(mode, reply) => {
                    self.flash = mode;
                    respond(reply, Ok(()));
                }
                Command::SetLive(live, reply) => respond(reply, self.set_live(live)),
                Command::Capture(reply) => respond(reply, self.capture()),
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Teardown(reply) => {
                    self.teardown();
                    respond(reply, Ok(()));
                }
                Command::Shutdown => break,
            }
        }
        self.teardown();
    }

    /// Open the default camera and start it. Calling again after a failed
    /// start retries the start with the configuration already in place.
    fn prepare(&mut self) -> Result<Facing, CameraError> {
        match self.session.state() {
            SessionState::Running => return self.current_facing(),
            SessionState::Configured => {
                self.session.start()?;
                return self.current_facing();
            }
            SessionState::Uninitialized => {}
        }
        self.devices = list_devices(self.session.backend());
        let facing = default_facing(&self.devices).ok_or(CameraError::NoCameraAvailable)?;
        self.session
            .configure_facing(&self.devices, facing, OutputKind::Photo)?;
        self.session.start()?;
        Ok(facing)
    }

    fn current_facing(&self) -> Result<Facing, CameraError> {
        let device = self.session.active_input().ok_or(CameraError::SessionNotReady)?;
        device.facing.ok_or_else(|| {
            CameraError::InvalidOperation(format!("{} has no reported position", device.name))
        })
    }

    fn switch_camera(&mut self) -> Result<Facing, CameraError> {
        let target = self.current_facing()?.flipped();
        self.switch_to(target)?;
        Ok(target)
    }

    fn switch_to(&mut self, facing: Facing) -> Result<(), CameraError> {
        self.session.switch_facing(&self.devices, facing)?;
        if facing == Facing::Front && self.live && !self.active_supports_live() {
            log::info!("Front camera has no live capture; disabling live");
            self.live = false;
        }
        Ok(())
    }

    fn set_output_kind(&mut self, kind: OutputKind) -> Result<(), CameraError> {
        let previous_torch = self.session.torch();
        self.session.set_output_kind(kind)?;
        match kind {
            OutputKind::Video => {
                // Torch follows the flash setting where the device has one.
                if self.flash == FlashMode::On && self.active_has_torch() {
                    if let Err(e) = self.session.set_torch(TorchMode::On) {
                        log::warn!("Could not carry flash over to torch: {}", e);
                    }
                }
            }
            OutputKind::Photo => {
                self.flash = match previous_torch {
                    TorchMode::On => FlashMode::On,
                    TorchMode::Off => FlashMode::Off,
                };
            }
        }
        Ok(())
    }

    fn toggle_flash(&mut self) -> Result<LightState, CameraError> {
        match self.session.output_kind() {
            Some(OutputKind::Photo) => {
                self.flash = match self.flash {
                    FlashMode::On => FlashMode::Off,
                    FlashMode::Off | FlashMode::Auto => FlashMode::On,
                };
                Ok(LightState::Flash(self.flash))
            }
            Some(OutputKind::Video) => {
                let rear = self.current_facing()? == Facing::Rear;
                if !rear || !self.active_has_torch() {
                    log::info!("No torch available on the active camera");
                    return Ok(LightState::Torch(TorchMode::Off));
                }
                let next = match self.session.torch() {
                    TorchMode::On => TorchMode::Off,
                    TorchMode::Off => TorchMode::On,
                };
                self.session.set_torch(next)?;
                Ok(LightState::Torch(next))
            }
            None => Err(CameraError::SessionNotReady),
        }
    }

    fn set_live(&mut self, live: bool) -> Result<(), CameraError> {
        if live && !self.active_supports_live() {
            return Err(CameraError::InvalidOperation(
                "active camera does not support live capture".to_string(),
            ));
        }
        self.live = live;
        Ok(())
    }

    fn capture(&mut self) -> Result<CaptureHandle, CameraError> {
        let settings = CaptureSettings {
            flash: self.flash,
            live: self.live,
        };
        self.coordinator.capture(&mut self.session, settings)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.session.state(),
            device: self.session.active_input().cloned(),
            output: self.session.output_kind(),
            flash: self.flash,
            torch: self.session.torch(),
            live: self.live,
            capture_pending: self.coordinator.is_busy(),
        }
    }

    fn teardown(&mut self) {
        self.coordinator.abandon();
        self.session.stop();
    }

    fn active_has_torch(&self) -> bool {
        self.session
            .active_input()
            .is_some_and(|d| d.capabilities.has_torch)
    }

    fn active_supports_live(&self) -> bool {
        self.session
            .active_input()
            .is_some_and(|d| d.capabilities.supports_live_capture)
    }
}

fn respond<T>(reply: Reply<T>, result: Result<T, CameraError>) {
    if let Err(e) = &result {
        log::warn!("Camera command failed: {}", e);
    }
    let _ = reply.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::VirtualRig;
    use crate::dispatch::Inline;

    fn controller(rig: &VirtualRig) -> CameraController {
        CameraController::spawn(
            Box::new(rig.clone()),
            Arc::new(Inline),
            CoordinatorOptions::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_prepare_opens_rear_camera() {
        let rig = VirtualRig::default_rig();
        let camera = controller(&rig);
        assert_eq!(camera.prepare().await.unwrap(), Facing::Rear);
        let snapshot = camera.snapshot().await.unwrap();
        assert_eq!(snapshot.state, SessionState::Running);
        assert_eq!(snapshot.output, Some(OutputKind::Photo));
        assert_eq!(snapshot.device.unwrap().id, "rig-rear");
    }

    #[tokio::test]
    async fn test_prepare_retries_after_failed_start() {
        let rig = VirtualRig::default_rig();
        rig.fail_start(true);
        let camera = controller(&rig);
        assert!(matches!(
            camera.prepare().await,
            Err(CameraError::ConfigurationFailed(_))
        ));
        assert_eq!(
            camera.snapshot().await.unwrap().state,
            SessionState::Configured
        );

        rig.fail_start(false);
        assert_eq!(camera.prepare().await.unwrap(), Facing::Rear);
        assert!(rig.is_running());
        assert_eq!(rig.inputs(), vec!["rig-rear".to_string()]);

        assert_eq!(camera.prepare().await.unwrap(), Facing::Rear);
    }

    #[tokio::test]
    async fn test_prepare_without_cameras_fails() {
        let rig = VirtualRig::new(Vec::new());
        let camera = controller(&rig);
        assert_eq!(camera.prepare().await, Err(CameraError::NoCameraAvailable));
    }

    #[tokio::test]
    async fn test_switch_camera_toggles_facing() {
        let rig = VirtualRig::default_rig();
        let camera = controller(&rig);
        camera.prepare().await.unwrap();
        assert_eq!(camera.switch_camera().await.unwrap(), Facing::Front);
        assert_eq!(rig.inputs(), vec!["rig-front".to_string()]);
        assert_eq!(camera.switch_camera().await.unwrap(), Facing::Rear);
        assert_eq!(rig.inputs(), vec!["rig-rear".to_string()]);
    }

    #[tokio::test]
    async fn test_toggle_flash_in_photo_mode() {
        let rig = VirtualRig::default_rig();
        let camera = controller(&rig);
        camera.prepare().await.unwrap();
        assert_eq!(
            camera.toggle_flash().await.unwrap(),
            LightState::Flash(FlashMode::On)
        );
        assert_eq!(
            camera.toggle_flash().await.unwrap(),
            LightState::Flash(FlashMode::Off)
        );
    }

    #[tokio::test]
    async fn test_video_mode_torch_follows_flash_and_front_has_none() {
        let rig = VirtualRig::default_rig();
        let camera = controller(&rig);
        camera.prepare().await.unwrap();
        camera.set_flash(FlashMode::On).await.unwrap();
        camera.set_output_kind(OutputKind::Video).await.unwrap();
        assert_eq!(camera.snapshot().await.unwrap().torch, TorchMode::On);

        camera.switch_to(Facing::Front).await.unwrap();
        assert_eq!(camera.snapshot().await.unwrap().torch, TorchMode::Off);
        assert_eq!(
            camera.toggle_flash().await.unwrap(),
            LightState::Torch(TorchMode::Off)
        );
    }

    #[tokio::test]
    async fn test_back_to_photo_carries_torch_into_flash() {
        let rig = VirtualRig::default_rig();
        let camera = controller(&rig);
        camera.prepare().await.unwrap();
        camera.set_output_kind(OutputKind::Video).await.unwrap();
        assert_eq!(
            camera.toggle_flash().await.unwrap(),
            LightState::Torch(TorchMode::On)
        );
        camera.set_output_kind(OutputKind::Photo).await.unwrap();
        let snapshot = camera.snapshot().await.unwrap();
        assert_eq!(snapshot.flash, FlashMode::On);
        assert_eq!(snapshot.torch, TorchMode::Off);
    }

    #[tokio::test]
    async fn test_capture_uses_current_flash() {
        let rig = VirtualRig::default_rig();
        let camera = controller(&rig);
        camera.prepare().await.unwrap();
        camera.set_flash(FlashMode::On).await.unwrap();
        let mut handle = camera.capture().await.unwrap();
        assert!(handle.wait().await.is_ok());
        assert!(rig
            .journal()
            .contains(&crate::camera::RigOp::Capture(CaptureSettings {
                flash: FlashMode::On,
                live: false,
            })));
    }

    #[tokio::test]
    async fn test_teardown_stops_session() {
        let rig = VirtualRig::default_rig();
        let camera = controller(&rig);
        camera.prepare().await.unwrap();
        camera.teardown().await.unwrap();
        assert!(!rig.is_running());
        assert_eq!(
            camera.snapshot().await.unwrap().state,
            SessionState::Uninitialized
        );
        assert!(matches!(
            camera.capture().await,
            Err(CameraError::SessionNotReady)
        ));
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_report_closed() {
        let rig = VirtualRig::default_rig();
        let mut camera = controller(&rig);
        camera.shutdown();
        assert_eq!(camera.prepare().await, Err(CameraError::ControllerClosed));
    }
}
