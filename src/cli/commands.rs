//! Subcommand handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use glitters::analysis::{AnalysisClient, AnalysisScreen, Phase, ScreenModel};
use glitters::audio::{RecordingSession, VirtualRecorder, PLACEHOLDER_AUDIO};
use glitters::camera::{
    list_devices, CameraController, CameraError, CapturedPhoto, CoordinatorOptions, Facing,
    FlashMode, LiveDelivery, VirtualRig,
};
use glitters::config::Config;
use glitters::dispatch::{Inline, MainQueue, MainQueueHandle};
use glitters::library::{DirectoryLibrary, PhotoLibrary};
use glitters::permissions::{
    print_permission_errors, AuthorizationStatus, PermissionGate, PermissionType,
    StaticPermissions,
};

use super::args::{LibraryAction, PermissionArg, RigLayout};

/// Options for the capture subcommand.
#[derive(Debug)]
pub struct CaptureOptions {
    pub rig: RigLayout,
    pub facing: Option<Facing>,
    pub flash: Option<FlashMode>,
    pub live: bool,
    pub live_delivery: Option<LiveDelivery>,
    pub still: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub save: bool,
    pub analyze: bool,
}

/// Permission gate where everything is granted except `deny`.
pub fn permission_gate(deny: &[PermissionArg]) -> PermissionGate<StaticPermissions> {
    let provider = deny.iter().fold(StaticPermissions::granted_all(), |p, arg| {
        p.with(PermissionType::from(*arg), AuthorizationStatus::Denied)
    });
    PermissionGate::new(provider)
}

fn require(
    gate: &PermissionGate<StaticPermissions>,
    permission: PermissionType,
) -> Result<(), String> {
    gate.ensure(permission).map_err(|e| {
        print_permission_errors(std::slice::from_ref(&e));
        e.to_string()
    })
}

fn analysis_client(config: &Config) -> Result<AnalysisClient, String> {
    AnalysisClient::with_options(config.upload.resolved_endpoint(), config.upload.timeout())
        .map_err(|e| format!("Failed to create analysis client: {}", e))
}

fn photo_library(config: &Config) -> DirectoryLibrary {
    match &config.library.dir {
        Some(dir) => DirectoryLibrary::new(dir.clone()),
        None => DirectoryLibrary::with_default_dir(),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("Failed to create async runtime: {}", e))
}

/// Print the analysis result or the alerts raised by the attempt.
fn present(screen: &AnalysisScreen) {
    if let Phase::Showing(response) = screen.phase() {
        println!();
        println!("{}", response.title);
        println!("{}", response.text);
    }
    for alert in screen.alerts() {
        eprintln!();
        eprintln!("{}", alert.title());
        eprintln!("  {}", alert.message());
    }
}

/// List the cameras of the virtual rig and print them to stdout.
pub fn list_cameras(rig: RigLayout) {
    let rig = rig.build();
    let devices = list_devices(&rig);
    if devices.is_empty() {
        println!("No cameras found.");
    } else {
        println!("Available cameras:");
        for device in devices {
            println!("  {}", device);
        }
    }
}

/// Run one capture through a full session lifecycle.
pub fn run_capture(
    config: &Config,
    gate: &PermissionGate<StaticPermissions>,
    opts: CaptureOptions,
) -> Result<(), String> {
    require(gate, PermissionType::Camera)?;

    let rig = opts.rig.build();
    if let Some(ref still) = opts.still {
        let data = std::fs::read(still)
            .map_err(|e| format!("Failed to read still '{}': {}", still.display(), e))?;
        rig.set_still(data);
    }

    let mut options = config.camera.coordinator_options();
    if let Some(mode) = opts.live_delivery {
        options.live_delivery = mode;
    }

    let queue = MainQueue::spawn("main-queue")
        .map_err(|e| format!("Failed to start main queue: {}", e))?;
    let main = queue.handle();
    let screen = ScreenModel::new(Arc::new(main.clone()));

    let rt = runtime()?;
    let result = rt.block_on(async {
        let photo = match take_photo(&rig, &main, options, config, &opts).await {
            Ok(photo) => photo,
            Err(e) => {
                let message = format!("Capture failed: {}", e);
                screen.apply(move |s| s.report_capture_failure(&e));
                main.sync();
                present(&screen.lock());
                return Err(message);
            }
        };

        println!("Captured {} bytes", photo.data.len());
        if let Some(ref movie) = photo.live_movie {
            println!("Live movie: {}", movie.display());
        }

        if let Some(ref output) = opts.output {
            std::fs::write(output, &photo.data)
                .map_err(|e| format!("Failed to write '{}': {}", output.display(), e))?;
            println!("Wrote {}", output.display());
        }

        if opts.save {
            require(gate, PermissionType::PhotoLibrary)?;
            let library = photo_library(config);
            let path = library
                .save_image(&photo.data)
                .map_err(|e| format!("Failed to save photo: {}", e))?;
            println!("Saved to library: {}", path.display());
        }

        let data = photo.data.clone();
        screen.apply(move |s| s.accept_capture(Ok(photo)));

        if opts.analyze {
            let client = analysis_client(config)?;
            println!("Uploading to {}...", client.endpoint());
            let outcome = screen.analyze_photo(&client, data).await;
            main.sync();
            present(&screen.lock());
            outcome.map_err(|e| format!("Analysis failed: {}", e))?;
        }

        screen.teardown();
        Ok::<(), String>(())
    });

    main.sync();
    drop(screen);
    drop(main);
    queue.shutdown();
    result
}

async fn take_photo(
    rig: &VirtualRig,
    main: &MainQueueHandle,
    options: CoordinatorOptions,
    config: &Config,
    opts: &CaptureOptions,
) -> Result<CapturedPhoto, CameraError> {
    let mut controller =
        CameraController::spawn(Box::new(rig.clone()), Arc::new(main.clone()), options)?;

    let outcome = async {
        let opened = controller.prepare().await?;
        log::info!("Opened {} camera", opened);

        if let Some(facing) = opts.facing.or(config.camera.facing) {
            if facing != opened {
                controller.switch_to(facing).await?;
            }
        }
        controller
            .set_flash(opts.flash.unwrap_or(config.camera.flash))
            .await?;
        if opts.live || config.camera.live {
            controller.set_live(true).await?;
        }

        let mut capture = controller.capture().await?;
        let mut photo = capture.wait().await?;
        if capture.has_companion() {
            match capture.wait_companion().await {
                Some(Ok(movie)) => photo.live_movie = Some(movie),
                Some(Err(e)) => log::warn!("Live movie failed: {}", e),
                None => {}
            }
        }
        Ok::<CapturedPhoto, CameraError>(photo)
    }
    .await;

    if let Err(e) = controller.teardown().await {
        log::warn!("Teardown failed: {}", e);
    }
    controller.shutdown();
    outcome
}

/// Upload a JPEG file for analysis.
pub fn run_analyze_photo(config: &Config, path: &Path) -> Result<(), String> {
    let data = std::fs::read(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    let client = analysis_client(config)?;
    let screen = ScreenModel::new(Arc::new(Inline));

    let rt = runtime()?;
    let outcome = rt.block_on(screen.analyze_photo(&client, data));
    present(&screen.lock());
    outcome
        .map(|_| ())
        .map_err(|e| format!("Analysis failed: {}", e))
}

/// Upload an audio file for analysis.
pub fn run_analyze_audio(config: &Config, path: &Path) -> Result<(), String> {
    let data = std::fs::read(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    let client = analysis_client(config)?;
    let screen = ScreenModel::new(Arc::new(Inline));

    let rt = runtime()?;
    let outcome = rt.block_on(screen.analyze_audio(&client, data));
    present(&screen.lock());
    outcome
        .map(|_| ())
        .map_err(|e| format!("Analysis failed: {}", e))
}

/// Record a clip, showing progress, then upload it unless `no_upload`.
pub fn run_record_audio(
    config: &Config,
    gate: PermissionGate<StaticPermissions>,
    duration: Option<u64>,
    source: Option<&Path>,
    no_upload: bool,
) -> Result<(), String> {
    let payload = match source {
        Some(path) => std::fs::read(path)
            .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?,
        None => PLACEHOLDER_AUDIO.to_vec(),
    };
    let duration = duration
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.audio.duration());

    let session = RecordingSession::new(
        Arc::new(gate),
        Arc::new(VirtualRecorder::new(payload)),
        config.audio.resolved_dir(),
    )
    .with_settings(config.audio.settings.clone())
    .with_duration(duration);

    let rt = runtime()?;

    if no_upload {
        let path = rt
            .block_on(session.record(|fraction| {
                print!("\rListening to the heartbeat... {:>3.0}%", fraction * 100.0);
                std::io::Write::flush(&mut std::io::stdout()).ok();
            }))
            .map_err(|e| e.to_string())?;
        println!();
        println!("Recorded {}", path.display());
        return Ok(());
    }

    let client = analysis_client(config)?;
    let screen = ScreenModel::new(Arc::new(Inline));
    println!("Listening to the heartbeat for {}s...", duration.as_secs());
    let outcome = rt.block_on(session.record_and_analyze(&client, &screen));
    present(&screen.lock());
    outcome
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Handle library subcommand actions.
pub fn handle_library_action(
    config: &Config,
    gate: &PermissionGate<StaticPermissions>,
    action: LibraryAction,
) -> Result<(), String> {
    require(gate, PermissionType::PhotoLibrary)?;
    let library = photo_library(config);

    match action {
        LibraryAction::Latest => match library.latest_image().map_err(|e| e.to_string())? {
            Some(path) => println!("{}", path.display()),
            None => println!("Library is empty: {}", library.dir().display()),
        },
        LibraryAction::List => {
            let images = library.list().map_err(|e| e.to_string())?;
            if images.is_empty() {
                println!("Library is empty: {}", library.dir().display());
            } else {
                println!("Saved photos ({}):", images.len());
                for path in images {
                    println!("  {}", path.display());
                }
            }
        }
        LibraryAction::Clear => {
            let removed = library.clear().map_err(|e| e.to_string())?;
            println!("Removed {} photo(s)", removed);
        }
    }
    Ok(())
}
