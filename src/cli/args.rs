//! CLI argument parsing with clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use glitters::camera::{Device, Facing, FlashMode, LiveDelivery, VirtualRig};
use glitters::permissions::PermissionType;

/// Capture pet photos and heartbeat recordings and send them for analysis
#[derive(Parser, Debug)]
#[command(name = "glitters")]
#[command(version, about = "Pet photo and heartbeat capture with remote analysis")]
#[command(after_help = "EXAMPLES:
    # Take a photo with the rear camera and analyze it
    glitters capture --analyze

    # Front camera, flash on, save to the library
    glitters capture --facing front --flash on --save

    # Record a heartbeat clip and upload it
    glitters record-audio

ENVIRONMENT:
    GLITTERS_ENDPOINT    Override the analysis upload URL.
    RUST_LOG             Log filter (e.g. glitters=debug).")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Treat a permission as denied (repeatable)
    #[arg(long, value_enum, global = true)]
    pub deny: Vec<PermissionArg>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the cameras of the virtual rig
    ListDevices {
        #[arg(long, value_enum, default_value = "both")]
        rig: RigLayout,
    },

    /// Open a camera session, take one photo and tear the session down
    #[command(after_help = "EXAMPLES:
    glitters capture --output pet.jpg
    glitters capture --live --live-delivery split
    glitters capture --still photo.jpg --analyze")]
    Capture {
        #[arg(long, value_enum, default_value = "both")]
        rig: RigLayout,

        /// Camera to use (front or rear)
        #[arg(long, short)]
        facing: Option<Facing>,

        /// Flash mode (off, on, auto)
        #[arg(long)]
        flash: Option<FlashMode>,

        /// Capture a live photo with its companion movie
        #[arg(long)]
        live: bool,

        /// How the live movie is delivered (combined or split)
        #[arg(long)]
        live_delivery: Option<LiveDelivery>,

        /// JPEG file the rig delivers as its frame
        #[arg(long)]
        still: Option<PathBuf>,

        /// Write the captured JPEG here
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Save the photo to the library
        #[arg(long)]
        save: bool,

        /// Upload the photo for analysis
        #[arg(long)]
        analyze: bool,
    },

    /// Upload an existing JPEG for analysis
    AnalyzePhoto { path: PathBuf },

    /// Upload an existing audio recording for analysis
    AnalyzeAudio { path: PathBuf },

    /// Record a heartbeat clip and upload it
    RecordAudio {
        /// Recording length in seconds
        #[arg(long, short)]
        duration: Option<u64>,

        /// Audio file the recorder writes as its recording
        #[arg(long)]
        source: Option<PathBuf>,

        /// Record only; skip the upload
        #[arg(long)]
        no_upload: bool,
    },

    /// Browse or clear the photo library
    Library {
        #[command(subcommand)]
        action: LibraryAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum LibraryAction {
    /// Show the most recent photo
    Latest,
    /// List all saved photos, oldest first
    List,
    /// Remove all saved photos
    Clear,
}

/// Which cameras the virtual rig exposes.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigLayout {
    Both,
    RearOnly,
    FrontOnly,
}

impl RigLayout {
    pub fn devices(self) -> Vec<Device> {
        match self {
            RigLayout::Both => vec![VirtualRig::rear_camera(), VirtualRig::front_camera()],
            RigLayout::RearOnly => vec![VirtualRig::rear_camera()],
            RigLayout::FrontOnly => vec![VirtualRig::front_camera()],
        }
    }

    pub fn build(self) -> VirtualRig {
        VirtualRig::new(self.devices())
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionArg {
    Camera,
    Microphone,
    PhotoLibrary,
}

impl From<PermissionArg> for PermissionType {
    fn from(arg: PermissionArg) -> Self {
        match arg {
            PermissionArg::Camera => PermissionType::Camera,
            PermissionArg::Microphone => PermissionType::Microphone,
            PermissionArg::PhotoLibrary => PermissionType::PhotoLibrary,
        }
    }
}
