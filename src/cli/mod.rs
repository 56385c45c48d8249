//! Command-line interface definitions and subcommand handlers.

mod args;
mod commands;

pub use args::{Args, Command};
pub use commands::{
    handle_library_action, list_cameras, permission_gate, run_analyze_audio, run_analyze_photo,
    run_capture, run_record_audio, CaptureOptions,
};
