mod cli;

use clap::Parser;
use cli::{Args, Command};
use glitters::analysis::ENDPOINT_ENV;
use glitters::config::Config;

/// Load .env file
///
/// Does not override existing environment variables.
fn load_env() {
    // dotenv::dotenv() returns Err if .env doesn't exist, which is fine
    let _ = dotenv::dotenv();

    if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
        log::debug!("Upload endpoint overridden by {}: {}", ENDPOINT_ENV, endpoint);
    }
}

/// Route `log` records through a tracing fmt subscriber filtered by RUST_LOG.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Config {
    let loaded = match args.config.as_deref() {
        Some(path) => Config::load_required(path),
        None => Config::load(None),
    };
    match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn main() {
    init_logging();
    load_env();

    let args = Args::parse();
    let config = load_config(&args);
    let gate = cli::permission_gate(&args.deny);

    let result = match args.command {
        Command::ListDevices { rig } => {
            cli::list_cameras(rig);
            Ok(())
        }
        Command::Capture {
            rig,
            facing,
            flash,
            live,
            live_delivery,
            still,
            output,
            save,
            analyze,
        } => cli::run_capture(
            &config,
            &gate,
            cli::CaptureOptions {
                rig,
                facing,
                flash,
                live,
                live_delivery,
                still,
                output,
                save,
                analyze,
            },
        ),
        Command::AnalyzePhoto { path } => cli::run_analyze_photo(&config, &path),
        Command::AnalyzeAudio { path } => cli::run_analyze_audio(&config, &path),
        Command::RecordAudio {
            duration,
            source,
            no_upload,
        } => cli::run_record_audio(&config, gate, duration, source.as_deref(), no_upload),
        Command::Library { action } => cli::handle_library_action(&config, &gate, action),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
