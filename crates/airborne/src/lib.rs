//! # Airborne - Main Entry Point
//!
//! Hosts the Airborne simulation kernel: parses the command line, loads the
//! TOML configuration, sets up logging and runs the game loop until a
//! termination signal arrives.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! airborne
//!
//! # Specify custom configuration
//! airborne --config c172.toml
//!
//! # Override timing, run a fixed number of frames
//! airborne --physics-hz 120 --target-fps 0 --frames 3600
//!
//! # JSON logging
//! airborne --json-logs
//! ```
//!
//! ## Configuration
//!
//! The host loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! SIGINT and SIGTERM stop the loop at the next frame boundary and unload
//! every plugin in reverse load order. A second signal exits immediately.

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Runs the host.
///
/// Exits the process with status 1 on a startup or runtime error. Called from
/// `main` inside the tokio runtime.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    let mut logging_settings = config.logging;
    if let Some(level) = &args.log_level {
        logging_settings.level = level.clone();
    }
    if let Err(e) = logging::setup_logging(&logging_settings, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{InputSettings, LoggingSettings, SimulationSettings};
pub use diagnostics::{DiagnosticsFactory, DiagnosticsPlugin};
