//! Command-line interface for the Airborne host.
//!
//! Every option except `--config` overrides a value from the configuration
//! file.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the frame rate cap
    pub target_fps: Option<f64>,
    /// Optional override for the physics rate
    pub physics_hz: Option<f64>,
    /// Stop after this many frames instead of waiting for a signal
    pub frames: Option<u64>,
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list; the first item is the binary name.
    pub fn parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = command().try_get_matches_from(args)?;
        Ok(Self::from_matches(&matches))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            target_fps: matches.get_one::<f64>("target-fps").copied(),
            physics_hz: matches.get_one::<f64>("physics-hz").copied(),
            frames: matches.get_one::<u64>("frames").copied(),
        }
    }
}

fn command() -> Command {
    Command::new("Airborne")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Airborne Team")
        .about("Plugin-hosted real-time flight simulation kernel")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("target-fps")
                .short('f')
                .long("target-fps")
                .value_name("FPS")
                .help("Frame rate cap, 0 for uncapped")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("physics-hz")
                .long("physics-hz")
                .value_name("HZ")
                .help("Fixed physics update rate")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("frames")
                .short('n')
                .long("frames")
                .value_name("COUNT")
                .help("Run this many frames, then shut down")
                .value_parser(value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::parse_from(["airborne"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert_eq!(args.log_level, None);
        assert!(!args.json_logs);
        assert_eq!(args.frames, None);
    }

    #[test]
    fn test_overrides() {
        let args = CliArgs::parse_from([
            "airborne",
            "--config",
            "cessna.toml",
            "-l",
            "debug",
            "--json-logs",
            "--target-fps",
            "30",
            "--physics-hz",
            "120",
            "--frames",
            "600",
        ])
        .unwrap();

        assert_eq!(args.config_path, PathBuf::from("cessna.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.target_fps, Some(30.0));
        assert_eq!(args.physics_hz, Some(120.0));
        assert_eq!(args.frames, Some(600));
    }

    #[test]
    fn test_rejects_non_numeric_rates() {
        assert!(CliArgs::parse_from(["airborne", "--physics-hz", "fast"]).is_err());
        assert!(CliArgs::parse_from(["airborne", "--frames", "-1"]).is_err());
    }
}
