//! Command-line interface for the shard host.
//!
//! Parses the handful of options that may override `config.toml` at startup,
//! using the `clap` builder API.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
///
/// Every option overrides the matching setting in the configuration file;
/// see `apply_overrides` in `main.rs` for how they are merged.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the first application's bind address
    pub bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Builds the clap command definition shared by [`parse`](Self::parse)
    /// and the tests.
    fn command() -> Command {
        Command::new("Shard Host")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Container runtime hosting networked game applications")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Bind address of the first application (e.g., 127.0.0.1:7000)"),
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
                    .action(clap::ArgAction::SetTrue),
            )
    }

    /// Parses the process arguments.
    ///
    /// # Returns
    ///
    /// A `CliArgs` with every option resolved. `config_path` falls back to
    /// `config.toml`; the other overrides are `None`/`false` when absent.
    ///
    /// # Exits
    ///
    /// On malformed arguments, or on `--help`/`--version`, clap prints its
    /// message and terminates the process.
    ///
    /// # Example
    ///
    /// ```rust
    /// let args = CliArgs::parse();
    /// println!("Loading configuration from {}", args.config_path.display());
    /// ```
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    fn from_matches(matches: &clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}
