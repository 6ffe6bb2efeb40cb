//! Configuration management for the shard host.
//!
//! Loads the TOML configuration file, applies defaults for omitted fields and
//! converts it into what the container runtime consumes.

use anyhow::Context;
use game_container::ContainerConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Application kinds the host knows how to build.
pub const APP_KINDS: [&str; 2] = ["lobby", "echo"];

fn default_worker_threads() -> usize {
    num_cpus::get()
}

fn default_max_connections() -> usize {
    1000
}

fn default_read_buffer_size() -> usize {
    4096
}

fn default_listen_backlog() -> i32 {
    1024
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from the TOML file.
///
/// Every section may be omitted; missing sections and fields take their
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Runtime and transport settings
    #[serde(default)]
    pub container: ContainerSettings,
    /// Hosted application types, one `[[apps]]` table each
    #[serde(default)]
    pub apps: Vec<AppSettings>,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Runtime and transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSettings {
    /// Tokio worker threads (defaults to the number of CPUs)
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Maximum concurrent connections per application endpoint
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: i32,
    #[serde(default = "default_true")]
    pub nodelay: bool,
}

/// One hosted application type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Unique application type name
    pub name: String,
    /// Which built-in application to run (`lobby` or `echo`)
    pub kind: String,
    /// Endpoint clients connect to; omitted means no listener
    #[serde(default)]
    pub bind_address: Option<String>,
    /// Whether one instance is created at startup
    #[serde(default = "default_true")]
    pub startup: bool,
    /// Heartbeat interval in milliseconds (0 disables it)
    #[serde(default)]
    pub heartbeat_ms: u64,
    /// Mandatory init parameters for every instance
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            max_connections: default_max_connections(),
            read_buffer_size: default_read_buffer_size(),
            listen_backlog: default_listen_backlog(),
            nodelay: true,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            container: ContainerSettings::default(),
            apps: vec![
                AppSettings {
                    name: "lobby".to_string(),
                    kind: "lobby".to_string(),
                    bind_address: Some("127.0.0.1:7000".to_string()),
                    startup: true,
                    heartbeat_ms: 30_000,
                    params: HashMap::from([(
                        "motd".to_string(),
                        "Welcome to the lobby".to_string(),
                    )]),
                },
                AppSettings {
                    name: "echo".to_string(),
                    kind: "echo".to_string(),
                    bind_address: Some("127.0.0.1:7001".to_string()),
                    startup: true,
                    heartbeat_ms: 0,
                    params: HashMap::from([("seats".to_string(), "16".to_string())]),
                },
            ],
            logging: LoggingSettings::default(),
        }
    }
}

impl AppSettings {
    /// Parses `bind_address`.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the application has no listener, the parsed address
    /// otherwise, or an error naming the application if it does not parse.
    pub fn socket_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        self.bind_address
            .as_deref()
            .map(|addr| {
                addr.parse()
                    .with_context(|| format!("Invalid bind address for {}: {}", self.name, addr))
            })
            .transpose()
    }

    /// `None` when `heartbeat_ms` is 0.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_ms > 0).then(|| Duration::from_millis(self.heartbeat_ms))
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written at
    /// `path` and returned. Loading is synchronous because the runtime is
    /// sized from `[container].worker_threads` before it exists.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if reading, parsing
    /// or writing the default file failed.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            std::fs::write(path, toml_content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the `[container]` section into the container runtime's
    /// settings. `worker_threads` is not part of it; `main` uses it to build
    /// the runtime.
    ///
    /// # Returns
    ///
    /// A `ContainerConfig` ready for `ContainerFacade::new`.
    pub fn to_container_config(&self) -> ContainerConfig {
        ContainerConfig {
            max_connections: self.container.max_connections,
            read_buffer_size: self.container.read_buffer_size,
            listen_backlog: self.container.listen_backlog,
            nodelay: self.container.nodelay,
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// Checks container limits, application names, kinds and bind addresses,
    /// and the log level.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing
    /// the first issue found.
    pub fn validate(&self) -> Result<(), String> {
        if self.container.worker_threads == 0 {
            return Err("worker_threads must be at least 1".to_string());
        }
        if self.container.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }

        let mut names = HashSet::new();
        for app in &self.apps {
            if app.name.trim().is_empty() {
                return Err("Application name cannot be empty".to_string());
            }
            if !names.insert(app.name.as_str()) {
                return Err(format!("Duplicate application name: {}", app.name));
            }
            if !APP_KINDS.contains(&app.kind.as_str()) {
                return Err(format!(
                    "Unknown application kind for {}: {}. Must be one of: {APP_KINDS:?}",
                    app.name, app.kind
                ));
            }
            if let Some(addr) = &app.bind_address {
                if addr.parse::<SocketAddr>().is_err() {
                    return Err(format!("Invalid bind address for {}: {}", app.name, addr));
                }
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
