//! Shard host entry point.
//!
//! Loads the configuration, builds the tokio runtime and the container with
//! the configured application types, and runs until a shutdown signal.

mod apps;
mod cli;
mod config;
mod logging;
mod signals;

use anyhow::Context;
use cli::CliArgs;
use config::AppConfig;
use game_container::{ContainerFacade, GameAppFactory};
use std::sync::Arc;
use tracing::{error, info};

/// The shard host application.
pub struct Application {
    config: AppConfig,
    container: Arc<ContainerFacade>,
}

impl Application {
    /// Applies CLI overrides to `config`, validates it and builds the
    /// container. Logging must already be initialized.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let factories = config
            .apps
            .iter()
            .map(apps::build_factory)
            .collect::<anyhow::Result<Vec<Arc<dyn GameAppFactory>>>>()?;
        let container = ContainerFacade::new(config.to_container_config(), factories);
        Ok(Self { config, container })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🧵 Worker threads: {}", self.config.container.worker_threads);
        info!("  👥 Max connections per endpoint: {}", self.config.container.max_connections);
        for app in &self.config.apps {
            info!(
                "  🎮 {} ({}) on {} {}",
                app.name,
                app.kind,
                app.bind_address.as_deref().unwrap_or("-"),
                if app.startup { "[startup]" } else { "" }
            );
        }

        self.container
            .startup()
            .await
            .context("Failed to start container")?;

        for app in &self.config.apps {
            if let Some(addr) = self.container.local_address_for(&app.name) {
                info!("🎮 Ready to accept {} connections on {}", app.name, addr);
            }
        }
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let signal = signals::wait_for_shutdown_signal().await?;

        info!("📡 Received {}, initiating graceful shutdown...", signal);
        self.container.shutdown().await;
        info!("👋 Shard host stopped");
        Ok(())
    }
}

fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(bind_address) = &args.bind_address {
        if let Some(first) = config.apps.first_mut() {
            first.bind_address = Some(bind_address.clone());
        }
    }
    if let Some(log_level) = &args.log_level {
        config.logging.level = log_level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
}

fn main() {
    let args = CliArgs::parse();

    let result = AppConfig::load_from_file(&args.config_path).and_then(|mut config| {
        apply_overrides(&mut config, &args);
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;
        Ok(config)
    });
    let config = match result {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {:?}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::setup_logging(&config.logging) {
        eprintln!("❌ Failed to initialize logging: {:?}", e);
        std::process::exit(1);
    }
    display_banner();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.container.worker_threads)
        .thread_name("shardhost-worker")
        .enable_all()
        .build();
    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("❌ Failed to build runtime: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = runtime.block_on(async move { Application::new(config)?.run().await });
    if let Err(e) = outcome {
        error!("❌ Application error: {:?}", e);
        std::process::exit(1);
    }
}

/// Display startup banner using proper logging
fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║              🧩 SHARD HOST 🧩             ║");
    info!("║                  v{:<8}               ║", version);
    info!("║   Container runtime for game shardlets   ║");
    info!("╚══════════════════════════════════════════╝");
}
