//! Tracing subscriber setup.

use crate::config::LoggingSettings;
use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `RUST_LOG` when set, the configured level otherwise.
fn env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {level}")),
    }
}

/// Installs the global subscriber, plain or JSON per `config.json_format`.
pub fn setup_logging(config: &LoggingSettings) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(&config.level)?);
    let layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(true)
        .with_thread_names(true);

    if config.json_format {
        registry.with(layer.json()).try_init()?;
    } else {
        registry.with(layer.with_ansi(true)).try_init()?;
    }

    info!(
        "🔧 Logging initialized with level: {} ({})",
        config.level,
        if config.json_format { "json" } else { "text" }
    );
    Ok(())
}
