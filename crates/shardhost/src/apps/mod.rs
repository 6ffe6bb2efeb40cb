//! Built-in application types.

mod echo;
mod lobby;

pub use echo::EchoFactory;
pub use lobby::LobbyFactory;

use crate::config::AppSettings;
use game_container::{GameAppFactory, InitParams};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// The configured part of an application type, shared by all kinds.
#[derive(Debug, Clone)]
pub struct AppDefinition {
    pub name: String,
    pub bind_address: Option<SocketAddr>,
    pub startup: bool,
    pub heartbeat_interval: Option<Duration>,
    pub params: InitParams,
}

impl AppDefinition {
    pub fn from_settings(settings: &AppSettings) -> anyhow::Result<Self> {
        Ok(Self {
            name: settings.name.clone(),
            bind_address: settings.socket_addr()?,
            startup: settings.startup,
            heartbeat_interval: settings.heartbeat_interval(),
            params: settings.params.clone(),
        })
    }
}

/// Builds the factory for one configured application.
pub fn build_factory(settings: &AppSettings) -> anyhow::Result<Arc<dyn GameAppFactory>> {
    let definition = AppDefinition::from_settings(settings)?;
    match settings.kind.as_str() {
        "lobby" => Ok(Arc::new(LobbyFactory::new(definition))),
        "echo" => Ok(Arc::new(EchoFactory::new(definition))),
        other => anyhow::bail!("Unknown application kind: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(kind: &str) -> AppSettings {
        AppSettings {
            name: format!("{kind}-1"),
            kind: kind.to_string(),
            bind_address: Some("127.0.0.1:0".to_string()),
            startup: false,
            heartbeat_ms: 0,
            params: HashMap::new(),
        }
    }

    #[test]
    fn test_build_known_kinds() {
        for kind in ["lobby", "echo"] {
            let factory = build_factory(&settings(kind)).expect("Failed to build factory");
            assert_eq!(factory.name(), format!("{kind}-1"));
            assert!(!factory.is_startup());
            assert!(factory.bind_address().is_some());
        }
    }

    #[test]
    fn test_build_unknown_kind() {
        assert!(build_factory(&settings("poker")).is_err());
    }
}
