//! Runtime configuration for the container and its transport.

use serde::{Deserialize, Serialize};

fn default_max_connections() -> usize {
    1000
}

fn default_read_buffer_size() -> usize {
    4096
}

fn default_listen_backlog() -> i32 {
    1024
}

fn default_nodelay() -> bool {
    true
}

/// Settings shared by every listening endpoint of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Maximum concurrent connections per endpoint; extra connections are dropped on accept
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Initial capacity of each connection's read buffer in bytes
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Backlog passed to `listen(2)`
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: i32,
    /// Whether to set TCP_NODELAY on accepted sockets
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            read_buffer_size: default_read_buffer_size(),
            listen_backlog: default_listen_backlog(),
            nodelay: default_nodelay(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = from_json(r#"{ "max_connections": 5 }"#);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.read_buffer_size, 4096);
        assert_eq!(config.listen_backlog, 1024);
        assert!(config.nodelay);
    }

    fn from_json(json: &str) -> ContainerConfig {
        serde_json::from_str(json).expect("Failed to deserialize container config")
    }
}
