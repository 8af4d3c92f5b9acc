//! Resolved server settings.

use murmur_protocol::ProtocolKind;
use murmur_room::DEFAULT_HISTORY_CAPACITY;
use murmur_session::SessionConfig;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default cap on simultaneously serviced connections.
pub const DEFAULT_MAX_CLIENTS: usize = 10;

/// Everything [`serve`](crate::serve) needs to start a server.
///
/// Loading these values (flags, environment) is the binary's job; this is
/// the resolved result.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to. Default: `0.0.0.0:8080`.
    pub bind_addr: String,

    /// How many connections are serviced at once. Accepted sockets beyond
    /// this wait for a free slot. Default: 10.
    pub max_clients: usize,

    /// Wire format every connection speaks. Default: native.
    pub protocol: ProtocolKind,

    /// Whether the binary installs a log subscriber. Default: true.
    pub logging: bool,

    /// How many recent messages newcomers are replayed. Default: 10.
    pub history_capacity: usize,

    pub session: SessionConfig,
}

impl ServerConfig {
    /// Defaults, listening on every interface at `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{port}"),
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            max_clients: DEFAULT_MAX_CLIENTS,
            protocol: ProtocolKind::default(),
            logging: true,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            session: SessionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.max_clients, 10);
        assert_eq!(config.protocol, ProtocolKind::Native);
        assert!(config.logging);
        assert_eq!(config.history_capacity, 10);
    }

    #[test]
    fn test_with_port_only_changes_address() {
        let config = ServerConfig::with_port(9000);
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.max_clients, DEFAULT_MAX_CLIENTS);
    }
}
