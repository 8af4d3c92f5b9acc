//! Command-line flags, each with a `MURMUR_*` environment fallback.

use clap::Parser;
use murmur::{DEFAULT_MAX_CLIENTS, DEFAULT_PORT, ServerConfig};
use murmur_protocol::ProtocolKind;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-protocol chat relay server", long_about = None)]
pub struct Cli {
    /// TCP port to listen on, on every interface.
    #[arg(long, env = "MURMUR_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// How many clients are serviced at once; further connections wait.
    #[arg(long, env = "MURMUR_MAX_CLIENTS", default_value_t = DEFAULT_MAX_CLIENTS)]
    pub max_clients: usize,

    /// Wire format: native (also binary, java), json (also rest) or xml.
    #[arg(long, env = "MURMUR_PROTOCOL", default_value = "native")]
    pub protocol: ProtocolKind,

    /// Turn logging off entirely.
    #[arg(long, env = "MURMUR_NO_LOGGING")]
    pub no_logging: bool,
}

impl Cli {
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            max_clients: self.max_clients.max(1),
            protocol: self.protocol,
            logging: !self.no_logging,
            ..ServerConfig::with_port(self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags_into_config() {
        let cli = Cli::try_parse_from([
            "murmur-server",
            "--port",
            "9100",
            "--max-clients",
            "3",
            "--protocol",
            "XML",
            "--no-logging",
        ])
        .unwrap();
        let config = cli.into_config();

        assert_eq!(config.bind_addr, "0.0.0.0:9100");
        assert_eq!(config.max_clients, 3);
        assert_eq!(config.protocol, ProtocolKind::Xml);
        assert!(!config.logging);
    }

    #[test]
    fn test_parse_protocol_aliases() {
        let cli = Cli::try_parse_from(["murmur-server", "--protocol", "rest"]).unwrap();
        assert_eq!(cli.protocol, ProtocolKind::Json);
    }

    #[test]
    fn test_parse_unknown_protocol_fails() {
        assert!(Cli::try_parse_from(["murmur-server", "--protocol", "carrier-pigeon"]).is_err());
    }
}
