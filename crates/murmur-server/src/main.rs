mod cli;

use clap::Parser;
use murmur::MurmurError;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::Cli;

fn init_tracing(enabled: bool) {
    let filter = if enabled {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::new("off")
    };
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<(), MurmurError> {
    let config = Cli::parse().into_config();
    init_tracing(config.logging);

    tracing::info!(
        addr = %config.bind_addr,
        protocol = %config.protocol,
        max_clients = config.max_clients,
        "starting murmur"
    );
    if let Err(e) = murmur::serve(config).await {
        tracing::error!(error = %e, "server exited with error");
        return Err(e);
    }
    tracing::info!("murmur stopped");
    Ok(())
}
