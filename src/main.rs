//! Consul bootstrap entry point.
//!
//! Resolves this node's address and its peers, writes the agent
//! configuration and exits.  Any failure exits non-zero without touching
//! the configuration file.

use log::{error, info};

mod address;
mod bootstrap;
mod config;
mod consul;
mod discovery;
mod error;
mod pipeline;
mod retry;
mod types;
mod writer;

use address::SystemInterfaces;
use bootstrap::Bootstrap;
use config::Settings;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Load configuration
    let settings = Settings::load();
    info!("Starting Consul bootstrap with config: {:?}", settings);

    let discovery = discovery::from_settings(&settings)?;
    let bootstrap = Bootstrap::new(&settings, &SystemInterfaces, discovery);

    match bootstrap.run().await {
        Ok(document) => {
            info!(
                "Bootstrap complete: server={}, retry_join={:?}",
                document.server, document.retry_join
            );
            Ok(())
        }
        Err(e) => {
            error!("Bootstrap failed: {}", e);
            Err(e.into())
        }
    }
}
