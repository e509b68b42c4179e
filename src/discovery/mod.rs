use async_trait::async_trait;
use log::info;

use crate::config::{DiscoveryMode, Settings};
use crate::error::{DiscoveryError, Error};
use crate::types::PeerSet;

pub mod dns;
pub mod metadata;
pub mod swarm;

pub use dns::DnsSrvDiscovery;
pub use swarm::SwarmServiceDiscovery;

#[async_trait]
pub trait PeerDiscovery: Send + Sync {
    /// Human-readable name of the source, for logs and errors.
    fn describe(&self) -> String;

    /// Produce the current peer set.  May be called repeatedly by the
    /// retry scheduler, so implementations must not assume a single call.
    async fn discover(&self) -> Result<PeerSet, DiscoveryError>;
}

/// A fixed, comma-separated list of seeds, validated once up front.
pub struct StaticDiscovery {
    peers: PeerSet,
}

impl StaticDiscovery {
    pub fn parse(seeds: &str) -> Result<Self, DiscoveryError> {
        let peers = seeds
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<Result<PeerSet, _>>()?;
        if peers.is_empty() {
            return Err(DiscoveryError::EmptySource);
        }
        Ok(Self { peers })
    }
}

#[async_trait]
impl PeerDiscovery for StaticDiscovery {
    fn describe(&self) -> String {
        format!("static list [{}]", self.peers.to_strings().join(","))
    }

    async fn discover(&self) -> Result<PeerSet, DiscoveryError> {
        Ok(self.peers.clone())
    }
}

/// Picks the discovery strategy the settings ask for.  `Ok(None)` means
/// the node only joins itself.
pub fn from_settings(settings: &Settings) -> Result<Option<Box<dyn PeerDiscovery>>, Error> {
    let source = settings.peer_source.as_deref();
    let mode = match (settings.discovery, source) {
        (DiscoveryMode::Auto, Some(_)) => DiscoveryMode::DnsSrv,
        (DiscoveryMode::Auto, None) => DiscoveryMode::None,
        (mode, _) => mode,
    };

    let strategy: Option<Box<dyn PeerDiscovery>> = match (mode, source) {
        (DiscoveryMode::None, _) => None,
        (_, None) => {
            return Err(Error::Config(format!(
                "peer discovery mode {:?} requires CONSUL_PEER_SOURCE",
                mode
            )))
        }
        (DiscoveryMode::DnsSrv | DiscoveryMode::Auto, Some(name)) => {
            Some(Box::new(DnsSrvDiscovery::new(name)))
        }
        (DiscoveryMode::Swarm, Some(service)) => Some(Box::new(SwarmServiceDiscovery::new(
            service,
            settings.peer_port,
        ))),
        (DiscoveryMode::Static, Some(seeds)) => {
            let list = StaticDiscovery::parse(seeds)
                .map_err(|e| Error::Config(format!("invalid static peer list: {e}")))?;
            Some(Box::new(list))
        }
    };

    match &strategy {
        Some(s) => info!("Peer discovery via {}", s.describe()),
        None => info!("No peer discovery source configured, joining self only"),
    }
    Ok(strategy)
}
