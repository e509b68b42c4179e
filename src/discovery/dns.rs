//! Peer discovery through DNS SRV records.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::system_conf::read_system_conf;
use hickory_resolver::TokioAsyncResolver;
use log::{debug, warn};

use super::PeerDiscovery;
use crate::error::DiscoveryError;
use crate::types::{Endpoint, PeerSet};

pub struct DnsSrvDiscovery {
    name: String,
    resolver: TokioAsyncResolver,
}

impl DnsSrvDiscovery {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resolver: uncached_resolver(),
        }
    }
}

/// Builds a resolver from `/etc/resolv.conf` with caching disabled, so a
/// retry after NXDOMAIN asks the server again instead of replaying the
/// negative answer.
fn uncached_resolver() -> TokioAsyncResolver {
    let (config, mut opts) = read_system_conf().unwrap_or_else(|e| {
        warn!(
            "Failed to load system resolv.conf: {}. Falling back to default upstream resolvers.",
            e
        );
        (ResolverConfig::default(), ResolverOpts::default())
    });
    opts.cache_size = 0;
    TokioAsyncResolver::tokio(config, opts)
}

/// Maps SRV `(target, port)` pairs to endpoints.  Priority and weight play
/// no part in joining, so they are never looked at.
pub fn endpoints_from_srv<I>(records: I) -> Result<PeerSet, DiscoveryError>
where
    I: IntoIterator<Item = (String, u16)>,
{
    records
        .into_iter()
        .map(|(target, port)| Endpoint::new(target.trim_end_matches('.'), port))
        .collect()
}

#[async_trait]
impl PeerDiscovery for DnsSrvDiscovery {
    fn describe(&self) -> String {
        format!("DNS SRV {}", self.name)
    }

    async fn discover(&self) -> Result<PeerSet, DiscoveryError> {
        if self.name.trim().is_empty() {
            return Err(DiscoveryError::EmptySource);
        }

        let lookup = self
            .resolver
            .srv_lookup(self.name.as_str())
            .await
            .map_err(|source| DiscoveryError::Dns {
                name: self.name.clone(),
                source,
            })?;

        let peers = endpoints_from_srv(
            lookup
                .iter()
                .map(|srv| (srv.target().to_utf8(), srv.port())),
        )?;
        debug!("SRV {} resolved to {} peers", self.name, peers.len());

        if peers.is_empty() {
            return Err(DiscoveryError::NoPeers(self.describe()));
        }
        Ok(peers)
    }
}
