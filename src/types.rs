//! Values threaded through the bootstrap pipeline.
//!
//! Everything here is created once by a resolution step and read by the
//! later ones.  [`Endpoint`] validates on construction, so a [`PeerSet`]
//! can never hold an empty or malformed address.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DiscoveryError;

/// A peer address as written into `retry_join`.
///
/// The port is optional: self-join entries and static seeds are often
/// bare IPs, which the daemon pairs with its default LAN gossip port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    host: String,
    port: Option<u16>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, DiscoveryError> {
        Self::build(host.into(), Some(port))
    }

    pub fn host_only(host: impl Into<String>) -> Result<Self, DiscoveryError> {
        Self::build(host.into(), None)
    }

    fn build(host: String, port: Option<u16>) -> Result<Self, DiscoveryError> {
        let valid = !host.is_empty()
            && !host.chars().any(|c| c.is_whitespace() || c == ',' || c == '/')
            && (!host.contains(':') || host.parse::<Ipv6Addr>().is_ok());
        if !valid {
            return Err(DiscoveryError::InvalidEndpoint(host));
        }
        Ok(Self { host, port })
    }
}

impl From<IpAddr> for Endpoint {
    fn from(ip: IpAddr) -> Self {
        Self {
            host: ip.to_string(),
            port: None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) if self.host.contains(':') => write!(f, "[{}]:{}", self.host, port),
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => f.write_str(&self.host),
        }
    }
}

impl FromStr for Endpoint {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || DiscoveryError::InvalidEndpoint(s.to_string());

        if let Some(rest) = s.strip_prefix('[') {
            let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
            let port = port.parse().map_err(|_| invalid())?;
            return Self::new(host, port);
        }
        if s.parse::<Ipv6Addr>().is_ok() {
            return Self::host_only(s);
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| invalid())?;
                Self::new(host, port)
            }
            None => Self::host_only(s),
        }
    }
}

/// The set of addresses handed to `retry_join`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSet(HashSet<Endpoint>);

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, endpoint: Endpoint) -> bool {
        self.0.insert(endpoint)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the peers as strings, sorted so repeated runs write the
    /// same bytes.
    pub fn to_strings(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.0.iter().map(Endpoint::to_string).collect();
        peers.sort();
        peers
    }
}

impl FromIterator<Endpoint> for PeerSet {
    fn from_iter<I: IntoIterator<Item = Endpoint>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The interface the daemon binds to and the address it advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindInfo {
    pub interface: String,
    pub advertise_ip: IpAddr,
}

/// Network view of this container from the host's side.
///
/// Only built from a metadata document reporting `READY`, so every entry
/// in `ports` is a mapping the platform actually published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub host_ip: IpAddr,
    /// container port -> host port
    pub ports: HashMap<u16, u16>,
}

impl ContainerInfo {
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports.get(&container_port).copied()
    }

    /// The host-side endpoint for a published container port.
    pub fn host_endpoint(&self, container_port: u16) -> Option<Endpoint> {
        self.host_port(container_port).map(|port| Endpoint {
            host: self.host_ip.to_string(),
            port: Some(port),
        })
    }
}

/// Fixed-interval retry bounded by an overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl RetryPolicy {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }
}
