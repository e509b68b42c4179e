//! Error types shared by every bootstrap stage.
//!
//! Transient failures (DNS lookups, swarm queries, metadata reads) have
//! their own enums so the retry scheduler can hand back the last one
//! verbatim.  Everything that reaches [`Error`] is terminal for the run.

use std::io;

use thiserror::Error;

/// A failed attempt at producing a peer set.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no discovery source configured")]
    EmptySource,
    #[error("DNS lookup for {name} failed: {source}")]
    Dns {
        name: String,
        #[source]
        source: hickory_resolver::error::ResolveError,
    },
    #[error("Docker API request failed: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("{0} returned no peers")]
    NoPeers(String),
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),
}

/// A failed read of the container metadata document.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("unable to read metadata file: {0}")]
    Read(#[from] io::Error),
    #[error("metadata document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("metadata status is {0:?}, waiting for READY")]
    NotReady(Option<String>),
    #[error("metadata document has no host IP")]
    MissingHostIp,
    #[error("container port {0} is not published")]
    PortNotMapped(u16),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("network interface {name}: {reason}")]
    Interface { name: String, reason: String },
    #[error("no usable network interface found")]
    NoInterface,
    #[error("peer discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("container metadata unavailable: {0}")]
    Metadata(#[from] MetadataError),
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    pub fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Error::Io { context, source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
