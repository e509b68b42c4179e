//! Peer discovery through Docker Swarm service tasks.
//!
//! Consul servers run as a swarm service whose gossip port is published in
//! host mode, so each running task is reachable at its node's address on
//! the published port.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::models::{EndpointPortConfigPublishModeEnum, Task, TaskState};
use bollard::query_parameters::ListTasksOptionsBuilder;
use bollard::Docker;
use log::{debug, warn};

use super::PeerDiscovery;
use crate::error::DiscoveryError;
use crate::types::{Endpoint, PeerSet};

/// The two swarm manager queries discovery needs.
#[async_trait]
pub trait SwarmApi: Send + Sync {
    /// Tasks of `service` whose desired state is running.
    async fn running_tasks(&self, service: &str) -> Result<Vec<Task>, DiscoveryError>;

    /// The address a node reports in its status, if any.
    async fn node_addr(&self, node_id: &str) -> Result<Option<String>, DiscoveryError>;
}

/// The local Docker daemon.  A client is built per call so a daemon that
/// comes up late is picked up by the next retry.
pub struct DockerSwarm;

impl DockerSwarm {
    fn connect() -> Result<Docker, DiscoveryError> {
        // Unix socket on Linux, honouring DOCKER_HOST.
        Docker::connect_with_local_defaults().map_err(Into::into)
    }
}

#[async_trait]
impl SwarmApi for DockerSwarm {
    async fn running_tasks(&self, service: &str) -> Result<Vec<Task>, DiscoveryError> {
        let filters = HashMap::from([
            ("service", vec![service]),
            ("desired-state", vec!["running"]),
        ]);
        let opts = ListTasksOptionsBuilder::default().filters(&filters).build();
        Ok(Self::connect()?.list_tasks(Some(opts)).await?)
    }

    async fn node_addr(&self, node_id: &str) -> Result<Option<String>, DiscoveryError> {
        let node = Self::connect()?.inspect_node(node_id).await?;
        Ok(node.status.and_then(|s| s.addr).filter(|addr| !addr.is_empty()))
    }
}

pub struct SwarmServiceDiscovery {
    service: String,
    target_port: u16,
    api: Box<dyn SwarmApi>,
}

impl SwarmServiceDiscovery {
    pub fn new(service: impl Into<String>, target_port: u16) -> Self {
        Self::with_api(service, target_port, Box::new(DockerSwarm))
    }

    pub fn with_api(service: impl Into<String>, target_port: u16, api: Box<dyn SwarmApi>) -> Self {
        Self {
            service: service.into(),
            target_port,
            api,
        }
    }
}

/// The host-mode published port of `task` for `target_port`, if the task is
/// actually running.
pub fn published_port(task: &Task, target_port: u16) -> Option<u16> {
    let status = task.status.as_ref()?;
    if status.state != Some(TaskState::RUNNING) {
        return None;
    }
    status
        .port_status
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .filter(|p| p.publish_mode == Some(EndpointPortConfigPublishModeEnum::HOST))
        .find(|p| p.target_port == Some(i64::from(target_port)))
        .and_then(|p| p.published_port)
        .and_then(|port| u16::try_from(port).ok())
}

#[async_trait]
impl PeerDiscovery for SwarmServiceDiscovery {
    fn describe(&self) -> String {
        format!("swarm service {}", self.service)
    }

    async fn discover(&self) -> Result<PeerSet, DiscoveryError> {
        if self.service.trim().is_empty() {
            return Err(DiscoveryError::EmptySource);
        }

        let tasks = self.api.running_tasks(&self.service).await?;
        debug!("Service {} has {} running tasks", self.service, tasks.len());

        let mut peers = PeerSet::new();
        for task in &tasks {
            let Some(port) = published_port(task, self.target_port) else {
                continue;
            };
            let Some(node_id) = task.node_id.as_deref() else {
                continue;
            };
            match self.api.node_addr(node_id).await {
                Ok(Some(addr)) => {
                    peers.insert(Endpoint::new(addr, port)?);
                }
                Ok(None) => warn!("Node {} reports no address", node_id),
                Err(e) => warn!("Failed to inspect node {}: {}", node_id, e),
            }
        }

        if peers.is_empty() {
            return Err(DiscoveryError::NoPeers(self.describe()));
        }
        Ok(peers)
    }
}
