//! Polling of the ECS container metadata file.
//!
//! The agent writes the file incrementally and only flips
//! `MetadataFileStatus` to `READY` once networking is final, so every read
//! before that is expected to fail and is simply retried.

use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use log::info;
use serde::Deserialize;

use crate::error::MetadataError;
use crate::retry::retry_until_success;
use crate::types::{ContainerInfo, RetryPolicy};

/// Poll interval for the metadata file.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct MetadataDocument {
    #[serde(rename = "MetadataFileStatus")]
    status: Option<String>,
    #[serde(rename = "PortMappings", default)]
    port_mappings: Vec<PortMapping>,
    #[serde(rename = "HostPrivateIPv4Address")]
    host_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortMapping {
    container_port: u16,
    host_port: u16,
}

/// Parses one snapshot of the metadata document.
///
/// Succeeds only when the document is ready, names a host IP and publishes
/// `target_port`.
pub fn parse_container_info(raw: &str, target_port: u16) -> Result<ContainerInfo, MetadataError> {
    let doc: MetadataDocument = serde_json::from_str(raw)?;

    let ready = doc
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("ready"));
    if !ready {
        return Err(MetadataError::NotReady(doc.status));
    }

    let host_ip: IpAddr = doc
        .host_ip
        .as_deref()
        .and_then(|ip| ip.parse().ok())
        .ok_or(MetadataError::MissingHostIp)?;

    let ports: HashMap<u16, u16> = doc
        .port_mappings
        .iter()
        .map(|m| (m.container_port, m.host_port))
        .collect();
    if !ports.contains_key(&target_port) {
        return Err(MetadataError::PortNotMapped(target_port));
    }

    Ok(ContainerInfo { host_ip, ports })
}

pub fn read_container_info(path: &Path, target_port: u16) -> Result<ContainerInfo, MetadataError> {
    let raw = fs::read_to_string(path)?;
    parse_container_info(&raw, target_port)
}

/// Polls `path` until it describes a ready container publishing
/// `target_port`, or `deadline` passes.
pub async fn wait_for_container_info(
    path: &Path,
    target_port: u16,
    deadline: Duration,
) -> Result<ContainerInfo, MetadataError> {
    info!(
        "Waiting up to {:?} for container metadata at {}",
        deadline,
        path.display()
    );
    let policy = RetryPolicy::new(POLL_INTERVAL, deadline);
    let info = retry_until_success(policy, || {
        std::future::ready(read_container_info(path, target_port))
    })
    .await?;
    info!(
        "Container reachable at {} (port {} published as {:?})",
        info.host_ip,
        target_port,
        info.host_port(target_port)
    );
    Ok(info)
}
