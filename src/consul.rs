//! The Consul agent configuration document.
//!
//! [`synthesize`] is a pure function of the resolved inputs; it never looks
//! at the environment or the network.

use serde::Serialize;

use crate::types::{BindInfo, ContainerInfo, PeerSet};

/// Consul's well-known container ports.
pub const SERVER_RPC_PORT: u16 = 8300;
pub const SERF_LAN_PORT: u16 = 8301;
pub const SERF_WAN_PORT: u16 = 8302;
pub const HTTP_PORT: u16 = 8500;
pub const DNS_PORT: u16 = 8600;

/// Run-mode inputs that come straight from settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeFlags {
    pub server: bool,
    pub bootstrap_expect: u32,
    pub data_dir: String,
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UiConfig {
    pub enabled: bool,
}

/// Host-side ports for Consul's listeners, as published by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Ports {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serf_lan: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serf_wan: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<u16>,
}

impl Ports {
    fn from_container(info: &ContainerInfo) -> Option<Self> {
        let ports = Self {
            dns: info.host_port(DNS_PORT),
            http: info.host_port(HTTP_PORT),
            serf_lan: info.host_port(SERF_LAN_PORT),
            serf_wan: info.host_port(SERF_WAN_PORT),
            server: info.host_port(SERVER_RPC_PORT),
        };
        (ports != Self::default()).then_some(ports)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsulConfig {
    pub bind_addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_addr: Option<String>,
    pub client_addr: String,
    pub data_dir: String,
    pub server: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_expect: Option<u32>,
    pub retry_join: Vec<String>,
    pub rejoin_after_leave: bool,
    pub leave_on_terminate: bool,
    pub log_level: String,
    pub ui_config: UiConfig,
    pub disable_update_check: bool,
    pub auto_reload_config: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Ports>,
}

/// go-sockaddr template Consul evaluates at startup to find the
/// interface's address.
pub fn bind_template(interface: &str) -> String {
    format!("{{{{ GetInterfaceIP \"{}\" }}}}", interface)
}

pub fn synthesize(
    bind: &BindInfo,
    container: Option<&ContainerInfo>,
    peers: &PeerSet,
    mode: &ModeFlags,
) -> ConsulConfig {
    ConsulConfig {
        bind_addr: bind_template(&bind.interface),
        advertise_addr: container.map(|c| c.host_ip.to_string()),
        client_addr: "0.0.0.0".into(),
        data_dir: mode.data_dir.clone(),
        server: mode.server,
        bootstrap_expect: mode.server.then_some(mode.bootstrap_expect),
        retry_join: peers.to_strings(),
        rejoin_after_leave: true,
        leave_on_terminate: true,
        log_level: mode.log_level.clone(),
        ui_config: UiConfig { enabled: true },
        disable_update_check: true,
        auto_reload_config: true,
        ports: container.and_then(Ports::from_container),
    }
}
