//! The bootstrap sequence: self-address, container metadata, peers,
//! synthesis, write.  Every deployment flavour goes through this one
//! pipeline; only the discovery strategy and the self-address mode differ.

use log::{info, warn};

use crate::address::{resolve_bind, InterfaceSource};
use crate::config::{ExhaustionPolicy, Settings};
use crate::consul::{synthesize, ConsulConfig, ModeFlags};
use crate::discovery::{metadata::wait_for_container_info, PeerDiscovery};
use crate::error::Error;
use crate::pipeline::{chain2, Pipeline};
use crate::retry::retry_until_success;
use crate::types::{BindInfo, ContainerInfo, Endpoint, PeerSet};
use crate::writer::write_atomic;

/// Everything discovery resolved, ready for synthesis.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub bind: BindInfo,
    pub container: Option<ContainerInfo>,
    pub peers: PeerSet,
}

pub struct Bootstrap<'a> {
    settings: &'a Settings,
    interfaces: &'a dyn InterfaceSource,
    discovery: Option<Box<dyn PeerDiscovery>>,
}

impl<'a> Bootstrap<'a> {
    pub fn new(
        settings: &'a Settings,
        interfaces: &'a dyn InterfaceSource,
        discovery: Option<Box<dyn PeerDiscovery>>,
    ) -> Self {
        Self {
            settings,
            interfaces,
            discovery,
        }
    }

    /// Runs the whole sequence.  On error nothing has been written.
    pub async fn run(&self) -> Result<ConsulConfig, Error> {
        let resolved = self.resolve().await;
        chain2(
            resolved,
            |resolved| Pipeline::succeed(self.synthesize(&resolved)),
            |document| {
                Pipeline::from(write_atomic(
                    &self.settings.config_path,
                    &self.settings.scratch_dir,
                    &document,
                ))
                .map(|()| document)
            },
        )
        .evaluate()
    }

    async fn resolve(&self) -> Pipeline<Resolved> {
        Pipeline::from(resolve_bind(
            self.interfaces,
            self.settings.bind_interface.as_deref(),
        ))
        .chain_async(|bind| async move {
            let container = match &self.settings.metadata_file {
                Some(path) => {
                    match wait_for_container_info(
                        path,
                        self.settings.metadata_port,
                        self.settings.metadata_timeout(),
                    )
                    .await
                    {
                        Ok(info) => Some(info),
                        Err(e) => return Pipeline::fail(e),
                    }
                }
                None => None,
            };
            Pipeline::succeed((bind, container))
        })
        .await
        .chain_async(|(bind, container)| async move {
            let mut peers = match self.discover_peers().await {
                Ok(peers) => peers,
                Err(e) => return Pipeline::fail(e),
            };
            if self.settings.join_self {
                let own = self_endpoint(&bind, container.as_ref(), self.settings.metadata_port);
                info!("Adding self ({}) to retry_join", own);
                peers.insert(own);
            }
            Pipeline::succeed(Resolved {
                bind,
                container,
                peers,
            })
        })
        .await
    }

    async fn discover_peers(&self) -> Result<PeerSet, Error> {
        let Some(discovery) = self.discovery.as_deref() else {
            return Ok(PeerSet::new());
        };

        let policy = self.settings.discovery_policy();
        match retry_until_success(policy, move || discovery.discover()).await {
            Ok(peers) => {
                info!(
                    "Discovered {} peers via {}",
                    peers.len(),
                    discovery.describe()
                );
                Ok(peers)
            }
            Err(e) => match self.settings.on_discovery_exhausted {
                ExhaustionPolicy::Fail => Err(e.into()),
                ExhaustionPolicy::Empty => {
                    warn!(
                        "Peer discovery via {} gave up ({}), continuing without peers",
                        discovery.describe(),
                        e
                    );
                    Ok(PeerSet::new())
                }
            },
        }
    }

    fn synthesize(&self, resolved: &Resolved) -> ConsulConfig {
        let mode = ModeFlags {
            server: self.settings.server_mode,
            bootstrap_expect: self.settings.bootstrap_expect,
            data_dir: self.settings.data_dir.clone(),
            log_level: self.settings.log_level.clone(),
        };
        synthesize(
            &resolved.bind,
            resolved.container.as_ref(),
            &resolved.peers,
            &mode,
        )
    }
}

/// The address other nodes should use to reach this one: the host-side
/// gossip endpoint when running behind published ports, else the bare
/// advertise IP.
fn self_endpoint(bind: &BindInfo, container: Option<&ContainerInfo>, gossip_port: u16) -> Endpoint {
    container
        .and_then(|c| c.host_endpoint(gossip_port))
        .unwrap_or_else(|| Endpoint::from(bind.advertise_ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::tests::{iface, StaticInterfaces};
    use crate::discovery::dns::endpoints_from_srv;
    use crate::error::DiscoveryError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    /// Answers like an SRV lookup that only starts resolving after a few
    /// cold-start misses.
    struct FlakySrv {
        misses: u32,
        calls: Arc<AtomicU32>,
        records: Vec<(String, u16)>,
    }

    #[async_trait]
    impl PeerDiscovery for FlakySrv {
        fn describe(&self) -> String {
            "fake SRV".into()
        }

        async fn discover(&self) -> Result<PeerSet, DiscoveryError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.misses {
                return Err(DiscoveryError::NoPeers(self.describe()));
            }
            endpoints_from_srv(self.records.clone())
        }
    }

    fn settings_in(dir: &TempDir) -> Settings {
        Settings {
            config_path: dir.path().join("consul_config.json"),
            scratch_dir: dir.path().to_path_buf(),
            discovery_interval_secs: 1,
            discovery_timeout_secs: 5,
            ..Settings::default()
        }
    }

    fn interfaces() -> StaticInterfaces {
        StaticInterfaces(vec![
            iface("lo", true, true, &["127.0.0.1"]),
            iface("eth0", true, false, &["10.0.1.5"]),
        ])
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_interface_joins_only_itself() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            bind_interface: Some("eth0".into()),
            server_mode: true,
            bootstrap_expect: 3,
            ..settings_in(&dir)
        };
        let ifaces = interfaces();

        Bootstrap::new(&settings, &ifaces, None).run().await.unwrap();

        let doc = read_json(&settings.config_path);
        assert_eq!(doc["bind_addr"], json!("{{ GetInterfaceIP \"eth0\" }}"));
        assert_eq!(doc["server"], json!(true));
        assert_eq!(doc["bootstrap_expect"], json!(3));
        assert_eq!(doc["retry_join"], json!(["10.0.1.5"]));
    }

    #[tokio::test(start_paused = true)]
    async fn srv_peers_and_auto_detected_self() {
        let dir = tempdir().unwrap();
        let settings = settings_in(&dir);
        let ifaces = StaticInterfaces(vec![
            iface("lo", true, true, &["127.0.0.1"]),
            iface("eth1", true, false, &["10.0.2.9"]),
        ]);
        let calls = Arc::new(AtomicU32::new(0));
        let srv = FlakySrv {
            misses: 2,
            calls: Arc::clone(&calls),
            records: vec![("node-a.".into(), 8300), ("node-b.".into(), 8300)],
        };

        let doc = Bootstrap::new(&settings, &ifaces, Some(Box::new(srv)))
            .run()
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let expected = ["10.0.2.9", "node-a:8300", "node-b:8300"];
        assert_eq!(doc.retry_join, expected);
        assert_eq!(read_json(&settings.config_path)["retry_join"], json!(expected));
        assert_eq!(doc.bind_addr, "{{ GetInterfaceIP \"eth1\" }}");
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_exhaustion_is_fatal_by_default() {
        let dir = tempdir().unwrap();
        let settings = settings_in(&dir);
        let ifaces = interfaces();
        let srv = FlakySrv {
            misses: u32::MAX,
            calls: Arc::new(AtomicU32::new(0)),
            records: Vec::new(),
        };

        let err = Bootstrap::new(&settings, &ifaces, Some(Box::new(srv)))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Discovery(DiscoveryError::NoPeers(_))));
        assert!(!settings.config_path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_exhaustion_can_fall_back_to_self() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            on_discovery_exhausted: ExhaustionPolicy::Empty,
            ..settings_in(&dir)
        };
        let ifaces = interfaces();
        let srv = FlakySrv {
            misses: u32::MAX,
            calls: Arc::new(AtomicU32::new(0)),
            records: Vec::new(),
        };

        let doc = Bootstrap::new(&settings, &ifaces, Some(Box::new(srv)))
            .run()
            .await
            .unwrap();
        assert_eq!(doc.retry_join, ["10.0.1.5"]);
    }

    #[tokio::test(start_paused = true)]
    async fn self_join_can_be_disabled() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            join_self: false,
            ..settings_in(&dir)
        };
        let ifaces = interfaces();

        let doc = Bootstrap::new(&settings, &ifaces, None).run().await.unwrap();
        assert!(doc.retry_join.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn metadata_never_ready_writes_nothing() {
        let dir = tempdir().unwrap();
        let metadata = dir.path().join("metadata.json");
        fs::write(&metadata, r#"{"MetadataFileStatus": "NOT_READY"}"#).unwrap();
        let settings = Settings {
            metadata_file: Some(metadata),
            metadata_timeout_secs: 10,
            ..settings_in(&dir)
        };
        let ifaces = interfaces();

        let err = Bootstrap::new(&settings, &ifaces, None).run().await.unwrap_err();
        assert!(matches!(err, Error::Metadata(_)));
        assert!(!settings.config_path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn metadata_publishes_host_ports() {
        let dir = tempdir().unwrap();
        let metadata = dir.path().join("metadata.json");
        fs::write(
            &metadata,
            r#"{
                "PortMappings": [
                    {"ContainerPort": 8301, "HostPort": 32801},
                    {"ContainerPort": 8500, "HostPort": 32850}
                ],
                "HostPrivateIPv4Address": "192.168.10.4",
                "MetadataFileStatus": "READY"
            }"#,
        )
        .unwrap();
        let settings = Settings {
            metadata_file: Some(metadata),
            ..settings_in(&dir)
        };
        let ifaces = interfaces();

        Bootstrap::new(&settings, &ifaces, None).run().await.unwrap();

        let doc = read_json(&settings.config_path);
        assert_eq!(doc["retry_join"], json!(["192.168.10.4:32801"]));
        assert_eq!(doc["advertise_addr"], json!("192.168.10.4"));
        assert_eq!(doc["ports"], json!({"serf_lan": 32801, "http": 32850}));
    }

    #[tokio::test]
    async fn unknown_interface_is_fatal() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            bind_interface: Some("eth9".into()),
            ..settings_in(&dir)
        };
        let ifaces = interfaces();

        let err = Bootstrap::new(&settings, &ifaces, None).run().await.unwrap_err();
        assert!(matches!(err, Error::Interface { .. }));
        assert!(!settings.config_path.exists());
    }
}
