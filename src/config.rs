use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use log::warn;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::types::RetryPolicy;

/// Environment variables understood by the bootstrapper, and the settings
/// field each one feeds.  `ECS_CONSUL_SERVER_URL` lands under its own key
/// and only fills `peer_source` when `CONSUL_PEER_SOURCE` is unset.
const ENV_KEYS: &[(&str, &str)] = &[
    ("CONSUL_BIND_INTERFACE", "bind_interface"),
    ("CONSUL_PEER_DISCOVERY", "discovery"),
    ("CONSUL_PEER_SOURCE", "peer_source"),
    ("ECS_CONSUL_SERVER_URL", "ecs_peer_source"),
    ("CONSUL_PEER_PORT", "peer_port"),
    ("CONSUL_SERVER_MODE", "server_mode"),
    ("CONSUL_SERVER_BOOTSTRAP_EXPECT", "bootstrap_expect"),
    ("CONSUL_CONFIG_PATH", "config_path"),
    ("CONSUL_SCRATCH_DIR", "scratch_dir"),
    ("CONSUL_DATA_DIR", "data_dir"),
    ("CONSUL_LOG_LEVEL", "log_level"),
    ("ECS_CONTAINER_METADATA_FILE", "metadata_file"),
    ("CONSUL_METADATA_PORT", "metadata_port"),
    ("CONSUL_METADATA_TIMEOUT_SECS", "metadata_timeout_secs"),
    ("CONSUL_DISCOVERY_TIMEOUT_SECS", "discovery_timeout_secs"),
    ("CONSUL_DISCOVERY_INTERVAL_SECS", "discovery_interval_secs"),
    ("CONSUL_JOIN_SELF", "join_self"),
    ("CONSUL_DISCOVERY_EXHAUSTED", "on_discovery_exhausted"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMode {
    /// DNS SRV when a peer source is set, otherwise none.
    Auto,
    None,
    DnsSrv,
    Swarm,
    Static,
}

/// What to do when peer discovery runs out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    /// Abort the bootstrap with the last discovery error.
    Fail,
    /// Carry on with no discovered peers.
    Empty,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_interface: Option<String>,
    pub discovery: DiscoveryMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_source: Option<String>,
    /// Container port of Consul's LAN gossip listener.
    pub peer_port: u16,
    pub server_mode: bool,
    pub bootstrap_expect: u32,
    pub config_path: PathBuf,
    pub scratch_dir: PathBuf,
    pub data_dir: String,
    pub log_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_file: Option<PathBuf>,
    pub metadata_port: u16,
    pub metadata_timeout_secs: u64,
    pub discovery_timeout_secs: u64,
    pub discovery_interval_secs: u64,
    pub join_self: bool,
    pub on_discovery_exhausted: ExhaustionPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_interface: None,
            discovery: DiscoveryMode::Auto,
            peer_source: None,
            peer_port: 8301,
            server_mode: true,
            bootstrap_expect: 1,
            config_path: "/consul/config/consul_config.json".into(),
            scratch_dir: "/tmp".into(),
            data_dir: "/consul/data/".into(),
            log_level: "INFO".into(),
            metadata_file: None,
            metadata_port: 8301,
            metadata_timeout_secs: 30,
            discovery_timeout_secs: 50,
            discovery_interval_secs: 10,
            join_self: true,
            on_discovery_exhausted: ExhaustionPolicy::Fail,
        }
    }
}

impl Settings {
    /// Loads settings from defaults, `consul-bootstrap.{toml,json}` and the
    /// environment, in increasing precedence.
    ///
    /// Values that fail to parse are reported and replaced by their
    /// default instead of aborting the bootstrap.
    pub fn load() -> Self {
        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("consul-bootstrap.toml"))
            .merge(Json::file("consul-bootstrap.json"))
            .merge(env_provider());
        Self::from_figment(&figment)
    }

    fn from_figment(figment: &Figment) -> Self {
        let d = Settings::default();
        Self {
            bind_interface: non_empty(lenient_string(figment, "bind_interface")),
            discovery: lenient(figment, "discovery", d.discovery),
            peer_source: non_empty(lenient_string(figment, "peer_source"))
                .or_else(|| non_empty(lenient_string(figment, "ecs_peer_source"))),
            peer_port: lenient(figment, "peer_port", d.peer_port),
            server_mode: lenient(figment, "server_mode", d.server_mode),
            bootstrap_expect: lenient(figment, "bootstrap_expect", d.bootstrap_expect),
            config_path: lenient_string(figment, "config_path").map_or(d.config_path, PathBuf::from),
            scratch_dir: lenient_string(figment, "scratch_dir").map_or(d.scratch_dir, PathBuf::from),
            data_dir: lenient_string(figment, "data_dir").unwrap_or(d.data_dir),
            log_level: lenient_string(figment, "log_level").unwrap_or(d.log_level),
            metadata_file: non_empty(lenient_string(figment, "metadata_file")).map(PathBuf::from),
            metadata_port: lenient(figment, "metadata_port", d.metadata_port),
            metadata_timeout_secs: lenient(figment, "metadata_timeout_secs", d.metadata_timeout_secs),
            discovery_timeout_secs: lenient(
                figment,
                "discovery_timeout_secs",
                d.discovery_timeout_secs,
            ),
            discovery_interval_secs: lenient(
                figment,
                "discovery_interval_secs",
                d.discovery_interval_secs,
            ),
            join_self: lenient(figment, "join_self", d.join_self),
            on_discovery_exhausted: lenient(
                figment,
                "on_discovery_exhausted",
                d.on_discovery_exhausted,
            ),
        }
    }

    pub fn discovery_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.discovery_interval_secs),
            Duration::from_secs(self.discovery_timeout_secs),
        )
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }
}

fn env_provider() -> Env {
    Env::raw().filter_map(|key| {
        ENV_KEYS
            .iter()
            .find(|(var, _)| key.as_str().eq_ignore_ascii_case(var))
            .map(|(_, field)| (*field).into())
    })
}

fn lenient<T: DeserializeOwned>(figment: &Figment, key: &str, default: T) -> T {
    if !figment.contains(key) {
        return default;
    }
    match figment.extract_inner(key) {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring invalid value for {}: {}. Using default.", key, e);
            default
        }
    }
}

/// Any scalar a provider may hand back.  Environment values are typed by
/// figment, so `0` arrives as a number and `true` as a bool even where a
/// string is wanted.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Bool(bool),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Str(s) => s,
            Scalar::Signed(n) => n.to_string(),
            Scalar::Unsigned(n) => n.to_string(),
            Scalar::Float(n) => n.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

/// A string-valued field, accepting whatever scalar the provider produced.
fn lenient_string(figment: &Figment, key: &str) -> Option<String> {
    lenient::<Option<Scalar>>(figment, key, None).map(String::from)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
