use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

pub mod aggregate;
pub mod cluster;
pub mod instance;
pub mod master_replica;
pub mod sentinel;

pub use aggregate::*;
pub use cluster::*;
pub use instance::*;
pub use master_replica::*;
pub use sentinel::*;

/// API group all five kinds live under.
pub const API_GROUP: &str = "redis.github.com";

/// Finalizer strings, one per managed kind. These are part of the API
/// surface and must never change once released.
pub mod finalizers {
    pub const INSTANCE: &str = "redis.github.com/finalizer";
    pub const MASTER_REPLICA: &str = "redis.github.com/masterreplica-finalizer";
    pub const SENTINEL: &str = "redis.github.com/sentinel-finalizer";
    pub const CLUSTER: &str = "redis.github.com/cluster-finalizer";
}

pub mod annotations {
    /// SHA-256 hex of the canonical rendered configuration, stamped on the
    /// workload pod template at creation or rebuild only.
    pub const CONFIG_HASH: &str = "redis.github.com/config-hash";
    pub const CREATED_BY: &str = "redis.github.com/created-by";
}

pub mod labels {
    pub const APP: &str = "app";
    pub const COMPONENT: &str = "component";
    pub const INSTANCE: &str = "instance";
    pub const ROLE: &str = "role";

    pub const APP_VALUE: &str = "redis";

    pub const ROLE_MASTER: &str = "master";
    pub const ROLE_REPLICA: &str = "replica";
    pub const ROLE_SENTINEL: &str = "sentinel";

    /// Set on aggregate view objects the operator materialized itself.
    pub const VIEW_AUTO_CREATED: &str = "redis.github.com/auto-created";
    pub const VIEW_TYPE: &str = "redis.github.com/view-type";
    pub const VIEW_RESOURCE: &str = "redis.github.com/view-resource";
}

pub mod ports {
    pub const REDIS: i32 = 6379;
    pub const CLUSTER_BUS: i32 = 16379;
    pub const SENTINEL: i32 = 26379;
}

pub fn default_image() -> String {
    "redis:7.2".to_string()
}

/// Lifecycle phase shared by all managed kinds. `Scaling` is only ever
/// reported by `RedisCluster`.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum RedisPhase {
    #[default]
    Unknown,
    Creating,
    Pending,
    Running,
    Failed,
    Terminated,
    Updating,
    Scaling,
}

impl FromStr for RedisPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unknown" => Ok(RedisPhase::Unknown),
            "Creating" => Ok(RedisPhase::Creating),
            "Pending" => Ok(RedisPhase::Pending),
            "Running" => Ok(RedisPhase::Running),
            "Failed" => Ok(RedisPhase::Failed),
            "Terminated" => Ok(RedisPhase::Terminated),
            "Updating" => Ok(RedisPhase::Updating),
            "Scaling" => Ok(RedisPhase::Scaling),
            _ => Err(()),
        }
    }
}

impl fmt::Display for RedisPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RedisPhase::Unknown => "Unknown",
            RedisPhase::Creating => "Creating",
            RedisPhase::Pending => "Pending",
            RedisPhase::Running => "Running",
            RedisPhase::Failed => "Failed",
            RedisPhase::Terminated => "Terminated",
            RedisPhase::Updating => "Updating",
            RedisPhase::Scaling => "Scaling",
        };
        write!(f, "{}", s)
    }
}

/// Tri-state readiness, matching the condition status vocabulary.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ReadyState {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ReadyState {
    fn from(ready: bool) -> Self {
        if ready { ReadyState::True } else { ReadyState::False }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyState::True => write!(f, "True"),
            ReadyState::False => write!(f, "False"),
            ReadyState::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Container compute requests/limits as plain quantity strings.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Resources {
    pub requests: Option<BTreeMap<String, String>>,
    pub limits: Option<BTreeMap<String, String>>,
}

impl Resources {
    pub fn is_empty(&self) -> bool {
        self.requests.is_none() && self.limits.is_none()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Requested volume size, e.g. "1Gi".
    pub size: String,
    pub storage_class_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    pub auth: Option<AuthSpec>,
    pub tls: Option<TlsSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub password_secret: Option<SecretKeyRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    #[serde(default = "default_password_key")]
    pub key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    #[serde(default)]
    pub enabled: bool,
    pub secret_name: Option<String>,
}

impl SecuritySpec {
    pub fn auth_enabled(&self) -> bool {
        self.auth.as_ref().is_some_and(|a| a.enabled)
    }

    pub fn password_secret(&self) -> Option<&SecretKeyRef> {
        self.auth.as_ref().and_then(|a| a.password_secret.as_ref())
    }
}

/// Per-role settings for a single Redis node group, with unset fields
/// falling back to the parent spec's shared values.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct NodeSpec {
    #[serde(default)]
    pub resources: Resources,
    pub storage: Option<StorageSpec>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// Like [`NodeSpec`] but for a scaled replica group.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ReplicaBlock {
    #[serde(default = "default_replica_count")]
    pub replicas: i32,
    #[serde(default)]
    pub resources: Resources,
    pub storage: Option<StorageSpec>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl Default for ReplicaBlock {
    fn default() -> Self {
        Self {
            replicas: default_replica_count(),
            resources: Resources::default(),
            storage: None,
            config: BTreeMap::new(),
        }
    }
}

pub fn default_replica_count() -> i32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_password_key() -> String {
    "password".to_string()
}

/// Merge shared config under block config; block keys win.
pub fn merged_config(
    shared: &BTreeMap<String, String>,
    block: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut out = shared.clone();
    for (k, v) in block {
        out.insert(k.clone(), v.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_round_trips_through_display() {
        for phase in [
            RedisPhase::Unknown,
            RedisPhase::Creating,
            RedisPhase::Pending,
            RedisPhase::Running,
            RedisPhase::Failed,
            RedisPhase::Terminated,
            RedisPhase::Updating,
            RedisPhase::Scaling,
        ] {
            assert_eq!(phase.to_string().parse::<RedisPhase>(), Ok(phase));
        }
        assert!("Active".parse::<RedisPhase>().is_err());
    }

    #[test]
    fn ready_state_serializes_as_condition_vocabulary() {
        assert_eq!(
            serde_json::to_string(&ReadyState::from(true)).unwrap(),
            "\"True\""
        );
        assert_eq!(
            serde_json::to_string(&ReadyState::from(false)).unwrap(),
            "\"False\""
        );
        assert_eq!(
            serde_json::to_string(&ReadyState::Unknown).unwrap(),
            "\"Unknown\""
        );
    }

    #[test]
    fn block_config_overrides_shared_keys() {
        let mut shared = BTreeMap::new();
        shared.insert("maxmemory".to_string(), "128mb".to_string());
        shared.insert("timeout".to_string(), "0".to_string());
        let mut block = BTreeMap::new();
        block.insert("maxmemory".to_string(), "256mb".to_string());

        let merged = merged_config(&shared, &block);
        assert_eq!(merged["maxmemory"], "256mb");
        assert_eq!(merged["timeout"], "0");
    }

    #[test]
    fn auth_defaults_to_enabled_when_declared() {
        let sec: SecuritySpec = serde_json::from_value(serde_json::json!({
            "auth": {"passwordSecret": {"name": "creds"}}
        }))
        .unwrap();
        assert!(sec.auth_enabled());
        assert_eq!(sec.password_secret().unwrap().key, "password");
    }
}
