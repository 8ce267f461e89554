use k8s_openapi::api::core::v1::{Affinity, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ReadyState, RedisPhase, Resources, SecuritySpec, StorageSpec, default_image};

/// A sharded Redis cluster: one workload set sized
/// `shards * (1 + replicasPerShard)`, client and bus ports on every pod.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "redis.github.com",
    version = "v1",
    kind = "RedisCluster",
    plural = "redisclusters",
    shortname = "rcl",
    derive = "PartialEq",
    status = "RedisClusterStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.ready\", \"name\": \"READY\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"STATUS\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".spec.shards\", \"name\": \"SHARDS\", \"type\": \"integer\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.cluster.knownNodes\", \"name\": \"NODES\", \"type\": \"integer\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".metadata.creationTimestamp\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.message\", \"name\": \"MESSAGE\", \"type\": \"string\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterSpec {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_shards")]
    pub shards: i32,
    #[serde(default = "default_replicas_per_shard")]
    pub replicas_per_shard: i32,
    #[serde(default)]
    pub resources: Resources,
    pub storage: Option<StorageSpec>,
    #[serde(default)]
    pub cluster: ClusterTuning,
    #[serde(default)]
    pub security: SecuritySpec,
    #[serde(default)]
    pub placement: Placement,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTuning {
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: i64,
    #[serde(default = "default_true")]
    pub require_full_coverage: bool,
    #[serde(default = "default_migration_barrier")]
    pub migration_barrier: i32,
    #[serde(default)]
    pub additional: BTreeMap<String, String>,
}

impl Default for ClusterTuning {
    fn default() -> Self {
        Self {
            node_timeout_ms: default_node_timeout_ms(),
            require_full_coverage: true,
            migration_barrier: default_migration_barrier(),
            additional: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub node_selector: Option<BTreeMap<String, String>>,
    pub tolerations: Option<Vec<Toleration>>,
    pub affinity: Option<Affinity>,
}

pub fn default_shards() -> i32 {
    3
}

pub fn default_replicas_per_shard() -> i32 {
    1
}

fn default_node_timeout_ms() -> i64 {
    15_000
}

fn default_migration_barrier() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

impl RedisClusterSpec {
    /// Total pod count: one primary per shard plus its replicas.
    pub fn total_nodes(&self) -> i32 {
        self.shards * (1 + self.replicas_per_shard)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(3..=1000).contains(&self.shards) {
            return Err(format!(
                "spec.shards must be within 3..=1000, got {}",
                self.shards
            ));
        }
        if !(0..=5).contains(&self.replicas_per_shard) {
            return Err(format!(
                "spec.replicasPerShard must be within 0..=5, got {}",
                self.replicas_per_shard
            ));
        }
        if self.security.auth_enabled() && self.security.password_secret().is_none() {
            return Err(
                "spec.security.auth.enabled requires spec.security.auth.passwordSecret".to_string(),
            );
        }
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterStatus {
    #[serde(default)]
    pub phase: RedisPhase,
    #[serde(default)]
    pub ready: ReadyState,
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub last_updated: Option<Time>,
    #[serde(default)]
    pub cluster: ClusterInfo,
    #[serde(default)]
    pub nodes: Vec<ClusterNode>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    #[serde(default = "default_cluster_state")]
    pub state: String,
    #[serde(default)]
    pub slots_assigned: i64,
    #[serde(default)]
    pub slots_ok: i64,
    #[serde(default)]
    pub slots_pfail: i64,
    #[serde(default)]
    pub slots_fail: i64,
    #[serde(default)]
    pub known_nodes: i32,
    #[serde(default)]
    pub size: i32,
    #[serde(default)]
    pub current_epoch: i64,
}

impl Default for ClusterInfo {
    fn default() -> Self {
        Self {
            state: default_cluster_state(),
            slots_assigned: 0,
            slots_ok: 0,
            slots_pfail: 0,
            slots_fail: 0,
            known_nodes: 0,
            size: 0,
            current_epoch: 0,
        }
    }
}

fn default_cluster_state() -> String {
    "unknown".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNode {
    #[serde(default)]
    pub id: String,
    pub pod_name: String,
    pub ip: Option<String>,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub role: String,
    pub master_id: Option<String>,
    #[serde(default)]
    pub ping_sent: i64,
    #[serde(default)]
    pub pong_recv: i64,
    #[serde(default)]
    pub config_epoch: i64,
    #[serde(default)]
    pub link_state: String,
    #[serde(default)]
    pub slots: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_count_is_shards_times_group_size() {
        let spec: RedisClusterSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.shards, 3);
        assert_eq!(spec.replicas_per_shard, 1);
        assert_eq!(spec.total_nodes(), 6);

        let spec: RedisClusterSpec = serde_json::from_value(serde_json::json!({
            "shards": 5, "replicasPerShard": 0
        }))
        .unwrap();
        assert_eq!(spec.total_nodes(), 5);
    }

    #[test]
    fn shard_bounds_enforced() {
        for bad in [0, 1, 2, 1001] {
            let spec = RedisClusterSpec {
                shards: bad,
                ..serde_json::from_value(serde_json::json!({})).unwrap()
            };
            assert!(spec.validate().is_err(), "shards {bad} should be rejected");
        }
        let spec = RedisClusterSpec {
            replicas_per_shard: 6,
            ..serde_json::from_value(serde_json::json!({})).unwrap()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn tuning_defaults_present() {
        let tuning = ClusterTuning::default();
        assert_eq!(tuning.node_timeout_ms, 15_000);
        assert!(tuning.require_full_coverage);
        assert_eq!(tuning.migration_barrier, 1);
    }
}
