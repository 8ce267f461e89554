use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    NodeSpec, ReadyState, RedisPhase, ReplicaBlock, Resources, StorageSpec, default_image,
};

pub const DEFAULT_MASTER_NAME: &str = "mymaster";

/// N sentinels monitoring a Redis primary. The primary is either embedded
/// (a replicated workload owned by this resource) or referenced (an
/// externally managed `RedisMasterReplica`).
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "redis.github.com",
    version = "v1",
    kind = "RedisSentinel",
    plural = "redissentinels",
    shortname = "rsn",
    derive = "PartialEq",
    status = "RedisSentinelStatus",
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
    printcolumn = "{\"jsonPath\": \".status.sentinels.ready\", \"name\": \"SENTINELS\", \"type\": \"integer\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.monitoredMaster.name\", \"name\": \"MONITORS\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".metadata.creationTimestamp\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.message\", \"name\": \"MESSAGE\", \"type\": \"string\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct RedisSentinelSpec {
    #[serde(default = "default_image")]
    pub image: String,
    /// Number of sentinel processes; bounded to 3..=7.
    #[serde(default = "default_sentinel_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub sentinel: SentinelTuning,
    #[serde(default)]
    pub resources: Resources,
    pub storage: Option<StorageSpec>,
    /// Embedded primary/replica set owned by this resource. Ignored when
    /// `externalMaster` is set (and declaring both is rejected).
    pub redis: Option<EmbeddedRedisSpec>,
    pub external_master: Option<ExternalMasterRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SentinelTuning {
    #[serde(default = "default_quorum")]
    pub quorum: i32,
    #[serde(default = "default_down_after_ms")]
    pub down_after_milliseconds: i64,
    #[serde(default = "default_failover_timeout_ms")]
    pub failover_timeout: i64,
    #[serde(default = "default_parallel_syncs")]
    pub parallel_syncs: i32,
    #[serde(default)]
    pub additional: BTreeMap<String, String>,
}

impl Default for SentinelTuning {
    fn default() -> Self {
        Self {
            quorum: default_quorum(),
            down_after_milliseconds: default_down_after_ms(),
            failover_timeout: default_failover_timeout_ms(),
            parallel_syncs: default_parallel_syncs(),
            additional: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedRedisSpec {
    #[serde(default)]
    pub master: NodeSpec,
    #[serde(default)]
    pub replica: ReplicaBlock,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default = "default_master_name")]
    pub master_name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMasterRef {
    /// Name of the externally managed `RedisMasterReplica`.
    pub name: String,
    /// Defaults to the sentinel's own namespace.
    pub namespace: Option<String>,
    #[serde(default = "default_master_name")]
    pub master_name: String,
}

pub fn default_sentinel_replicas() -> i32 {
    3
}

fn default_quorum() -> i32 {
    2
}

fn default_down_after_ms() -> i64 {
    30_000
}

fn default_failover_timeout_ms() -> i64 {
    180_000
}

fn default_parallel_syncs() -> i32 {
    1
}

pub fn default_master_name() -> String {
    DEFAULT_MASTER_NAME.to_string()
}

impl RedisSentinelSpec {
    pub fn is_referenced(&self) -> bool {
        self.external_master.is_some()
    }

    pub fn master_name(&self) -> &str {
        if let Some(external) = &self.external_master {
            return &external.master_name;
        }
        self.redis
            .as_ref()
            .map(|r| r.master_name.as_str())
            .unwrap_or(DEFAULT_MASTER_NAME)
    }

    /// Size of the embedded Redis workload: one primary plus the replicas.
    pub fn embedded_redis_replicas(&self) -> i32 {
        1 + self
            .redis
            .as_ref()
            .map(|r| r.replica.replicas)
            .unwrap_or_else(crate::default_replica_count)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(3..=7).contains(&self.replicas) {
            return Err(format!(
                "spec.replicas must be within 3..=7, got {}",
                self.replicas
            ));
        }
        if self.sentinel.quorum < 1 {
            return Err(format!(
                "spec.sentinel.quorum must be at least 1, got {}",
                self.sentinel.quorum
            ));
        }
        if self.redis.is_some() && self.external_master.is_some() {
            return Err(
                "spec.redis and spec.externalMaster are mutually exclusive; \
                 pick embedded or referenced mode"
                    .to_string(),
            );
        }
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisSentinelStatus {
    #[serde(default)]
    pub phase: RedisPhase,
    #[serde(default)]
    pub ready: ReadyState,
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub last_updated: Option<Time>,
    #[serde(default)]
    pub sentinels: SentinelCounts,
    #[serde(default)]
    pub pod_names: Vec<String>,
    pub service_name: Option<String>,
    pub monitored_master: Option<MonitoredMaster>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SentinelCounts {
    #[serde(default)]
    pub ready: i32,
    #[serde(default)]
    pub total: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredMaster {
    pub name: String,
    pub ip: Option<String>,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub known_replicas: i32,
    #[serde(default)]
    pub known_sentinels: i32,
    #[serde(default)]
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_defaults_match_sentinel_documentation() {
        let spec: RedisSentinelSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.replicas, 3);
        assert_eq!(spec.sentinel.quorum, 2);
        assert_eq!(spec.sentinel.down_after_milliseconds, 30_000);
        assert_eq!(spec.sentinel.failover_timeout, 180_000);
        assert_eq!(spec.sentinel.parallel_syncs, 1);
        assert_eq!(spec.master_name(), "mymaster");
        assert!(!spec.is_referenced());
    }

    #[test]
    fn embedded_workload_counts_the_primary() {
        let spec: RedisSentinelSpec = serde_json::from_value(serde_json::json!({
            "redis": {"replica": {"replicas": 4}}
        }))
        .unwrap();
        assert_eq!(spec.embedded_redis_replicas(), 5);
        // Without a redis block the default replica count still applies.
        let bare: RedisSentinelSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(bare.embedded_redis_replicas(), 3);
    }

    #[test]
    fn sentinel_count_bounds_enforced() {
        for bad in [0, 1, 2, 8, 100] {
            let spec = RedisSentinelSpec {
                replicas: bad,
                ..serde_json::from_value(serde_json::json!({})).unwrap()
            };
            assert!(spec.validate().is_err(), "count {bad} should be rejected");
        }
    }

    #[test]
    fn embedded_and_referenced_modes_are_exclusive() {
        let spec: RedisSentinelSpec = serde_json::from_value(serde_json::json!({
            "redis": {},
            "externalMaster": {"name": "upstream"}
        }))
        .unwrap();
        let err = spec.validate().unwrap_err();
        assert!(err.contains("mutually exclusive"));
    }

    #[test]
    fn referenced_mode_uses_external_master_name() {
        let spec: RedisSentinelSpec = serde_json::from_value(serde_json::json!({
            "externalMaster": {"name": "upstream", "masterName": "primary0"}
        }))
        .unwrap();
        assert!(spec.is_referenced());
        assert_eq!(spec.master_name(), "primary0");
    }
}
