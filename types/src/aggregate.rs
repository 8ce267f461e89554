use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ReadyState;

/// Status string reported when the referenced resource does not exist.
pub const STATUS_NOT_FOUND: &str = "NotFound";

/// Conventional name of the auto-materialized view for a managed resource.
pub fn view_name(resource_name: &str) -> String {
    format!("{resource_name}-view")
}

/// Read-only aggregated view over any of the four managed kinds.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "redis.github.com",
    version = "v1",
    kind = "Redis",
    plural = "redis",
    shortname = "rd",
    derive = "PartialEq",
    status = "RedisStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".spec.type\", \"name\": \"TYPE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".spec.resourceName\", \"name\": \"RESOURCE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.ready\", \"name\": \"READY\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.status\", \"name\": \"STATUS\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".metadata.creationTimestamp\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.message\", \"name\": \"MESSAGE\", \"type\": \"string\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
    #[serde(rename = "type")]
    pub kind_ref: RedisKindRef,
    pub resource_name: String,
    /// Defaults to the view's own namespace.
    pub resource_namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedisKindRef {
    #[default]
    Instance,
    Cluster,
    MasterReplica,
    Sentinel,
}

impl fmt::Display for RedisKindRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedisKindRef::Instance => write!(f, "instance"),
            RedisKindRef::Cluster => write!(f, "cluster"),
            RedisKindRef::MasterReplica => write!(f, "masterreplica"),
            RedisKindRef::Sentinel => write!(f, "sentinel"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisStatus {
    /// Mirrored phase of the referenced resource, or `NotFound`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ready: ReadyState,
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub last_updated: Option<Time>,
    pub summary: Option<RedisSummary>,
}

/// Kind-specific counts; exactly one block is populated, selected by
/// `spec.type`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisSummary {
    pub instance: Option<InstanceSummary>,
    pub master_replica: Option<MasterReplicaSummary>,
    pub sentinel: Option<SentinelSummary>,
    pub cluster: Option<ClusterSummary>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub replicas: i32,
    pub ready_replicas: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MasterReplicaSummary {
    pub master_ready: bool,
    pub replicas_ready: i32,
    pub replicas_total: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SentinelSummary {
    pub sentinels_ready: i32,
    pub sentinels_total: i32,
    pub monitored_master: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub shards: i32,
    pub known_nodes: i32,
    pub state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_ref_uses_lowercase_wire_values() {
        let spec: RedisSpec = serde_json::from_value(serde_json::json!({
            "type": "masterreplica",
            "resourceName": "cache"
        }))
        .unwrap();
        assert_eq!(spec.kind_ref, RedisKindRef::MasterReplica);
        assert_eq!(spec.kind_ref.to_string(), "masterreplica");
        assert_eq!(spec.resource_name, "cache");
        assert!(spec.resource_namespace.is_none());
    }

    #[test]
    fn view_name_follows_convention() {
        assert_eq!(view_name("cache"), "cache-view");
    }
}
