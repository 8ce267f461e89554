use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ReadyState, RedisPhase, Resources, StorageSpec, default_image};

/// A single Redis replica set: one workload set, one config object, one
/// headless service.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "redis.github.com",
    version = "v1",
    kind = "RedisInstance",
    plural = "redisinstances",
    shortname = "ri",
    derive = "PartialEq",
    status = "RedisInstanceStatus",
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
    printcolumn = "{\"jsonPath\": \".spec.replicas\", \"name\": \"REPLICAS\", \"type\": \"integer\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".metadata.creationTimestamp\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.message\", \"name\": \"MESSAGE\", \"type\": \"string\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct RedisInstanceSpec {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_instance_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub resources: Resources,
    pub storage: Option<StorageSpec>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

pub fn default_instance_replicas() -> i32 {
    1
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisInstanceStatus {
    #[serde(default)]
    pub phase: RedisPhase,
    #[serde(default)]
    pub ready: ReadyState,
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub last_updated: Option<Time>,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_fill_image_and_replicas() {
        let spec: RedisInstanceSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.image, "redis:7.2");
        assert_eq!(spec.replicas, 1);
        assert!(spec.storage.is_none());
        assert!(spec.config.is_empty());
    }

    #[test]
    fn storage_uses_camel_case_keys() {
        let spec: RedisInstanceSpec = serde_json::from_value(serde_json::json!({
            "replicas": 3,
            "storage": {"size": "1Gi", "storageClassName": "fast"}
        }))
        .unwrap();
        let storage = spec.storage.unwrap();
        assert_eq!(storage.size, "1Gi");
        assert_eq!(storage.storage_class_name.as_deref(), Some("fast"));
    }
}
