use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    NodeSpec, ReadyState, RedisPhase, ReplicaBlock, Resources, SecuritySpec, StorageSpec,
    default_image, merged_config,
};

/// One Redis primary plus N read replicas, each role with its own workload
/// set and service. Replicas follow the primary through its service name.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "redis.github.com",
    version = "v1",
    kind = "RedisMasterReplica",
    plural = "redismasterreplicas",
    shortname = "rmr",
    derive = "PartialEq",
    status = "RedisMasterReplicaStatus",
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
    printcolumn = "{\"jsonPath\": \".status.master.podName\", \"name\": \"MASTER\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.replicas.ready\", \"name\": \"REPLICAS\", \"type\": \"integer\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".metadata.creationTimestamp\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.message\", \"name\": \"MESSAGE\", \"type\": \"string\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct RedisMasterReplicaSpec {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default)]
    pub master: NodeSpec,
    #[serde(default)]
    pub replica: ReplicaBlock,
    /// Shared fallbacks applied when the per-role blocks leave a field unset.
    #[serde(default)]
    pub resources: Resources,
    pub storage: Option<StorageSpec>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub security: SecuritySpec,
}

impl RedisMasterReplicaSpec {
    pub fn master_resources(&self) -> &Resources {
        if self.master.resources.is_empty() {
            &self.resources
        } else {
            &self.master.resources
        }
    }

    pub fn replica_resources(&self) -> &Resources {
        if self.replica.resources.is_empty() {
            &self.resources
        } else {
            &self.replica.resources
        }
    }

    pub fn master_storage(&self) -> Option<&StorageSpec> {
        self.master.storage.as_ref().or(self.storage.as_ref())
    }

    pub fn replica_storage(&self) -> Option<&StorageSpec> {
        self.replica.storage.as_ref().or(self.storage.as_ref())
    }

    pub fn master_config(&self) -> BTreeMap<String, String> {
        merged_config(&self.config, &self.master.config)
    }

    pub fn replica_config(&self) -> BTreeMap<String, String> {
        merged_config(&self.config, &self.replica.config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.replica.replicas < 1 {
            return Err(format!(
                "spec.replica.replicas must be at least 1, got {}",
                self.replica.replicas
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
pub struct RedisMasterReplicaStatus {
    #[serde(default)]
    pub phase: RedisPhase,
    #[serde(default)]
    pub ready: ReadyState,
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub last_updated: Option<Time>,
    #[serde(default)]
    pub master: MasterStatus,
    #[serde(default)]
    pub replicas: ReplicaGroupStatus,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MasterStatus {
    #[serde(default)]
    pub ready: bool,
    pub pod_name: Option<String>,
    pub service_name: Option<String>,
    #[serde(default = "default_master_role")]
    pub role: String,
}

impl Default for MasterStatus {
    fn default() -> Self {
        Self {
            ready: false,
            pod_name: None,
            service_name: None,
            role: default_master_role(),
        }
    }
}

fn default_master_role() -> String {
    "master".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaGroupStatus {
    #[serde(default)]
    pub ready: i32,
    #[serde(default)]
    pub total: i32,
    #[serde(default)]
    pub pod_names: Vec<String>,
    pub service_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuthSpec;

    fn quantities(cpu: &str) -> Resources {
        let mut requests = BTreeMap::new();
        requests.insert("cpu".to_string(), cpu.to_string());
        Resources {
            requests: Some(requests),
            limits: None,
        }
    }

    #[test]
    fn replica_count_defaults_to_two() {
        let spec: RedisMasterReplicaSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.replica.replicas, 2);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn role_blocks_fall_back_to_shared_values() {
        let spec = RedisMasterReplicaSpec {
            resources: quantities("500m"),
            storage: Some(StorageSpec {
                size: "2Gi".to_string(),
                storage_class_name: None,
            }),
            master: NodeSpec {
                resources: quantities("1"),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            spec.master_resources().requests.as_ref().unwrap()["cpu"],
            "1"
        );
        assert_eq!(
            spec.replica_resources().requests.as_ref().unwrap()["cpu"],
            "500m"
        );
        assert_eq!(spec.master_storage().unwrap().size, "2Gi");
        assert_eq!(spec.replica_storage().unwrap().size, "2Gi");
    }

    #[test]
    fn role_config_overlays_shared_config() {
        let mut spec = RedisMasterReplicaSpec::default();
        spec.config
            .insert("maxmemory".to_string(), "128mb".to_string());
        spec.replica
            .config
            .insert("maxmemory".to_string(), "64mb".to_string());
        assert_eq!(spec.master_config()["maxmemory"], "128mb");
        assert_eq!(spec.replica_config()["maxmemory"], "64mb");
    }

    #[test]
    fn zero_replicas_rejected() {
        let spec = RedisMasterReplicaSpec {
            replica: ReplicaBlock {
                replicas: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn auth_without_secret_rejected() {
        let spec = RedisMasterReplicaSpec {
            security: SecuritySpec {
                auth: Some(AuthSpec {
                    enabled: true,
                    password_secret: None,
                }),
                tls: None,
            },
            ..Default::default()
        };
        let err = spec.validate().unwrap_err();
        assert!(err.contains("passwordSecret"));
    }
}
