//! Builders for the platform objects every reconciler stamps out:
//! StatefulSets, ConfigMaps and Services, with the shared label scheme,
//! owner references and the config-hash annotation.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    EnvVar, EnvVarSource, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretKeySelector, SecretVolumeSource, Service,
    ServicePort, ServiceSpec, TCPSocketAction, Toleration, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use redis_operator_types::{Resources, SecuritySpec, StorageSpec, annotations, labels};

use crate::drift::DesiredWorkload;

pub const DATA_VOLUME: &str = "data";
pub const CONFIG_VOLUME: &str = "config";
pub const DATA_MOUNT_PATH: &str = "/data";

pub fn object_labels(
    component: &str,
    instance: &str,
    role: Option<&str>,
) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert(labels::APP.to_string(), labels::APP_VALUE.to_string());
    map.insert(labels::COMPONENT.to_string(), component.to_string());
    map.insert(labels::INSTANCE.to_string(), instance.to_string());
    if let Some(role) = role {
        map.insert(labels::ROLE.to_string(), role.to_string());
    }
    map
}

fn quantity_map(values: &BTreeMap<String, String>) -> BTreeMap<String, Quantity> {
    values
        .iter()
        .map(|(k, v)| (k.clone(), Quantity(v.clone())))
        .collect()
}

pub fn to_requirements(resources: &Resources) -> Option<ResourceRequirements> {
    if resources.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        requests: resources.requests.as_ref().map(quantity_map),
        limits: resources.limits.as_ref().map(quantity_map),
        ..Default::default()
    })
}

pub fn desired_workload(
    replicas: i32,
    image: &str,
    resources: Option<ResourceRequirements>,
    storage: Option<&StorageSpec>,
    config_hash: &str,
) -> DesiredWorkload {
    DesiredWorkload {
        replicas,
        image: image.to_string(),
        resources,
        storage_size: storage.map(|s| s.size.clone()),
        storage_class: storage.and_then(|s| s.storage_class_name.clone()),
        config_hash: config_hash.to_string(),
    }
}

/// Everything needed to stamp out one workload set.
pub struct WorkloadSpec<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub labels: BTreeMap<String, String>,
    pub replicas: i32,
    pub image: &'a str,
    pub container_name: &'a str,
    pub command: Vec<String>,
    pub config_map: &'a str,
    /// Where the config volume lands inside the container.
    pub config_mount_path: &'a str,
    pub config_hash: &'a str,
    pub ports: Vec<(&'static str, i32)>,
    pub resources: Option<ResourceRequirements>,
    pub storage: Option<&'a StorageSpec>,
    pub security: Option<&'a SecuritySpec>,
    /// Optional init step run before the main container (e.g. copying a
    /// read-only config into a writable location).
    pub init_command: Option<Vec<String>>,
    /// Governing headless service for stable per-ordinal DNS.
    pub service_name: &'a str,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub tolerations: Option<Vec<Toleration>>,
    pub affinity: Option<Affinity>,
    pub owner: OwnerReference,
}

pub fn stateful_set(w: WorkloadSpec<'_>) -> StatefulSet {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        annotations::CONFIG_HASH.to_string(),
        w.config_hash.to_string(),
    );
    annotations.insert(
        annotations::CREATED_BY.to_string(),
        crate::util::MANAGER_NAME.to_string(),
    );

    let mut volumes = vec![Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: w.config_map.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut volume_claim_templates = None;
    match w.storage {
        Some(storage) => {
            let mut requests = BTreeMap::new();
            requests.insert("storage".to_string(), Quantity(storage.size.clone()));
            volume_claim_templates = Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(DATA_VOLUME.to_string()),
                    labels: Some(w.labels.clone()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    storage_class_name: storage.storage_class_name.clone(),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(requests),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]);
        }
        None => volumes.push(Volume {
            name: DATA_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }),
    }

    let mounts = vec![
        VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: w.config_mount_path.to_string(),
            read_only: Some(true),
            ..Default::default()
        },
        VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: DATA_MOUNT_PATH.to_string(),
            ..Default::default()
        },
    ];

    let mut env = Vec::new();
    let mut args = Vec::new();
    if let Some(security) = w.security {
        if security.auth_enabled()
            && let Some(secret) = security.password_secret()
        {
            env.push(EnvVar {
                name: "REDIS_PASSWORD".to_string(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: secret.name.clone(),
                        key: secret.key.clone(),
                        optional: None,
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            });
            for flag in ["--requirepass", "--masterauth"] {
                args.push(flag.to_string());
                args.push("$(REDIS_PASSWORD)".to_string());
            }
        }
        if let Some(tls) = &security.tls
            && tls.enabled
            && let Some(secret_name) = &tls.secret_name
        {
            volumes.push(Volume {
                name: "tls".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            });
            args.extend(
                [
                    "--tls-port",
                    "6380",
                    "--tls-cert-file",
                    "/tls/tls.crt",
                    "--tls-key-file",
                    "/tls/tls.key",
                    "--tls-ca-cert-file",
                    "/tls/ca.crt",
                ]
                .map(str::to_string),
            );
        }
    }
    let mut mounts_with_tls = mounts;
    if volumes.iter().any(|v| v.name == "tls") {
        mounts_with_tls.push(VolumeMount {
            name: "tls".to_string(),
            mount_path: "/tls".to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let probe_port = w.ports.first().map(|(_, p)| *p).unwrap_or(6379);
    let container = Container {
        name: w.container_name.to_string(),
        image: Some(w.image.to_string()),
        command: Some(w.command),
        args: if args.is_empty() { None } else { Some(args) },
        env: if env.is_empty() { None } else { Some(env) },
        ports: Some(
            w.ports
                .iter()
                .map(|(name, port)| ContainerPort {
                    name: Some(name.to_string()),
                    container_port: *port,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                })
                .collect(),
        ),
        resources: w.resources,
        volume_mounts: Some(mounts_with_tls.clone()),
        readiness_probe: Some(tcp_probe(probe_port, 5, 10)),
        liveness_probe: Some(tcp_probe(probe_port, 15, 20)),
        ..Default::default()
    };

    let init_containers = w.init_command.map(|command| {
        vec![Container {
            name: "config-init".to_string(),
            image: Some(w.image.to_string()),
            command: Some(command),
            volume_mounts: Some(mounts_with_tls),
            ..Default::default()
        }]
    });

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(w.name.to_string()),
            namespace: Some(w.namespace.to_string()),
            labels: Some(w.labels.clone()),
            owner_references: Some(vec![w.owner]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(w.replicas),
            service_name: Some(w.service_name.to_string()),
            selector: LabelSelector {
                match_labels: Some(w.labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(w.labels),
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    init_containers,
                    volumes: Some(volumes),
                    node_selector: w.node_selector,
                    tolerations: w.tolerations,
                    affinity: w.affinity,
                    ..Default::default()
                }),
            },
            volume_claim_templates,
            ..Default::default()
        }),
        status: None,
    }
}

fn tcp_probe(port: i32, initial_delay: i32, period: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            host: None,
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        ..Default::default()
    }
}

pub fn config_map(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    owner: OwnerReference,
    entries: &[(&str, String)],
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        data: Some(
            entries
                .iter()
                .map(|(file, content)| (file.to_string(), content.clone()))
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn service(
    name: &str,
    namespace: &str,
    selector: BTreeMap<String, String>,
    ports: Vec<(&'static str, i32)>,
    headless: bool,
    owner: OwnerReference,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(selector.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: headless.then(|| "None".to_string()),
            selector: Some(selector),
            ports: Some(
                ports
                    .into_iter()
                    .map(|(name, port)| ServicePort {
                        name: Some(name.to_string()),
                        port,
                        target_port: Some(IntOrString::Int(port)),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis_operator_types::{AuthSpec, SecretKeyRef, ports};

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "redis.github.com/v1".to_string(),
            kind: "RedisInstance".to_string(),
            name: "cache".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            ..Default::default()
        }
    }

    fn workload<'a>(storage: Option<&'a StorageSpec>, security: Option<&'a SecuritySpec>) -> WorkloadSpec<'a> {
        WorkloadSpec {
            name: "cache",
            namespace: "default",
            labels: object_labels("instance", "cache", None),
            replicas: 1,
            image: "redis:7.2",
            container_name: "redis",
            command: vec!["redis-server".to_string(), "/etc/redis/redis.conf".to_string()],
            config_map: "cache-config",
            config_mount_path: "/etc/redis",
            config_hash: "abc123",
            ports: vec![("redis", ports::REDIS)],
            resources: None,
            storage,
            security,
            init_command: None,
            service_name: "cache",
            node_selector: None,
            tolerations: None,
            affinity: None,
            owner: owner(),
        }
    }

    #[test]
    fn stateful_set_carries_owner_and_stamp() {
        let sts = stateful_set(workload(None, None));
        let owners = sts.metadata.owner_references.unwrap();
        assert_eq!(owners[0].name, "cache");
        let annotations = sts
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .annotations
            .as_ref()
            .unwrap();
        assert_eq!(annotations[annotations::CONFIG_HASH], "abc123");
    }

    #[test]
    fn storage_becomes_a_claim_template() {
        let storage = StorageSpec {
            size: "1Gi".to_string(),
            storage_class_name: Some("fast".to_string()),
        };
        let sts = stateful_set(workload(Some(&storage), None));
        let spec = sts.spec.unwrap();
        let templates = spec.volume_claim_templates.unwrap();
        assert_eq!(templates.len(), 1);
        let pvc_spec = templates[0].spec.as_ref().unwrap();
        assert_eq!(pvc_spec.storage_class_name.as_deref(), Some("fast"));
        // No emptyDir data volume alongside a claim template.
        let volumes = spec.template.spec.unwrap().volumes.unwrap();
        assert!(volumes.iter().all(|v| v.name != DATA_VOLUME));
    }

    #[test]
    fn no_storage_falls_back_to_empty_dir() {
        let sts = stateful_set(workload(None, None));
        let spec = sts.spec.unwrap();
        assert!(spec.volume_claim_templates.is_none());
        let volumes = spec.template.spec.unwrap().volumes.unwrap();
        assert!(volumes.iter().any(|v| v.name == DATA_VOLUME && v.empty_dir.is_some()));
    }

    #[test]
    fn auth_wires_the_password_secret() {
        let security = SecuritySpec {
            auth: Some(AuthSpec {
                enabled: true,
                password_secret: Some(SecretKeyRef {
                    name: "cache-auth".to_string(),
                    key: "password".to_string(),
                }),
            }),
            tls: None,
        };
        let sts = stateful_set(workload(None, Some(&security)));
        let container = &sts.spec.unwrap().template.spec.unwrap().containers[0];
        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].name, "REDIS_PASSWORD");
        let args = container.args.as_ref().unwrap();
        assert!(args.contains(&"--requirepass".to_string()));
        assert!(args.contains(&"--masterauth".to_string()));
    }

    #[test]
    fn headless_service_has_no_cluster_ip() {
        let svc = service(
            "cache",
            "default",
            object_labels("instance", "cache", None),
            vec![("redis", ports::REDIS)],
            true,
            owner(),
        );
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.ports.as_ref().unwrap()[0].port, 6379);
        let selector = spec.selector.unwrap();
        assert_eq!(selector[labels::APP], labels::APP_VALUE);
        assert_eq!(selector[labels::INSTANCE], "cache");
    }

    #[test]
    fn config_map_holds_rendered_payload() {
        let cm = config_map(
            "cache-config",
            "default",
            object_labels("instance", "cache", None),
            owner(),
            &[("redis.conf", "port 6379\n".to_string())],
        );
        assert_eq!(cm.data.unwrap()["redis.conf"], "port 6379\n");
    }
}
