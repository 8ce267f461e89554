use std::collections::BTreeMap;

use kube::{Api, Client, api::ObjectMeta};
use owo_colors::OwoColorize;
use redis_operator_types::*;

use crate::util::{self, Error, patch::*};

/// Make sure the conventionally-named view for a managed resource exists.
/// Views deliberately carry no owner reference: a deleted resource leaves
/// its view behind, reporting `NotFound`.
pub async fn ensure_view(
    client: Client,
    namespace: &str,
    kind: RedisKindRef,
    resource_name: &str,
) -> Result<(), Error> {
    let views: Api<Redis> = Api::namespaced(client, namespace);
    let name = view_name(resource_name);
    if util::get_opt(&views, &name).await?.is_some() {
        return Ok(());
    }

    let mut view_labels = BTreeMap::new();
    view_labels.insert(labels::VIEW_AUTO_CREATED.to_string(), "true".to_string());
    view_labels.insert(labels::VIEW_TYPE.to_string(), kind.to_string());
    view_labels.insert(labels::VIEW_RESOURCE.to_string(), resource_name.to_string());

    let view = Redis {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(view_labels),
            ..Default::default()
        },
        spec: RedisSpec {
            kind_ref: kind,
            resource_name: resource_name.to_string(),
            resource_namespace: None,
        },
        status: None,
    };
    match views.create(&Default::default(), &view).await {
        Ok(_) => {
            println!(
                "{}",
                format!("✨ materialized view {namespace}/{name} for {kind} '{resource_name}'")
                    .green()
            );
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Projection of a referenced object into view status fields. The
/// `lastUpdated` stamp is left for the status writer.
pub fn project_instance(obj: &RedisInstance) -> RedisStatus {
    let status = obj.status.clone().unwrap_or_default();
    RedisStatus {
        status: status.phase.to_string(),
        ready: status.ready,
        message: status.message,
        conditions: status.conditions,
        last_updated: None,
        summary: Some(RedisSummary {
            instance: Some(InstanceSummary {
                replicas: status.replicas,
                ready_replicas: status.ready_replicas,
            }),
            ..Default::default()
        }),
    }
}

pub fn project_master_replica(obj: &RedisMasterReplica) -> RedisStatus {
    let status = obj.status.clone().unwrap_or_default();
    RedisStatus {
        status: status.phase.to_string(),
        ready: status.ready,
        message: status.message,
        conditions: status.conditions,
        last_updated: None,
        summary: Some(RedisSummary {
            master_replica: Some(MasterReplicaSummary {
                master_ready: status.master.ready,
                replicas_ready: status.replicas.ready,
                replicas_total: status.replicas.total,
            }),
            ..Default::default()
        }),
    }
}

pub fn project_sentinel(obj: &RedisSentinel) -> RedisStatus {
    let status = obj.status.clone().unwrap_or_default();
    RedisStatus {
        status: status.phase.to_string(),
        ready: status.ready,
        message: status.message,
        conditions: status.conditions,
        last_updated: None,
        summary: Some(RedisSummary {
            sentinel: Some(SentinelSummary {
                sentinels_ready: status.sentinels.ready,
                sentinels_total: status.sentinels.total,
                monitored_master: status.monitored_master.map(|m| m.name),
            }),
            ..Default::default()
        }),
    }
}

pub fn project_cluster(obj: &RedisCluster) -> RedisStatus {
    let status = obj.status.clone().unwrap_or_default();
    RedisStatus {
        status: status.phase.to_string(),
        ready: status.ready,
        message: status.message,
        conditions: status.conditions,
        last_updated: None,
        summary: Some(RedisSummary {
            cluster: Some(ClusterSummary {
                shards: obj.spec.shards,
                known_nodes: status.cluster.known_nodes,
                state: status.cluster.state,
            }),
            ..Default::default()
        }),
    }
}

pub fn not_found(spec: &RedisSpec, namespace: &str) -> RedisStatus {
    RedisStatus {
        status: STATUS_NOT_FOUND.to_string(),
        ready: ReadyState::False,
        message: Some(format!(
            "referenced {} '{}/{}' does not exist",
            spec.kind_ref,
            spec.resource_namespace.as_deref().unwrap_or(namespace),
            spec.resource_name
        )),
        conditions: Vec::new(),
        last_updated: None,
        summary: None,
    }
}

/// Load the referenced kind and mirror its status fields.
pub async fn project(client: Client, namespace: &str, spec: &RedisSpec) -> Result<RedisStatus, Error> {
    let target_namespace = spec.resource_namespace.as_deref().unwrap_or(namespace);
    let projected = match spec.kind_ref {
        RedisKindRef::Instance => {
            let api: Api<RedisInstance> = Api::namespaced(client, target_namespace);
            util::get_opt(&api, &spec.resource_name)
                .await?
                .map(|o| project_instance(&o))
        }
        RedisKindRef::MasterReplica => {
            let api: Api<RedisMasterReplica> = Api::namespaced(client, target_namespace);
            util::get_opt(&api, &spec.resource_name)
                .await?
                .map(|o| project_master_replica(&o))
        }
        RedisKindRef::Sentinel => {
            let api: Api<RedisSentinel> = Api::namespaced(client, target_namespace);
            util::get_opt(&api, &spec.resource_name)
                .await?
                .map(|o| project_sentinel(&o))
        }
        RedisKindRef::Cluster => {
            let api: Api<RedisCluster> = Api::namespaced(client, target_namespace);
            util::get_opt(&api, &spec.resource_name)
                .await?
                .map(|o| project_cluster(&o))
        }
    };
    Ok(projected.unwrap_or_else(|| not_found(spec, namespace)))
}

pub async fn update_view(client: Client, view: &Redis, projected: RedisStatus) -> Result<(), Error> {
    patch_status_retrying(client, view, move |status: &mut RedisStatus| {
        status.status = projected.status.clone();
        status.ready = projected.ready;
        status.message = projected.message.clone();
        status.conditions = projected.conditions.clone();
        status.summary = projected.summary.clone();
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_projection_mirrors_phase_and_counts() {
        let mut obj = RedisInstance::new("cache", Default::default());
        obj.status = Some(RedisInstanceStatus {
            phase: RedisPhase::Running,
            ready: ReadyState::True,
            message: Some("all good".to_string()),
            replicas: 3,
            ready_replicas: 3,
            ..Default::default()
        });
        let projected = project_instance(&obj);
        assert_eq!(projected.status, "Running");
        assert_eq!(projected.ready, ReadyState::True);
        let summary = projected.summary.unwrap().instance.unwrap();
        assert_eq!(summary.replicas, 3);
        assert_eq!(summary.ready_replicas, 3);
    }

    #[test]
    fn missing_reference_projects_not_found() {
        let spec = RedisSpec {
            kind_ref: RedisKindRef::Instance,
            resource_name: "gone".to_string(),
            resource_namespace: None,
        };
        let projected = not_found(&spec, "default");
        assert_eq!(projected.status, STATUS_NOT_FOUND);
        assert_eq!(projected.ready, ReadyState::False);
        assert!(projected.message.unwrap().contains("default/gone"));
        assert!(projected.summary.is_none());
    }

    #[test]
    fn sentinel_projection_carries_the_monitored_master() {
        let mut obj = RedisSentinel::new("guard", Default::default());
        obj.status = Some(RedisSentinelStatus {
            phase: RedisPhase::Running,
            ready: ReadyState::True,
            sentinels: SentinelCounts { ready: 3, total: 3 },
            monitored_master: Some(MonitoredMaster {
                name: "mymaster".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
        let summary = project_sentinel(&obj).summary.unwrap().sentinel.unwrap();
        assert_eq!(summary.sentinels_ready, 3);
        assert_eq!(summary.monitored_master.as_deref(), Some("mymaster"));
    }
}
