use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    Api, Client,
    api::{ListParams, Patch, PatchParams, Resource},
};
use owo_colors::OwoColorize;
use redis_operator_types::*;

use crate::config;
use crate::drift::DesiredWorkload;
use crate::resources::{self, WorkloadSpec};
use crate::storage;
use crate::util::{self, Error, finalizer, patch::*};

pub const COMPONENT: &str = "cluster";
pub const CONFIG_MOUNT_PATH: &str = "/etc/redis";

pub fn instance_name(instance: &RedisCluster) -> Result<&str, Error> {
    instance
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| Error::UserInput("RedisCluster is missing metadata.name".to_string()))
}

pub fn instance_namespace(instance: &RedisCluster) -> Result<&str, Error> {
    instance
        .meta()
        .namespace
        .as_deref()
        .ok_or_else(|| Error::UserInput("RedisCluster is missing metadata.namespace".to_string()))
}

pub fn config_map_name(name: &str) -> String {
    format!("{name}-config")
}

pub fn service_name(name: &str) -> String {
    format!("{name}-headless")
}

pub fn rendered_config(instance: &RedisCluster) -> String {
    config::render_cluster_config(&instance.spec.cluster)
}

pub fn expected_hash(instance: &RedisCluster) -> String {
    config::sha256_hex(&rendered_config(instance))
}

fn owner_ref(instance: &RedisCluster) -> Result<OwnerReference, Error> {
    instance
        .controller_owner_ref(&())
        .ok_or_else(|| Error::UserInput("RedisCluster has no object metadata yet".to_string()))
}

pub fn desired(instance: &RedisCluster) -> DesiredWorkload {
    resources::desired_workload(
        instance.spec.total_nodes(),
        &instance.spec.image,
        resources::to_requirements(&instance.spec.resources),
        instance.spec.storage.as_ref(),
        &expected_hash(instance),
    )
}

pub fn build_config_map(instance: &RedisCluster) -> Result<ConfigMap, Error> {
    let name = instance_name(instance)?;
    Ok(resources::config_map(
        &config_map_name(name),
        instance_namespace(instance)?,
        resources::object_labels(COMPONENT, name, None),
        owner_ref(instance)?,
        &[(config::REDIS_CONF, rendered_config(instance))],
    ))
}

pub fn build_workload(instance: &RedisCluster) -> Result<StatefulSet, Error> {
    let name = instance_name(instance)?;
    let cm_name = config_map_name(name);
    let svc_name = service_name(name);
    Ok(resources::stateful_set(WorkloadSpec {
        name,
        namespace: instance_namespace(instance)?,
        labels: resources::object_labels(COMPONENT, name, None),
        replicas: instance.spec.total_nodes(),
        image: &instance.spec.image,
        container_name: "redis",
        command: vec![
            "redis-server".to_string(),
            format!("{CONFIG_MOUNT_PATH}/{}", config::REDIS_CONF),
        ],
        config_map: &cm_name,
        config_mount_path: CONFIG_MOUNT_PATH,
        config_hash: &expected_hash(instance),
        ports: vec![("redis", ports::REDIS), ("cluster-bus", ports::CLUSTER_BUS)],
        resources: resources::to_requirements(&instance.spec.resources),
        storage: instance.spec.storage.as_ref(),
        security: Some(&instance.spec.security),
        init_command: None,
        service_name: &svc_name,
        node_selector: instance.spec.placement.node_selector.clone(),
        tolerations: instance.spec.placement.tolerations.clone(),
        affinity: instance.spec.placement.affinity.clone(),
        owner: owner_ref(instance)?,
    }))
}

pub fn build_service(instance: &RedisCluster) -> Result<Service, Error> {
    let name = instance_name(instance)?;
    Ok(resources::service(
        &service_name(name),
        instance_namespace(instance)?,
        resources::object_labels(COMPONENT, name, None),
        vec![("redis", ports::REDIS), ("cluster-bus", ports::CLUSTER_BUS)],
        true,
        owner_ref(instance)?,
    ))
}

pub fn announce_updating(client: Client, instance: &RedisCluster, phase: RedisPhase, message: String) {
    let instance = instance.clone();
    let generation = instance.metadata.generation;
    tokio::spawn(async move {
        let result = patch_status(client, &instance, move |status: &mut RedisClusterStatus| {
            status.phase = phase;
            status.ready = ReadyState::False;
            status.message = Some(message.clone());
            push_condition(
                status.conditions_mut(),
                make_condition("Ready", "False", &phase.to_string(), &message, generation),
            );
        })
        .await;
        if let Err(e) = result {
            eprintln!("{}", format!("pre-announce status write failed: {e}").red());
        }
    });
}

pub async fn create(client: Client, instance: &RedisCluster, partial: bool) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;

    let (phase, reason, message) = if partial {
        (
            RedisPhase::Failed,
            "RecreatingObjects",
            format!("Recreating missing objects for RedisCluster '{name}'"),
        )
    } else {
        (
            RedisPhase::Creating,
            "Creating",
            format!(
                "Creating objects for RedisCluster '{name}' ({} nodes)",
                instance.spec.total_nodes()
            ),
        )
    };
    patch_status_retrying(client.clone(), instance, |status: &mut RedisClusterStatus| {
        status.phase = phase;
        status.ready = ReadyState::False;
        status.message = Some(message.clone());
        push_condition(
            status.conditions_mut(),
            make_condition("Ready", "False", reason, &message, generation),
        );
    })
    .await?;

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    if util::get_opt(&config_maps, &config_map_name(name))
        .await?
        .is_none()
    {
        util::create_opt(&config_maps, &build_config_map(instance)?).await?;
    }
    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    if util::get_opt(&workloads, name).await?.is_none() {
        util::create_opt(&workloads, &build_workload(instance)?).await?;
    }
    let services: Api<Service> = Api::namespaced(client, namespace);
    if util::get_opt(&services, &service_name(name)).await?.is_none() {
        util::create_opt(&services, &build_service(instance)?).await?;
    }
    Ok(())
}

pub async fn update_config(client: Client, instance: &RedisCluster) -> Result<(), Error> {
    let api: Api<ConfigMap> = Api::namespaced(client, instance_namespace(instance)?);
    api.patch(
        &config_map_name(instance_name(instance)?),
        &PatchParams::apply(util::MANAGER_NAME).force(),
        &Patch::Apply(&build_config_map(instance)?),
    )
    .await?;
    Ok(())
}

/// Shard/replica count, image and resource changes are all safe in place;
/// count changes are announced as `Scaling` rather than `Updating`.
pub async fn rolling_update(
    client: Client,
    instance: &RedisCluster,
    scaling: bool,
    mutation_count: usize,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let phase = if scaling {
        RedisPhase::Scaling
    } else {
        RedisPhase::Updating
    };
    announce_updating(
        client.clone(),
        instance,
        phase,
        format!(
            "Rolling update of RedisCluster '{name}' to {} nodes: {mutation_count} change(s)",
            instance.spec.total_nodes()
        ),
    );
    let api: Api<StatefulSet> = Api::namespaced(client, instance_namespace(instance)?);
    api.patch(
        name,
        &PatchParams::apply(util::MANAGER_NAME).force(),
        &Patch::Apply(&build_workload(instance)?),
    )
    .await?;
    Ok(())
}

pub async fn expand_storage(
    client: Client,
    instance: &RedisCluster,
    sts: &StatefulSet,
    new_size: &str,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    announce_updating(
        client.clone(),
        instance,
        RedisPhase::Updating,
        format!("Expanding storage of RedisCluster '{name}' to {new_size}"),
    );
    let patched =
        storage::expand_pvcs(client, instance_namespace(instance)?, sts, new_size).await?;
    println!("📦 expanded {patched} claim(s) of RedisCluster '{name}' to {new_size}");
    Ok(())
}

pub async fn rebuild(client: Client, instance: &RedisCluster, reason: &str) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    announce_updating(
        client.clone(),
        instance,
        RedisPhase::Updating,
        format!("Rebuilding RedisCluster '{name}': {reason}"),
    );

    update_config(client.clone(), instance).await?;

    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    finalizer::clear_finalizers(&workloads, name).await?;
    util::delete_opt(&workloads, name).await?;
    tokio::time::sleep(util::REBUILD_GRACE).await;
    util::create_opt(&workloads, &build_workload(instance)?).await?;
    Ok(())
}

pub async fn reject(client: Client, instance: &RedisCluster, message: &str) -> Result<(), Error> {
    let generation = instance.metadata.generation;
    let message = message.to_string();
    patch_status_retrying(client, instance, move |status: &mut RedisClusterStatus| {
        status.phase = RedisPhase::Failed;
        status.ready = ReadyState::False;
        status.message = Some(message.clone());
        push_condition(
            status.conditions_mut(),
            make_condition("Ready", "False", "SpecRejected", &message, generation),
        );
    })
    .await?;
    Ok(())
}

/// Substrate-derived node view. Cluster bring-up (slot assignment, meet)
/// is driven by Redis itself once the pods see each other over the bus
/// port, so roles here follow the ordinal convention used at creation.
pub async fn observed_nodes(
    client: Client,
    instance: &RedisCluster,
) -> Result<Vec<ClusterNode>, Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let pods: Api<Pod> = Api::namespaced(client, namespace);
    let selector = format!(
        "{}={},{}={},{}={}",
        labels::APP,
        labels::APP_VALUE,
        labels::COMPONENT,
        COMPONENT,
        labels::INSTANCE,
        name
    );
    let mut pods = pods.list(&ListParams::default().labels(&selector)).await?.items;
    pods.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

    let group = 1 + instance.spec.replicas_per_shard;
    Ok(pods
        .into_iter()
        .map(|pod| {
            let pod_name = pod.metadata.name.clone().unwrap_or_default();
            let ordinal: i32 = pod_name
                .rsplit('-')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let ready = pod
                .status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .and_then(|cs| cs.iter().find(|c| c.type_ == "Ready"))
                .is_some_and(|c| c.status == "True");
            ClusterNode {
                id: String::new(),
                ip: pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
                port: ports::REDIS,
                role: if ordinal % group == 0 { "master" } else { "replica" }.to_string(),
                master_id: None,
                ping_sent: 0,
                pong_recv: 0,
                config_epoch: 0,
                link_state: if ready { "connected" } else { "disconnected" }.to_string(),
                slots: Vec::new(),
                pod_name,
            }
        })
        .collect())
}

#[derive(Debug, PartialEq)]
pub struct ClusterReport {
    pub phase: RedisPhase,
    pub ready: ReadyState,
    pub message: String,
    pub info: ClusterInfo,
    pub nodes: Vec<ClusterNode>,
}

pub async fn report_status(
    client: Client,
    instance: &RedisCluster,
    report: ClusterReport,
) -> Result<(), Error> {
    let generation = instance.metadata.generation;
    patch_status_retrying(client, instance, move |status: &mut RedisClusterStatus| {
        status.phase = report.phase;
        status.ready = report.ready;
        status.message = Some(report.message.clone());
        status.cluster = report.info.clone();
        status.nodes = report.nodes.clone();
        push_condition(
            status.conditions_mut(),
            make_condition(
                "Ready",
                &report.ready.to_string(),
                &report.phase.to_string(),
                &report.message,
                generation,
            ),
        );
    })
    .await?;
    Ok(())
}

pub async fn finalize(client: Client, instance: &RedisCluster) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;

    let message = format!(
        "RedisCluster '{name}' is terminating; if deletion hangs, remove the \
         finalizer '{}' manually",
        finalizers::CLUSTER
    );
    let announce = patch_status(
        client.clone(),
        instance,
        move |status: &mut RedisClusterStatus| {
            status.phase = RedisPhase::Terminated;
            status.ready = ReadyState::Unknown;
            status.message = Some(message.clone());
            push_condition(
                status.conditions_mut(),
                make_condition("Ready", "Unknown", "Terminating", &message, generation),
            );
        },
    )
    .await;
    if let Err(e) = announce {
        eprintln!("{}", format!("terminating status write failed: {e}").red());
    }

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);

    let cm_name = config_map_name(name);
    let svc_name = service_name(name);
    finalizer::clear_finalizers(&config_maps, &cm_name).await?;
    util::delete_opt(&config_maps, &cm_name).await?;
    finalizer::clear_finalizers(&workloads, name).await?;
    util::delete_opt(&workloads, name).await?;
    finalizer::clear_finalizers(&services, &svc_name).await?;
    util::delete_opt(&services, &svc_name).await?;

    let all_gone = util::get_opt(&config_maps, &cm_name)
        .await?
        .is_none_or(|o| o.metadata.deletion_timestamp.is_some())
        && util::get_opt(&workloads, name)
            .await?
            .is_none_or(|o| o.metadata.deletion_timestamp.is_some())
        && util::get_opt(&services, &svc_name)
            .await?
            .is_none_or(|o| o.metadata.deletion_timestamp.is_some());
    if all_gone {
        finalizer::remove_finalizer(client, instance, finalizers::CLUSTER).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> RedisCluster {
        let mut instance = RedisCluster::new(name, Default::default());
        instance.metadata.namespace = Some("default".to_string());
        instance.metadata.uid = Some("uid-1".to_string());
        instance
    }

    #[test]
    fn workload_is_sized_for_all_shards() {
        let instance = named("shards");
        let sts = build_workload(&instance).unwrap();
        // 3 shards x (1 primary + 1 replica).
        assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(6));
        let container = &sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        let ports: Vec<i32> = container
            .ports
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.container_port)
            .collect();
        assert_eq!(ports, vec![6379, 16379]);
    }

    #[test]
    fn config_enables_cluster_mode() {
        let instance = named("shards");
        let rendered = rendered_config(&instance);
        assert!(rendered.contains("cluster-enabled yes\n"));
        assert!(rendered.contains("cluster-node-timeout 15000\n"));
    }

    #[test]
    fn bus_service_is_headless() {
        let instance = named("shards");
        let svc = build_service(&instance).unwrap();
        assert_eq!(svc.metadata.name.as_deref(), Some("shards-headless"));
        assert_eq!(svc.spec.unwrap().cluster_ip.as_deref(), Some("None"));
    }
}
