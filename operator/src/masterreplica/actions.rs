use std::fmt;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    Api, Client,
    api::{Patch, PatchParams, Resource},
};
use owo_colors::OwoColorize;
use redis_operator_types::*;

use crate::config;
use crate::drift::DesiredWorkload;
use crate::resources::{self, WorkloadSpec};
use crate::storage;
use crate::util::{self, Error, finalizer, patch::*};

pub const COMPONENT: &str = "masterreplica";
pub const CONFIG_MOUNT_PATH: &str = "/etc/redis";

/// The two sub-workloads this reconciler drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Master,
    Replica,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Replica => write!(f, "replica"),
        }
    }
}

pub fn instance_name(instance: &RedisMasterReplica) -> Result<&str, Error> {
    instance.meta().name.as_deref().ok_or_else(|| {
        Error::UserInput("RedisMasterReplica is missing metadata.name".to_string())
    })
}

pub fn instance_namespace(instance: &RedisMasterReplica) -> Result<&str, Error> {
    instance.meta().namespace.as_deref().ok_or_else(|| {
        Error::UserInput("RedisMasterReplica is missing metadata.namespace".to_string())
    })
}

pub fn workload_name(name: &str, role: Role) -> String {
    format!("{name}-{role}")
}

pub fn config_map_name(name: &str, role: Role) -> String {
    format!("{name}-{role}-config")
}

/// The stable endpoint replicas follow; also the client entrypoint.
pub fn master_service_name(name: &str) -> String {
    workload_name(name, Role::Master)
}

pub fn rendered_config(instance: &RedisMasterReplica, role: Role) -> Result<String, Error> {
    let name = instance_name(instance)?;
    Ok(match role {
        Role::Master => config::render_redis_config(&instance.spec.master_config()),
        Role::Replica => config::render_replica_config(
            &instance.spec.replica_config(),
            &master_service_name(name),
        ),
    })
}

pub fn expected_hash(instance: &RedisMasterReplica, role: Role) -> Result<String, Error> {
    Ok(config::sha256_hex(&rendered_config(instance, role)?))
}

fn owner_ref(instance: &RedisMasterReplica) -> Result<OwnerReference, Error> {
    instance.controller_owner_ref(&()).ok_or_else(|| {
        Error::UserInput("RedisMasterReplica has no object metadata yet".to_string())
    })
}

fn role_replicas(instance: &RedisMasterReplica, role: Role) -> i32 {
    match role {
        Role::Master => 1,
        Role::Replica => instance.spec.replica.replicas,
    }
}

fn role_storage(instance: &RedisMasterReplica, role: Role) -> Option<&StorageSpec> {
    match role {
        Role::Master => instance.spec.master_storage(),
        Role::Replica => instance.spec.replica_storage(),
    }
}

fn role_resources(instance: &RedisMasterReplica, role: Role) -> &Resources {
    match role {
        Role::Master => instance.spec.master_resources(),
        Role::Replica => instance.spec.replica_resources(),
    }
}

pub fn desired(instance: &RedisMasterReplica, role: Role) -> Result<DesiredWorkload, Error> {
    Ok(resources::desired_workload(
        role_replicas(instance, role),
        &instance.spec.image,
        resources::to_requirements(role_resources(instance, role)),
        role_storage(instance, role),
        &expected_hash(instance, role)?,
    ))
}

pub fn build_config_map(instance: &RedisMasterReplica, role: Role) -> Result<ConfigMap, Error> {
    let name = instance_name(instance)?;
    Ok(resources::config_map(
        &config_map_name(name, role),
        instance_namespace(instance)?,
        resources::object_labels(COMPONENT, name, Some(&role.to_string())),
        owner_ref(instance)?,
        &[(config::REDIS_CONF, rendered_config(instance, role)?)],
    ))
}

pub fn build_workload(instance: &RedisMasterReplica, role: Role) -> Result<StatefulSet, Error> {
    let name = instance_name(instance)?;
    let sts_name = workload_name(name, role);
    let cm_name = config_map_name(name, role);
    let service_name = workload_name(name, role);
    Ok(resources::stateful_set(WorkloadSpec {
        name: &sts_name,
        namespace: instance_namespace(instance)?,
        labels: resources::object_labels(COMPONENT, name, Some(&role.to_string())),
        replicas: role_replicas(instance, role),
        image: &instance.spec.image,
        container_name: "redis",
        command: vec![
            "redis-server".to_string(),
            format!("{CONFIG_MOUNT_PATH}/{}", config::REDIS_CONF),
        ],
        config_map: &cm_name,
        config_mount_path: CONFIG_MOUNT_PATH,
        config_hash: &expected_hash(instance, role)?,
        ports: vec![("redis", ports::REDIS)],
        resources: resources::to_requirements(role_resources(instance, role)),
        storage: role_storage(instance, role),
        security: Some(&instance.spec.security),
        init_command: None,
        service_name: &service_name,
        node_selector: None,
        tolerations: None,
        affinity: None,
        owner: owner_ref(instance)?,
    }))
}

pub fn build_service(instance: &RedisMasterReplica, role: Role) -> Result<Service, Error> {
    let name = instance_name(instance)?;
    Ok(resources::service(
        &workload_name(name, role),
        instance_namespace(instance)?,
        resources::object_labels(COMPONENT, name, Some(&role.to_string())),
        vec![("redis", ports::REDIS)],
        false,
        owner_ref(instance)?,
    ))
}

pub fn announce_updating(client: Client, instance: &RedisMasterReplica, message: String) {
    let instance = instance.clone();
    let generation = instance.metadata.generation;
    tokio::spawn(async move {
        let result = patch_status(
            client,
            &instance,
            move |status: &mut RedisMasterReplicaStatus| {
                status.phase = RedisPhase::Updating;
                status.ready = ReadyState::False;
                status.message = Some(message.clone());
                push_condition(
                    status.conditions_mut(),
                    make_condition("Ready", "False", "Updating", &message, generation),
                );
            },
        )
        .await;
        if let Err(e) = result {
            eprintln!("{}", format!("pre-announce status write failed: {e}").red());
        }
    });
}

/// Create whichever of the six owned objects are missing, master side
/// first so replicas have an endpoint to follow.
pub async fn create(
    client: Client,
    instance: &RedisMasterReplica,
    partial: bool,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;

    let (phase, reason, message) = if partial {
        (
            RedisPhase::Failed,
            "RecreatingObjects",
            format!("Recreating missing objects for RedisMasterReplica '{name}'"),
        )
    } else {
        (
            RedisPhase::Creating,
            "Creating",
            format!("Creating objects for RedisMasterReplica '{name}'"),
        )
    };
    patch_status_retrying(
        client.clone(),
        instance,
        |status: &mut RedisMasterReplicaStatus| {
            status.phase = phase;
            status.ready = ReadyState::False;
            status.message = Some(message.clone());
            push_condition(
                status.conditions_mut(),
                make_condition("Ready", "False", reason, &message, generation),
            );
        },
    )
    .await?;

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(client, namespace);
    for role in [Role::Master, Role::Replica] {
        if util::get_opt(&config_maps, &config_map_name(name, role))
            .await?
            .is_none()
        {
            util::create_opt(&config_maps, &build_config_map(instance, role)?).await?;
        }
        if util::get_opt(&workloads, &workload_name(name, role))
            .await?
            .is_none()
        {
            util::create_opt(&workloads, &build_workload(instance, role)?).await?;
        }
        if util::get_opt(&services, &workload_name(name, role))
            .await?
            .is_none()
        {
            util::create_opt(&services, &build_service(instance, role)?).await?;
        }
    }
    Ok(())
}

pub async fn update_config(
    client: Client,
    instance: &RedisMasterReplica,
    role: Role,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let api: Api<ConfigMap> = Api::namespaced(client, instance_namespace(instance)?);
    api.patch(
        &config_map_name(name, role),
        &PatchParams::apply(util::MANAGER_NAME).force(),
        &Patch::Apply(&build_config_map(instance, role)?),
    )
    .await?;
    Ok(())
}

pub async fn rolling_update(
    client: Client,
    instance: &RedisMasterReplica,
    role: Role,
    mutation_count: usize,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    announce_updating(
        client.clone(),
        instance,
        format!("Rolling update of '{name}' {role} workload: {mutation_count} change(s)"),
    );
    let api: Api<StatefulSet> = Api::namespaced(client, instance_namespace(instance)?);
    api.patch(
        &workload_name(name, role),
        &PatchParams::apply(util::MANAGER_NAME).force(),
        &Patch::Apply(&build_workload(instance, role)?),
    )
    .await?;
    Ok(())
}

pub async fn expand_storage(
    client: Client,
    instance: &RedisMasterReplica,
    role: Role,
    new_size: &str,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    announce_updating(
        client.clone(),
        instance,
        format!("Expanding {role} storage of '{name}' to {new_size}"),
    );
    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let sts = workloads.get(&workload_name(name, role)).await?;
    let patched = storage::expand_pvcs(client, namespace, &sts, new_size).await?;
    println!("📦 expanded {patched} {role} claim(s) of RedisMasterReplica '{name}' to {new_size}");
    Ok(())
}

pub async fn rebuild(
    client: Client,
    instance: &RedisMasterReplica,
    role: Role,
    reason: &str,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    announce_updating(
        client.clone(),
        instance,
        format!("Rebuilding '{name}' {role} workload: {reason}"),
    );

    update_config(client.clone(), instance, role).await?;

    let sts_name = workload_name(name, role);
    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    finalizer::clear_finalizers(&workloads, &sts_name).await?;
    util::delete_opt(&workloads, &sts_name).await?;
    tokio::time::sleep(util::REBUILD_GRACE).await;
    util::create_opt(&workloads, &build_workload(instance, role)?).await?;
    Ok(())
}

pub async fn reject(
    client: Client,
    instance: &RedisMasterReplica,
    message: &str,
) -> Result<(), Error> {
    let generation = instance.metadata.generation;
    let message = message.to_string();
    patch_status_retrying(
        client,
        instance,
        move |status: &mut RedisMasterReplicaStatus| {
            status.phase = RedisPhase::Failed;
            status.ready = ReadyState::False;
            status.message = Some(message.clone());
            push_condition(
                status.conditions_mut(),
                make_condition("Ready", "False", "SpecRejected", &message, generation),
            );
        },
    )
    .await?;
    Ok(())
}

/// Report the compound status: phase plus per-role detail blocks.
#[allow(clippy::too_many_arguments)]
pub async fn report_status(
    client: Client,
    instance: &RedisMasterReplica,
    phase: RedisPhase,
    ready: ReadyState,
    message: String,
    master_ready: bool,
    replicas_ready: i32,
) -> Result<(), Error> {
    let name = instance_name(instance)?.to_string();
    let generation = instance.metadata.generation;
    let total = instance.spec.replica.replicas;
    patch_status_retrying(
        client,
        instance,
        move |status: &mut RedisMasterReplicaStatus| {
            status.phase = phase;
            status.ready = ready;
            status.message = Some(message.clone());
            status.master = MasterStatus {
                ready: master_ready,
                pod_name: Some(format!("{}-0", workload_name(&name, Role::Master))),
                service_name: Some(master_service_name(&name)),
                role: Role::Master.to_string(),
            };
            status.replicas = ReplicaGroupStatus {
                ready: replicas_ready,
                total,
                pod_names: (0..total)
                    .map(|i| format!("{}-{i}", workload_name(&name, Role::Replica)))
                    .collect(),
                service_name: Some(workload_name(&name, Role::Replica)),
            };
            push_condition(
                status.conditions_mut(),
                make_condition(
                    "Ready",
                    &ready.to_string(),
                    &phase.to_string(),
                    &message,
                    generation,
                ),
            );
        },
    )
    .await?;
    Ok(())
}

pub async fn finalize(client: Client, instance: &RedisMasterReplica) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;

    let message = format!(
        "RedisMasterReplica '{name}' is terminating; if deletion hangs, remove \
         the finalizer '{}' manually",
        finalizers::MASTER_REPLICA
    );
    let announce = patch_status(
        client.clone(),
        instance,
        move |status: &mut RedisMasterReplicaStatus| {
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

    let mut all_gone = true;
    for role in [Role::Master, Role::Replica] {
        let cm_name = config_map_name(name, role);
        let sts_name = workload_name(name, role);
        finalizer::clear_finalizers(&config_maps, &cm_name).await?;
        util::delete_opt(&config_maps, &cm_name).await?;
        finalizer::clear_finalizers(&workloads, &sts_name).await?;
        util::delete_opt(&workloads, &sts_name).await?;
        finalizer::clear_finalizers(&services, &sts_name).await?;
        util::delete_opt(&services, &sts_name).await?;

        all_gone &= util::get_opt(&config_maps, &cm_name)
            .await?
            .is_none_or(|o| o.metadata.deletion_timestamp.is_some())
            && util::get_opt(&workloads, &sts_name)
                .await?
                .is_none_or(|o| o.metadata.deletion_timestamp.is_some())
            && util::get_opt(&services, &sts_name)
                .await?
                .is_none_or(|o| o.metadata.deletion_timestamp.is_some());
    }
    if all_gone {
        finalizer::remove_finalizer(client, instance, finalizers::MASTER_REPLICA).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> RedisMasterReplica {
        let mut instance = RedisMasterReplica::new(name, Default::default());
        instance.metadata.namespace = Some("default".to_string());
        instance.metadata.uid = Some("uid-1".to_string());
        instance
    }

    #[test]
    fn replica_config_follows_the_master_service() {
        let instance = named("cache");
        let rendered = rendered_config(&instance, Role::Replica).unwrap();
        assert!(rendered.contains("replicaof cache-master 6379\n"));
        let master = rendered_config(&instance, Role::Master).unwrap();
        assert!(!master.contains("replicaof"));
    }

    #[test]
    fn role_hashes_differ() {
        let instance = named("cache");
        assert_ne!(
            expected_hash(&instance, Role::Master).unwrap(),
            expected_hash(&instance, Role::Replica).unwrap()
        );
    }

    #[test]
    fn workloads_are_sized_per_role() {
        let instance = named("cache");
        let master = build_workload(&instance, Role::Master).unwrap();
        assert_eq!(master.spec.as_ref().unwrap().replicas, Some(1));
        let replica = build_workload(&instance, Role::Replica).unwrap();
        assert_eq!(replica.spec.as_ref().unwrap().replicas, Some(2));
        assert_eq!(
            replica.metadata.name.as_deref(),
            Some("cache-replica")
        );
    }

    #[test]
    fn role_labels_separate_the_selectors() {
        let instance = named("cache");
        let master = build_service(&instance, Role::Master).unwrap();
        let selector = master.spec.unwrap().selector.unwrap();
        assert_eq!(selector[labels::ROLE], "master");
    }
}
