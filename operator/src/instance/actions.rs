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
use crate::resources::{self, WorkloadSpec};
use crate::storage;
use crate::util::{self, Error, finalizer, patch::*};

pub const COMPONENT: &str = "instance";
pub const CONFIG_MOUNT_PATH: &str = "/etc/redis";

pub fn instance_name(instance: &RedisInstance) -> Result<&str, Error> {
    instance
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| Error::UserInput("RedisInstance is missing metadata.name".to_string()))
}

pub fn instance_namespace(instance: &RedisInstance) -> Result<&str, Error> {
    instance
        .meta()
        .namespace
        .as_deref()
        .ok_or_else(|| Error::UserInput("RedisInstance is missing metadata.namespace".to_string()))
}

pub fn config_map_name(name: &str) -> String {
    format!("{name}-config")
}

pub fn rendered_config(instance: &RedisInstance) -> String {
    config::render_redis_config(&instance.spec.config)
}

pub fn expected_hash(instance: &RedisInstance) -> String {
    config::sha256_hex(&rendered_config(instance))
}

fn owner_ref(instance: &RedisInstance) -> Result<OwnerReference, Error> {
    instance
        .controller_owner_ref(&())
        .ok_or_else(|| Error::UserInput("RedisInstance has no object metadata yet".to_string()))
}

pub fn desired(instance: &RedisInstance) -> crate::drift::DesiredWorkload {
    resources::desired_workload(
        instance.spec.replicas,
        &instance.spec.image,
        resources::to_requirements(&instance.spec.resources),
        instance.spec.storage.as_ref(),
        &expected_hash(instance),
    )
}

pub fn build_config_map(instance: &RedisInstance) -> Result<ConfigMap, Error> {
    let name = instance_name(instance)?;
    Ok(resources::config_map(
        &config_map_name(name),
        instance_namespace(instance)?,
        resources::object_labels(COMPONENT, name, None),
        owner_ref(instance)?,
        &[(config::REDIS_CONF, rendered_config(instance))],
    ))
}

pub fn build_workload(instance: &RedisInstance) -> Result<StatefulSet, Error> {
    let name = instance_name(instance)?;
    Ok(resources::stateful_set(WorkloadSpec {
        name,
        namespace: instance_namespace(instance)?,
        labels: resources::object_labels(COMPONENT, name, None),
        replicas: instance.spec.replicas,
        image: &instance.spec.image,
        container_name: "redis",
        command: vec![
            "redis-server".to_string(),
            format!("{CONFIG_MOUNT_PATH}/{}", config::REDIS_CONF),
        ],
        config_map: &config_map_name(name),
        config_mount_path: CONFIG_MOUNT_PATH,
        config_hash: &expected_hash(instance),
        ports: vec![("redis", ports::REDIS)],
        resources: resources::to_requirements(&instance.spec.resources),
        storage: instance.spec.storage.as_ref(),
        security: None,
        init_command: None,
        service_name: name,
        node_selector: None,
        tolerations: None,
        affinity: None,
        owner: owner_ref(instance)?,
    }))
}

pub fn build_service(instance: &RedisInstance) -> Result<Service, Error> {
    let name = instance_name(instance)?;
    Ok(resources::service(
        name,
        instance_namespace(instance)?,
        resources::object_labels(COMPONENT, name, None),
        vec![("redis", ports::REDIS)],
        true,
        owner_ref(instance)?,
    ))
}

/// Best-effort asynchronous `Updating` pre-announce before a slow
/// substrate action. Failures are logged and do not gate the action.
pub fn announce_updating(client: Client, instance: &RedisInstance, message: String) {
    let instance = instance.clone();
    let generation = instance.metadata.generation;
    tokio::spawn(async move {
        let result = patch_status(client, &instance, move |status: &mut RedisInstanceStatus| {
            status.phase = RedisPhase::Updating;
            status.ready = ReadyState::False;
            status.message = Some(message.clone());
            push_condition(
                status.conditions_mut(),
                make_condition("Ready", "False", "Updating", &message, generation),
            );
        })
        .await;
        if let Err(e) = result {
            eprintln!("{}", format!("pre-announce status write failed: {e}").red());
        }
    });
}

/// Create whichever owned objects are missing: config object first, then
/// the workload set stamped with the current hash, then the service.
pub async fn create(client: Client, instance: &RedisInstance, partial: bool) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;

    let (phase, reason, message) = if partial {
        (
            RedisPhase::Failed,
            "RecreatingObjects",
            format!("Recreating missing objects for RedisInstance '{name}'"),
        )
    } else {
        (
            RedisPhase::Creating,
            "Creating",
            format!("Creating objects for RedisInstance '{name}'"),
        )
    };
    patch_status_retrying(client.clone(), instance, |status: &mut RedisInstanceStatus| {
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
    if util::get_opt(&config_maps, &config_map_name(name)).await?.is_none() {
        util::create_opt(&config_maps, &build_config_map(instance)?).await?;
    }
    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    if util::get_opt(&workloads, name).await?.is_none() {
        util::create_opt(&workloads, &build_workload(instance)?).await?;
    }
    let services: Api<Service> = Api::namespaced(client, namespace);
    if util::get_opt(&services, name).await?.is_none() {
        util::create_opt(&services, &build_service(instance)?).await?;
    }
    Ok(())
}

/// Bring the config object's payload back in line with the rendered
/// configuration. The workload stamp is deliberately left alone; whether
/// that stamp still matches is the classifier's call on a later pass.
pub async fn update_config(client: Client, instance: &RedisInstance) -> Result<(), Error> {
    let namespace = instance_namespace(instance)?;
    let cm = build_config_map(instance)?;
    let api: Api<ConfigMap> = Api::namespaced(client, namespace);
    api.patch(
        &config_map_name(instance_name(instance)?),
        &PatchParams::apply(util::MANAGER_NAME).force(),
        &Patch::Apply(&cm),
    )
    .await?;
    Ok(())
}

/// Apply in-place mutations (replicas, image, resources). The applied
/// object carries the same hash the running workload already has, so the
/// stamp does not move.
pub async fn rolling_update(
    client: Client,
    instance: &RedisInstance,
    mutations: &[crate::drift::Mutation],
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    announce_updating(
        client.clone(),
        instance,
        format!("Rolling update of '{name}': {} change(s)", mutations.len()),
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

/// Grow every claim owned by the workload set.
pub async fn expand_storage(
    client: Client,
    instance: &RedisInstance,
    sts: &StatefulSet,
    new_size: &str,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    announce_updating(
        client.clone(),
        instance,
        format!("Expanding storage of '{name}' to {new_size}"),
    );
    let patched =
        storage::expand_pvcs(client.clone(), instance_namespace(instance)?, sts, new_size).await?;
    println!(
        "📦 expanded {patched} claim(s) of RedisInstance '{name}' to {new_size}"
    );
    Ok(())
}

/// Destructive rebuild: refresh the config object, delete the workload set
/// (clearing any stale finalizers first), wait a short grace period, then
/// recreate it stamped with the new hash.
pub async fn rebuild(client: Client, instance: &RedisInstance, reason: &str) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    announce_updating(
        client.clone(),
        instance,
        format!("Rebuilding '{name}': {reason}"),
    );

    update_config(client.clone(), instance).await?;

    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    finalizer::clear_finalizers(&workloads, name).await?;
    util::delete_opt(&workloads, name).await?;
    tokio::time::sleep(util::REBUILD_GRACE).await;
    util::create_opt(&workloads, &build_workload(instance)?).await?;
    Ok(())
}

/// Record a spec violation. The caller surfaces the violation as an error
/// so the queue re-drives until the spec changes.
pub async fn reject(client: Client, instance: &RedisInstance, message: &str) -> Result<(), Error> {
    let generation = instance.metadata.generation;
    let message = message.to_string();
    patch_status_retrying(client, instance, move |status: &mut RedisInstanceStatus| {
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

/// Report the observed phase, readiness and replica counts.
pub async fn report_status(
    client: Client,
    instance: &RedisInstance,
    phase: RedisPhase,
    ready: ReadyState,
    message: String,
    replicas: i32,
    ready_replicas: i32,
) -> Result<(), Error> {
    let generation = instance.metadata.generation;
    patch_status_retrying(client, instance, move |status: &mut RedisInstanceStatus| {
        status.phase = phase;
        status.ready = ready;
        status.message = Some(message.clone());
        status.replicas = replicas;
        status.ready_replicas = ready_replicas;
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
    })
    .await?;
    Ok(())
}

/// Best-effort deletion of owned objects, then removal of our finalizer
/// once everything is gone. Cleanup errors are returned so the next pass
/// retries.
pub async fn finalize(client: Client, instance: &RedisInstance) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;

    let message = format!(
        "RedisInstance '{name}' is terminating; if deletion hangs, remove the \
         finalizer '{}' manually",
        finalizers::INSTANCE
    );
    let announce = patch_status(
        client.clone(),
        instance,
        move |status: &mut RedisInstanceStatus| {
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
    finalizer::clear_finalizers(&config_maps, &cm_name).await?;
    util::delete_opt(&config_maps, &cm_name).await?;
    finalizer::clear_finalizers(&workloads, name).await?;
    util::delete_opt(&workloads, name).await?;
    finalizer::clear_finalizers(&services, name).await?;
    util::delete_opt(&services, name).await?;

    // "Gone" includes objects the platform has already scheduled for
    // deletion; waiting for full absence would deadlock on slow GC.
    let gone = |deleting: Option<&kube::api::ObjectMeta>| {
        deleting.is_none_or(|m| m.deletion_timestamp.is_some())
    };
    let all_gone = gone(util::get_opt(&config_maps, &cm_name).await?.as_ref().map(|o| &o.metadata))
        && gone(util::get_opt(&workloads, name).await?.as_ref().map(|o| &o.metadata))
        && gone(util::get_opt(&services, name).await?.as_ref().map(|o| &o.metadata));
    if all_gone {
        finalizer::remove_finalizer(client, instance, finalizers::INSTANCE).await?;
    }
    Ok(())
}
