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

pub const COMPONENT: &str = "sentinel";
pub const SENTINEL_MOUNT_PATH: &str = "/etc/sentinel-ro";
pub const REDIS_MOUNT_PATH: &str = "/etc/redis-ro";

/// The workloads a sentinel resource may own: the sentinel set itself and,
/// in embedded mode, the monitored Redis set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Sentinel,
    Redis,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Sentinel => write!(f, "sentinel"),
            Target::Redis => write!(f, "redis"),
        }
    }
}

pub fn instance_name(instance: &RedisSentinel) -> Result<&str, Error> {
    instance
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| Error::UserInput("RedisSentinel is missing metadata.name".to_string()))
}

pub fn instance_namespace(instance: &RedisSentinel) -> Result<&str, Error> {
    instance
        .meta()
        .namespace
        .as_deref()
        .ok_or_else(|| Error::UserInput("RedisSentinel is missing metadata.namespace".to_string()))
}

pub fn sentinel_workload_name(name: &str) -> String {
    format!("{name}-sentinel")
}

pub fn sentinel_config_name(name: &str) -> String {
    format!("{name}-sentinel-config")
}

pub fn redis_workload_name(name: &str) -> String {
    format!("{name}-redis")
}

pub fn redis_service_name(name: &str) -> String {
    format!("{name}-redis-headless")
}

pub fn redis_config_name(name: &str) -> String {
    format!("{name}-redis-config")
}

/// Stable per-ordinal DNS name of the embedded primary (ordinal 0).
pub fn primary_fqdn(name: &str, namespace: &str) -> String {
    format!(
        "{}-0.{}.{namespace}.svc.cluster.local",
        redis_workload_name(name),
        redis_service_name(name)
    )
}

/// Address selection for a looked-up service: the cluster IP when one is
/// assigned and not the headless sentinel value, else the DNS fallback.
pub fn service_address(cluster_ip: Option<&str>, fqdn: &str) -> String {
    match cluster_ip {
        Some(ip) if !ip.is_empty() && ip != "None" => ip.to_string(),
        _ => fqdn.to_string(),
    }
}

/// Resolve the monitored primary's address without relying on external
/// DNS: look up the primary service and prefer its cluster IP.
pub async fn resolve_primary_address(
    client: Client,
    instance: &RedisSentinel,
) -> Result<String, Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let (service_name, service_namespace, fqdn) = match &instance.spec.external_master {
        Some(external) => {
            let ns = external.namespace.as_deref().unwrap_or(namespace);
            let svc = format!("{}-master", external.name);
            let fqdn = format!("{svc}.{ns}.svc.cluster.local");
            (svc, ns.to_string(), fqdn)
        }
        None => (
            redis_service_name(name),
            namespace.to_string(),
            primary_fqdn(name, namespace),
        ),
    };
    let services: Api<Service> = Api::namespaced(client, &service_namespace);
    let cluster_ip = util::get_opt(&services, &service_name)
        .await?
        .and_then(|svc| svc.spec)
        .and_then(|spec| spec.cluster_ip);
    Ok(service_address(cluster_ip.as_deref(), &fqdn))
}

pub fn rendered_sentinel_config(instance: &RedisSentinel, host: &str) -> String {
    config::render_sentinel_config(&instance.spec.sentinel, instance.spec.master_name(), host)
}

/// Stamp for the sentinel workload: tuning only, so address rewrites never
/// trigger a rebuild.
pub fn sentinel_hash(instance: &RedisSentinel) -> String {
    config::sentinel_tuning_digest(&instance.spec.sentinel, instance.spec.master_name())
}

/// Shared configuration of the embedded Redis pods. Ordinal-specific
/// replica wiring happens in the init step, not here.
pub fn rendered_redis_config(instance: &RedisSentinel) -> String {
    let base = match &instance.spec.redis {
        Some(redis) => merged_config(&redis.config, &redis.master.config),
        None => Default::default(),
    };
    config::render_redis_config(&base)
}

pub fn redis_hash(instance: &RedisSentinel) -> String {
    config::sha256_hex(&rendered_redis_config(instance))
}

fn owner_ref(instance: &RedisSentinel) -> Result<OwnerReference, Error> {
    instance
        .controller_owner_ref(&())
        .ok_or_else(|| Error::UserInput("RedisSentinel has no object metadata yet".to_string()))
}

fn embedded_resources(instance: &RedisSentinel) -> &Resources {
    match &instance.spec.redis {
        Some(redis) if !redis.master.resources.is_empty() => &redis.master.resources,
        _ => &instance.spec.resources,
    }
}

fn embedded_storage(instance: &RedisSentinel) -> Option<&StorageSpec> {
    instance
        .spec
        .redis
        .as_ref()
        .and_then(|r| r.master.storage.as_ref())
        .or(instance.spec.storage.as_ref())
}

pub fn desired(instance: &RedisSentinel, target: Target) -> DesiredWorkload {
    match target {
        Target::Sentinel => resources::desired_workload(
            instance.spec.replicas,
            &instance.spec.image,
            resources::to_requirements(&instance.spec.resources),
            instance.spec.storage.as_ref(),
            &sentinel_hash(instance),
        ),
        Target::Redis => resources::desired_workload(
            instance.spec.embedded_redis_replicas(),
            &instance.spec.image,
            resources::to_requirements(embedded_resources(instance)),
            embedded_storage(instance),
            &redis_hash(instance),
        ),
    }
}

pub fn build_sentinel_config_map(
    instance: &RedisSentinel,
    host: &str,
) -> Result<ConfigMap, Error> {
    let name = instance_name(instance)?;
    Ok(resources::config_map(
        &sentinel_config_name(name),
        instance_namespace(instance)?,
        resources::object_labels(COMPONENT, name, Some(labels::ROLE_SENTINEL)),
        owner_ref(instance)?,
        &[(config::SENTINEL_CONF, rendered_sentinel_config(instance, host))],
    ))
}

pub fn build_redis_config_map(instance: &RedisSentinel) -> Result<ConfigMap, Error> {
    let name = instance_name(instance)?;
    Ok(resources::config_map(
        &redis_config_name(name),
        instance_namespace(instance)?,
        resources::object_labels(COMPONENT, name, Some("redis")),
        owner_ref(instance)?,
        &[(config::REDIS_CONF, rendered_redis_config(instance))],
    ))
}

/// The sentinel process rewrites its config file at runtime, so an init
/// step copies the read-only mounted config into the writable data volume.
pub fn build_sentinel_workload(instance: &RedisSentinel) -> Result<StatefulSet, Error> {
    let name = instance_name(instance)?;
    let sts_name = sentinel_workload_name(name);
    let cm_name = sentinel_config_name(name);
    Ok(resources::stateful_set(WorkloadSpec {
        name: &sts_name,
        namespace: instance_namespace(instance)?,
        labels: resources::object_labels(COMPONENT, name, Some(labels::ROLE_SENTINEL)),
        replicas: instance.spec.replicas,
        image: &instance.spec.image,
        container_name: "sentinel",
        command: vec![
            "redis-sentinel".to_string(),
            format!("{}/{}", resources::DATA_MOUNT_PATH, config::SENTINEL_CONF),
        ],
        config_map: &cm_name,
        config_mount_path: SENTINEL_MOUNT_PATH,
        config_hash: &sentinel_hash(instance),
        ports: vec![("sentinel", ports::SENTINEL)],
        resources: resources::to_requirements(&instance.spec.resources),
        storage: instance.spec.storage.as_ref(),
        security: None,
        init_command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "cp {SENTINEL_MOUNT_PATH}/{conf} {data}/{conf}",
                conf = config::SENTINEL_CONF,
                data = resources::DATA_MOUNT_PATH,
            ),
        ]),
        service_name: &sts_name,
        node_selector: None,
        tolerations: None,
        affinity: None,
        owner: owner_ref(instance)?,
    }))
}

/// Embedded Redis workload: ordinal 0 is the primary; higher ordinals are
/// wired as its replicas by the init step, which derives the ordinal from
/// the pod hostname and appends a `replicaof` line pointing at the
/// primary's stable per-ordinal DNS name.
pub fn build_redis_workload(instance: &RedisSentinel) -> Result<StatefulSet, Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let sts_name = redis_workload_name(name);
    let cm_name = redis_config_name(name);
    let service_name = redis_service_name(name);
    let init = format!(
        "ORD=\"${{HOSTNAME##*-}}\"; cp {REDIS_MOUNT_PATH}/{conf} {data}/{conf}; \
         if [ \"$ORD\" != \"0\" ]; then echo \"replicaof {fqdn} {port}\" >> {data}/{conf}; fi",
        conf = config::REDIS_CONF,
        data = resources::DATA_MOUNT_PATH,
        fqdn = primary_fqdn(name, namespace),
        port = ports::REDIS,
    );
    Ok(resources::stateful_set(WorkloadSpec {
        name: &sts_name,
        namespace,
        labels: resources::object_labels(COMPONENT, name, Some("redis")),
        replicas: instance.spec.embedded_redis_replicas(),
        image: &instance.spec.image,
        container_name: "redis",
        command: vec![
            "redis-server".to_string(),
            format!("{}/{}", resources::DATA_MOUNT_PATH, config::REDIS_CONF),
        ],
        config_map: &cm_name,
        config_mount_path: REDIS_MOUNT_PATH,
        config_hash: &redis_hash(instance),
        ports: vec![("redis", ports::REDIS)],
        resources: resources::to_requirements(embedded_resources(instance)),
        storage: embedded_storage(instance),
        security: None,
        init_command: Some(vec!["sh".to_string(), "-c".to_string(), init]),
        service_name: &service_name,
        node_selector: None,
        tolerations: None,
        affinity: None,
        owner: owner_ref(instance)?,
    }))
}

pub fn build_sentinel_service(instance: &RedisSentinel) -> Result<Service, Error> {
    let name = instance_name(instance)?;
    Ok(resources::service(
        &sentinel_workload_name(name),
        instance_namespace(instance)?,
        resources::object_labels(COMPONENT, name, Some(labels::ROLE_SENTINEL)),
        vec![("sentinel", ports::SENTINEL)],
        true,
        owner_ref(instance)?,
    ))
}

pub fn build_redis_service(instance: &RedisSentinel) -> Result<Service, Error> {
    let name = instance_name(instance)?;
    Ok(resources::service(
        &redis_service_name(name),
        instance_namespace(instance)?,
        resources::object_labels(COMPONENT, name, Some("redis")),
        vec![("redis", ports::REDIS)],
        true,
        owner_ref(instance)?,
    ))
}

pub fn announce_updating(client: Client, instance: &RedisSentinel, message: String) {
    let instance = instance.clone();
    let generation = instance.metadata.generation;
    tokio::spawn(async move {
        let result = patch_status(client, &instance, move |status: &mut RedisSentinelStatus| {
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

/// Create whichever owned objects are missing. In embedded mode the Redis
/// side goes first so the primary's DNS name exists before sentinels start
/// probing it.
pub async fn create(
    client: Client,
    instance: &RedisSentinel,
    host: &str,
    partial: bool,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;

    let (phase, reason, message) = if partial {
        (
            RedisPhase::Failed,
            "RecreatingObjects",
            format!("Recreating missing objects for RedisSentinel '{name}'"),
        )
    } else {
        (
            RedisPhase::Creating,
            "Creating",
            format!("Creating objects for RedisSentinel '{name}'"),
        )
    };
    patch_status_retrying(client.clone(), instance, |status: &mut RedisSentinelStatus| {
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
    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(client, namespace);

    if !instance.spec.is_referenced() {
        if util::get_opt(&config_maps, &redis_config_name(name))
            .await?
            .is_none()
        {
            util::create_opt(&config_maps, &build_redis_config_map(instance)?).await?;
        }
        if util::get_opt(&workloads, &redis_workload_name(name))
            .await?
            .is_none()
        {
            util::create_opt(&workloads, &build_redis_workload(instance)?).await?;
        }
        if util::get_opt(&services, &redis_service_name(name))
            .await?
            .is_none()
        {
            util::create_opt(&services, &build_redis_service(instance)?).await?;
        }
    }

    if util::get_opt(&config_maps, &sentinel_config_name(name))
        .await?
        .is_none()
    {
        util::create_opt(&config_maps, &build_sentinel_config_map(instance, host)?).await?;
    }
    if util::get_opt(&workloads, &sentinel_workload_name(name))
        .await?
        .is_none()
    {
        util::create_opt(&workloads, &build_sentinel_workload(instance)?).await?;
    }
    if util::get_opt(&services, &sentinel_workload_name(name))
        .await?
        .is_none()
    {
        util::create_opt(&services, &build_sentinel_service(instance)?).await?;
    }
    Ok(())
}

/// Rewrite a config object in place. For the sentinel side this is how a
/// primary-address change propagates: the sentinel rereads its config and
/// the workload set is left untouched.
pub async fn update_config(
    client: Client,
    instance: &RedisSentinel,
    target: Target,
    host: &str,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let api: Api<ConfigMap> = Api::namespaced(client, instance_namespace(instance)?);
    let (cm_name, cm) = match target {
        Target::Sentinel => (
            sentinel_config_name(name),
            build_sentinel_config_map(instance, host)?,
        ),
        Target::Redis => (redis_config_name(name), build_redis_config_map(instance)?),
    };
    api.patch(
        &cm_name,
        &PatchParams::apply(util::MANAGER_NAME).force(),
        &Patch::Apply(&cm),
    )
    .await?;
    Ok(())
}

pub async fn rolling_update(
    client: Client,
    instance: &RedisSentinel,
    target: Target,
    mutation_count: usize,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    announce_updating(
        client.clone(),
        instance,
        format!("Rolling update of '{name}' {target} workload: {mutation_count} change(s)"),
    );
    let api: Api<StatefulSet> = Api::namespaced(client, instance_namespace(instance)?);
    let (sts_name, sts) = match target {
        Target::Sentinel => (sentinel_workload_name(name), build_sentinel_workload(instance)?),
        Target::Redis => (redis_workload_name(name), build_redis_workload(instance)?),
    };
    api.patch(
        &sts_name,
        &PatchParams::apply(util::MANAGER_NAME).force(),
        &Patch::Apply(&sts),
    )
    .await?;
    Ok(())
}

pub async fn expand_storage(
    client: Client,
    instance: &RedisSentinel,
    target: Target,
    new_size: &str,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    announce_updating(
        client.clone(),
        instance,
        format!("Expanding {target} storage of '{name}' to {new_size}"),
    );
    let sts_name = match target {
        Target::Sentinel => sentinel_workload_name(name),
        Target::Redis => redis_workload_name(name),
    };
    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let sts = workloads.get(&sts_name).await?;
    let patched = storage::expand_pvcs(client, namespace, &sts, new_size).await?;
    println!("📦 expanded {patched} {target} claim(s) of RedisSentinel '{name}' to {new_size}");
    Ok(())
}

pub async fn rebuild(
    client: Client,
    instance: &RedisSentinel,
    target: Target,
    host: &str,
    reason: &str,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    announce_updating(
        client.clone(),
        instance,
        format!("Rebuilding '{name}' {target} workload: {reason}"),
    );

    update_config(client.clone(), instance, target, host).await?;

    let sts_name = match target {
        Target::Sentinel => sentinel_workload_name(name),
        Target::Redis => redis_workload_name(name),
    };
    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    finalizer::clear_finalizers(&workloads, &sts_name).await?;
    util::delete_opt(&workloads, &sts_name).await?;
    tokio::time::sleep(util::REBUILD_GRACE).await;
    let fresh = match target {
        Target::Sentinel => build_sentinel_workload(instance)?,
        Target::Redis => build_redis_workload(instance)?,
    };
    util::create_opt(&workloads, &fresh).await?;
    Ok(())
}

pub async fn reject(client: Client, instance: &RedisSentinel, message: &str) -> Result<(), Error> {
    let generation = instance.metadata.generation;
    let message = message.to_string();
    patch_status_retrying(client, instance, move |status: &mut RedisSentinelStatus| {
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

#[derive(Debug, PartialEq)]
pub struct StatusReport {
    pub phase: RedisPhase,
    pub ready: ReadyState,
    pub message: String,
    pub sentinels_ready: i32,
    pub monitored: MonitoredMaster,
}

pub async fn report_status(
    client: Client,
    instance: &RedisSentinel,
    report: StatusReport,
) -> Result<(), Error> {
    let name = instance_name(instance)?.to_string();
    let generation = instance.metadata.generation;
    let total = instance.spec.replicas;
    patch_status_retrying(client, instance, move |status: &mut RedisSentinelStatus| {
        status.phase = report.phase;
        status.ready = report.ready;
        status.message = Some(report.message.clone());
        status.sentinels = SentinelCounts {
            ready: report.sentinels_ready,
            total,
        };
        status.pod_names = (0..total)
            .map(|i| format!("{}-{i}", sentinel_workload_name(&name)))
            .collect();
        status.service_name = Some(sentinel_workload_name(&name));
        status.monitored_master = Some(report.monitored.clone());
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

pub async fn finalize(client: Client, instance: &RedisSentinel) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;

    let message = format!(
        "RedisSentinel '{name}' is terminating; if deletion hangs, remove the \
         finalizer '{}' manually",
        finalizers::SENTINEL
    );
    let announce = patch_status(
        client.clone(),
        instance,
        move |status: &mut RedisSentinelStatus| {
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

    // Both modes are cleaned the same way; absent objects are no-ops.
    let cm_names = [sentinel_config_name(name), redis_config_name(name)];
    let sts_names = [sentinel_workload_name(name), redis_workload_name(name)];
    let svc_names = [sentinel_workload_name(name), redis_service_name(name)];

    let mut all_gone = true;
    for cm_name in &cm_names {
        finalizer::clear_finalizers(&config_maps, cm_name).await?;
        util::delete_opt(&config_maps, cm_name).await?;
        all_gone &= util::get_opt(&config_maps, cm_name)
            .await?
            .is_none_or(|o| o.metadata.deletion_timestamp.is_some());
    }
    for sts_name in &sts_names {
        finalizer::clear_finalizers(&workloads, sts_name).await?;
        util::delete_opt(&workloads, sts_name).await?;
        all_gone &= util::get_opt(&workloads, sts_name)
            .await?
            .is_none_or(|o| o.metadata.deletion_timestamp.is_some());
    }
    for svc_name in &svc_names {
        finalizer::clear_finalizers(&services, svc_name).await?;
        util::delete_opt(&services, svc_name).await?;
        all_gone &= util::get_opt(&services, svc_name)
            .await?
            .is_none_or(|o| o.metadata.deletion_timestamp.is_some());
    }
    if all_gone {
        finalizer::remove_finalizer(client, instance, finalizers::SENTINEL).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> RedisSentinel {
        let mut instance = RedisSentinel::new(name, Default::default());
        instance.metadata.namespace = Some("prod".to_string());
        instance.metadata.uid = Some("uid-1".to_string());
        instance
    }

    #[test]
    fn address_prefers_assigned_cluster_ip() {
        assert_eq!(
            service_address(Some("10.8.0.4"), "svc.ns.svc.cluster.local"),
            "10.8.0.4"
        );
        assert_eq!(
            service_address(Some("None"), "svc.ns.svc.cluster.local"),
            "svc.ns.svc.cluster.local"
        );
        assert_eq!(
            service_address(Some(""), "svc.ns.svc.cluster.local"),
            "svc.ns.svc.cluster.local"
        );
        assert_eq!(
            service_address(None, "svc.ns.svc.cluster.local"),
            "svc.ns.svc.cluster.local"
        );
    }

    #[test]
    fn primary_fqdn_targets_ordinal_zero() {
        assert_eq!(
            primary_fqdn("guard", "prod"),
            "guard-redis-0.guard-redis-headless.prod.svc.cluster.local"
        );
    }

    #[test]
    fn sentinel_config_monitors_the_resolved_address() {
        let instance = named("guard");
        let rendered = rendered_sentinel_config(&instance, "10.8.0.4");
        assert!(rendered.contains("sentinel monitor mymaster 10.8.0.4 6379 2\n"));
    }

    #[test]
    fn address_change_does_not_move_the_stamp() {
        let instance = named("guard");
        let before = sentinel_hash(&instance);
        // New address, same tuning.
        let _ = rendered_sentinel_config(&instance, "10.9.9.9");
        assert_eq!(before, sentinel_hash(&instance));
    }

    #[test]
    fn embedded_workload_counts_primary_and_replicas() {
        let instance = named("guard");
        let sts = build_redis_workload(&instance).unwrap();
        // Default replica block: two replicas plus the ordinal-0 primary.
        assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(3));
        let init = &sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
            .init_containers.as_ref().unwrap()[0];
        let script = init.command.as_ref().unwrap().join(" ");
        assert!(script.contains("replicaof guard-redis-0.guard-redis-headless.prod.svc.cluster.local 6379"));
    }

    #[test]
    fn sentinel_workload_copies_config_before_start() {
        let instance = named("guard");
        let sts = build_sentinel_workload(&instance).unwrap();
        let spec = sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let init = &spec.init_containers.as_ref().unwrap()[0];
        let script = init.command.as_ref().unwrap().join(" ");
        assert!(script.contains("cp /etc/sentinel-ro/sentinel.conf /data/sentinel.conf"));
        assert_eq!(
            spec.containers[0].command.as_ref().unwrap()[0],
            "redis-sentinel"
        );
    }
}
