use futures::stream::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{
    Api, ResourceExt,
    client::Client,
    runtime::{Controller, controller::Action},
};
use owo_colors::OwoColorize;
use redis_operator_types::*;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::{sync::Mutex, time::Duration};
use tokio_util::sync::CancellationToken;

use super::actions::{self, ClusterReport};
use crate::config;
use crate::drift::{self, ChangeDecision, Mutation};
use crate::instance::reconcile::workload_phase;
use crate::storage;
use crate::util::{self, Error, finalizer, leader};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Entrypoint for the `RedisCluster` controller.
pub async fn run(
    client: Client,
    namespace: String,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    println!("{}", "⚙️ starting RedisCluster controller".green());
    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone()));

    leader::run_leader_elected(
        client,
        &namespace,
        "redis-operator-cluster-lock",
        shutdown,
        move |client, ns| {
            let context = context.clone();
            tokio::spawn(async move {
                let instances: Api<RedisCluster> = Api::namespaced(client.clone(), &ns);
                Controller::new(instances, Default::default())
                    .owns(
                        Api::<StatefulSet>::namespaced(client.clone(), &ns),
                        Default::default(),
                    )
                    .owns(
                        Api::<ConfigMap>::namespaced(client.clone(), &ns),
                        Default::default(),
                    )
                    .owns(Api::<Service>::namespaced(client, &ns), Default::default())
                    .run(reconcile, on_error, context)
                    .for_each(|_res| async move {})
                    .await;
            })
        },
    )
    .await
}

struct ContextData {
    client: Client,

    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,

    last_action: Mutex<HashMap<(String, String), (String, Instant)>>,
}

impl ContextData {
    fn new(client: Client) -> Self {
        #[cfg(feature = "metrics")]
        {
            ContextData {
                client,
                metrics: ControllerMetrics::new("cluster"),
                last_action: Mutex::new(HashMap::new()),
            }
        }
        #[cfg(not(feature = "metrics"))]
        {
            ContextData {
                client,
                last_action: Mutex::new(HashMap::new()),
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum ClusterAction {
    Create { partial: bool },
    UpdateConfig,
    /// `scaling` marks a node-count change, reported as the `Scaling`
    /// phase instead of `Updating`.
    RollingUpdate { scaling: bool, mutation_count: usize },
    ExpandStorage { new_size: String },
    Rebuild { reason: String },
    Reject { message: String },
    ReportStatus(Box<ClusterReport>),
    Finalize,
    NoOp,
}

impl ClusterAction {
    fn to_str(&self) -> &str {
        match self {
            ClusterAction::Create { .. } => "Create",
            ClusterAction::UpdateConfig => "UpdateConfig",
            ClusterAction::RollingUpdate { .. } => "RollingUpdate",
            ClusterAction::ExpandStorage { .. } => "ExpandStorage",
            ClusterAction::Rebuild { .. } => "Rebuild",
            ClusterAction::Reject { .. } => "Reject",
            ClusterAction::ReportStatus(_) => "ReportStatus",
            ClusterAction::Finalize => "Finalize",
            ClusterAction::NoOp => "NoOp",
        }
    }
}

async fn reconcile(instance: Arc<RedisCluster>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client: Client = context.client.clone();

    let namespace: String = match instance.namespace() {
        None => {
            return Err(Error::UserInput(
                "Expected RedisCluster to be namespaced".to_owned(),
            ));
        }
        Some(namespace) => namespace,
    };
    let name = instance.name_any();

    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();

    if instance.metadata.deletion_timestamp.is_none() {
        finalizer::ensure_finalizer(client.clone(), instance.as_ref(), finalizers::CLUSTER)
            .await?;
    }

    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    let action = determine_action(client.clone(), &namespace, &instance).await?;

    if action.to_str() != "NoOp" {
        util::log_transition(&context.last_action, &namespace, &name, action.to_str()).await;
    }

    #[cfg(feature = "metrics")]
    context
        .metrics
        .read_histogram
        .with_label_values(&[&name, &namespace, action.to_str()])
        .observe(start.elapsed().as_secs_f64());

    #[cfg(feature = "metrics")]
    context
        .metrics
        .action_counter
        .with_label_values(&[&name, &namespace, action.to_str()])
        .inc();

    #[cfg(feature = "metrics")]
    let timer = match action {
        ClusterAction::NoOp => None,
        _ => Some(
            context
                .metrics
                .write_histogram
                .with_label_values(&[&name, &namespace, action.to_str()])
                .start_timer(),
        ),
    };

    let result = match action {
        ClusterAction::Finalize => {
            actions::finalize(client, &instance).await?;
            Action::requeue(Duration::from_secs(2))
        }
        ClusterAction::Create { partial } => {
            actions::create(client, &instance, partial).await?;
            Action::requeue(Duration::from_secs(2))
        }
        ClusterAction::UpdateConfig => {
            actions::update_config(client, &instance).await?;
            Action::requeue(Duration::from_secs(2))
        }
        ClusterAction::RollingUpdate {
            scaling,
            mutation_count,
        } => {
            actions::rolling_update(client, &instance, scaling, mutation_count).await?;
            Action::await_change()
        }
        ClusterAction::ExpandStorage { new_size } => {
            let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
            let sts = workloads.get(&name).await?;
            actions::expand_storage(client, &instance, &sts, &new_size).await?;
            Action::requeue(util::probe_interval())
        }
        ClusterAction::Rebuild { reason } => {
            actions::rebuild(client, &instance, &reason).await?;
            Action::requeue(Duration::from_secs(5))
        }
        ClusterAction::Reject { message } => {
            actions::reject(client, &instance, &message).await?;
            return Err(Error::SpecViolation(message));
        }
        ClusterAction::ReportStatus(report) => {
            actions::report_status(client, &instance, *report).await?;
            Action::requeue(util::probe_interval())
        }
        ClusterAction::NoOp => Action::requeue(util::probe_interval()),
    };

    #[cfg(feature = "metrics")]
    if let Some(timer) = timer {
        timer.observe_duration();
    }

    Ok(result)
}

async fn determine_action(
    client: Client,
    namespace: &str,
    instance: &RedisCluster,
) -> Result<ClusterAction, Error> {
    if instance.metadata.deletion_timestamp.is_some() {
        return Ok(ClusterAction::Finalize);
    }
    if let Err(violation) = instance.spec.validate() {
        return Ok(ClusterAction::Reject { message: violation });
    }

    let name = instance.name_any();
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);

    let cm = util::get_opt(&config_maps, &actions::config_map_name(&name)).await?;
    let sts = util::get_opt(&workloads, &name).await?;
    let svc = util::get_opt(&services, &actions::service_name(&name)).await?;

    let present = [cm.is_some(), sts.is_some(), svc.is_some()];
    let missing = present.iter().filter(|p| !**p).count();
    if missing > 0 {
        return Ok(ClusterAction::Create {
            partial: missing < present.len(),
        });
    }
    let (cm, sts) = (cm.unwrap_or_default(), sts.unwrap_or_default());

    match drift::classify(&actions::desired(instance), &sts) {
        ChangeDecision::Reject(message) => return Ok(ClusterAction::Reject { message }),
        ChangeDecision::Rebuild(reason) => return Ok(ClusterAction::Rebuild { reason }),
        ChangeDecision::ExpandStorage(new_size) => {
            // The claim template keeps its original size, so only claims
            // still below the target mean there is work left to do.
            if storage::needs_expansion(client.clone(), namespace, &sts, &new_size).await? {
                return Ok(ClusterAction::ExpandStorage { new_size });
            }
        }
        ChangeDecision::RollingUpdate(mutations) => {
            let scaling = mutations
                .iter()
                .any(|m| matches!(m, Mutation::Replicas(_)));
            return Ok(ClusterAction::RollingUpdate {
                scaling,
                mutation_count: mutations.len(),
            });
        }
        ChangeDecision::NoChange => {}
    }

    let rendered = actions::rendered_config(instance);
    let payload = cm
        .data
        .as_ref()
        .and_then(|d| d.get(config::REDIS_CONF))
        .map(String::as_str);
    if payload != Some(rendered.as_str()) {
        return Ok(ClusterAction::UpdateConfig);
    }

    let report = cluster_report(client, instance, &name, &sts).await?;
    let unchanged = instance.status.as_ref().is_some_and(|s| {
        s.phase == report.phase
            && s.ready == report.ready
            && s.message.as_deref() == Some(report.message.as_str())
            && s.cluster == report.info
            && s.nodes == report.nodes
    });
    if unchanged {
        return Ok(ClusterAction::NoOp);
    }
    Ok(ClusterAction::ReportStatus(Box::new(report)))
}

async fn cluster_report(
    client: Client,
    instance: &RedisCluster,
    name: &str,
    sts: &StatefulSet,
) -> Result<ClusterReport, Error> {
    let total = instance.spec.total_nodes();
    let (phase, ready, message) = workload_phase(name, total, sts);
    // A rollout that changes the node count is a scale, not an update.
    let observed_count = sts.status.as_ref().map(|s| s.replicas).unwrap_or(0);
    let phase = if phase == RedisPhase::Updating && observed_count != total {
        RedisPhase::Scaling
    } else {
        phase
    };
    let nodes = actions::observed_nodes(client, instance).await?;
    let ready_nodes = nodes.iter().filter(|n| n.link_state == "connected").count() as i32;

    let info = ClusterInfo {
        // Substrate view only; slot-level state comes from the cluster
        // bus once `cluster create` has been run against the pods.
        state: if ready == ReadyState::True { "ok" } else { "unknown" }.to_string(),
        slots_assigned: 0,
        slots_ok: 0,
        slots_pfail: 0,
        slots_fail: 0,
        known_nodes: nodes.len() as i32,
        size: instance.spec.shards,
        current_epoch: 0,
    };
    Ok(ClusterReport {
        phase,
        ready,
        message: format!("{message} ({ready_nodes}/{total} nodes connected)"),
        info,
        nodes,
    })
}

fn on_error(instance: Arc<RedisCluster>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!(
            "RedisCluster reconciliation error: {:?} on {}/{}",
            error,
            instance.namespace().unwrap_or_default(),
            instance.name_any()
        )
        .red()
    );
    Action::requeue(Duration::from_secs(5))
}
