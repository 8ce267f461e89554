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

use super::actions;
use crate::config;
use crate::drift::{self, ChangeDecision, Mutation};
use crate::storage;
use crate::util::{self, Error, finalizer, leader};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Entrypoint for the `RedisInstance` controller.
pub async fn run(
    client: Client,
    namespace: String,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    println!("{}", "⚙️ starting RedisInstance controller".green());
    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone()));

    leader::run_leader_elected(
        client,
        &namespace,
        "redis-operator-instance-lock",
        shutdown,
        move |client, ns| {
            let context = context.clone();
            tokio::spawn(async move {
                let instances: Api<RedisInstance> = Api::namespaced(client.clone(), &ns);
                Controller::new(instances, Default::default())
                    .owns(
                        Api::<StatefulSet>::namespaced(client.clone(), &ns),
                        Default::default(),
                    )
                    .owns(
                        Api::<ConfigMap>::namespaced(client.clone(), &ns),
                        Default::default(),
                    )
                    .owns(
                        Api::<Service>::namespaced(client, &ns),
                        Default::default(),
                    )
                    .run(reconcile, on_error, context)
                    .for_each(|_res| async move {})
                    .await;
            })
        },
    )
    .await
}

/// Context injected with each `reconcile` and `on_error` invocation.
pub(crate) struct ContextData {
    client: Client,

    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,

    last_action: Mutex<HashMap<(String, String), (String, Instant)>>,
}

impl ContextData {
    pub fn new(client: Client) -> Self {
        #[cfg(feature = "metrics")]
        {
            ContextData {
                client,
                metrics: ControllerMetrics::new("instance"),
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

/// Action to be taken upon a `RedisInstance` during reconciliation.
#[derive(Debug, PartialEq)]
enum InstanceAction {
    /// Create whichever owned objects are missing; `partial` means some
    /// already existed and the rest are being recreated.
    Create { partial: bool },

    /// The config object's payload drifted from the rendered config while
    /// the workload stamp still matches; restore the payload only.
    UpdateConfig,

    RollingUpdate { mutations: Vec<Mutation> },

    ExpandStorage { new_size: String },

    Rebuild { reason: String },

    Reject { message: String },

    /// Refresh phase/readiness from the observed workload.
    ReportStatus {
        phase: RedisPhase,
        ready: ReadyState,
        message: String,
        replicas: i32,
        ready_replicas: i32,
    },

    /// Deletion timestamp is set: clean up and drop the finalizer.
    Finalize,

    /// In desired state; nothing to do.
    NoOp,
}

impl InstanceAction {
    fn to_str(&self) -> &str {
        match self {
            InstanceAction::Create { .. } => "Create",
            InstanceAction::UpdateConfig => "UpdateConfig",
            InstanceAction::RollingUpdate { .. } => "RollingUpdate",
            InstanceAction::ExpandStorage { .. } => "ExpandStorage",
            InstanceAction::Rebuild { .. } => "Rebuild",
            InstanceAction::Reject { .. } => "Reject",
            InstanceAction::ReportStatus { .. } => "ReportStatus",
            InstanceAction::Finalize => "Finalize",
            InstanceAction::NoOp => "NoOp",
        }
    }
}

async fn reconcile(instance: Arc<RedisInstance>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client: Client = context.client.clone();

    let namespace: String = match instance.namespace() {
        None => {
            return Err(Error::UserInput(
                "Expected RedisInstance to be namespaced".to_owned(),
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

    // The finalizer goes on before anything is created so a racing delete
    // can never strand owned objects.
    if instance.metadata.deletion_timestamp.is_none() {
        finalizer::ensure_finalizer(client.clone(), instance.as_ref(), finalizers::INSTANCE)
            .await?;
    }

    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    // Read phase: decide what this pass should do.
    let action = determine_action(client.clone(), &namespace, &instance).await?;

    log_action_transition(&context, &namespace, &name, &action).await;

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
        InstanceAction::NoOp => None,
        _ => Some(
            context
                .metrics
                .write_histogram
                .with_label_values(&[&name, &namespace, action.to_str()])
                .start_timer(),
        ),
    };

    // Write phase: perform the decided action.
    let result = match action {
        InstanceAction::Finalize => {
            actions::finalize(client, &instance).await?;
            Action::requeue(Duration::from_secs(2))
        }
        InstanceAction::Create { partial } => {
            actions::create(client, &instance, partial).await?;
            Action::requeue(Duration::from_secs(2))
        }
        InstanceAction::UpdateConfig => {
            actions::update_config(client, &instance).await?;
            Action::requeue(Duration::from_secs(2))
        }
        InstanceAction::RollingUpdate { mutations } => {
            actions::rolling_update(client, &instance, &mutations).await?;
            Action::await_change()
        }
        InstanceAction::ExpandStorage { new_size } => {
            let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
            let sts = workloads.get(&name).await?;
            actions::expand_storage(client, &instance, &sts, &new_size).await?;
            Action::requeue(util::probe_interval())
        }
        InstanceAction::Rebuild { reason } => {
            actions::rebuild(client, &instance, &reason).await?;
            Action::requeue(Duration::from_secs(5))
        }
        InstanceAction::Reject { message } => {
            actions::reject(client, &instance, &message).await?;
            return Err(Error::SpecViolation(message));
        }
        InstanceAction::ReportStatus {
            phase,
            ready,
            message,
            replicas,
            ready_replicas,
        } => {
            actions::report_status(
                client, &instance, phase, ready, message, replicas, ready_replicas,
            )
            .await?;
            Action::requeue(util::probe_interval())
        }
        InstanceAction::NoOp => Action::requeue(util::probe_interval()),
    };

    #[cfg(feature = "metrics")]
    if let Some(timer) = timer {
        timer.observe_duration();
    }

    Ok(result)
}

async fn log_action_transition(
    context: &ContextData,
    namespace: &str,
    name: &str,
    action: &InstanceAction,
) {
    if *action == InstanceAction::NoOp {
        return;
    }
    util::log_transition(&context.last_action, namespace, name, action.to_str()).await;
}

/// Looks at the declared spec and the observed substrate and decides the
/// single action for this pass.
async fn determine_action(
    client: Client,
    namespace: &str,
    instance: &RedisInstance,
) -> Result<InstanceAction, Error> {
    if instance.metadata.deletion_timestamp.is_some() {
        return Ok(InstanceAction::Finalize);
    }

    let name = instance.name_any();
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);

    let cm = util::get_opt(&config_maps, &actions::config_map_name(&name)).await?;
    let sts = util::get_opt(&workloads, &name).await?;
    let svc = util::get_opt(&services, &name).await?;

    let present = [cm.is_some(), sts.is_some(), svc.is_some()];
    let missing = present.iter().filter(|p| !**p).count();
    if missing > 0 {
        return Ok(InstanceAction::Create {
            partial: missing < present.len(),
        });
    }
    let (cm, sts) = (cm.unwrap_or_default(), sts.unwrap_or_default());

    // Comparison base for configuration is the hash stamped on the running
    // workload; the config object's payload never participates.
    match drift::classify(&actions::desired(instance), &sts) {
        ChangeDecision::Reject(message) => return Ok(InstanceAction::Reject { message }),
        ChangeDecision::Rebuild(reason) => return Ok(InstanceAction::Rebuild { reason }),
        ChangeDecision::ExpandStorage(new_size) => {
            // The claim template keeps its original size, so only claims
            // still below the target mean there is work left to do.
            if storage::needs_expansion(client.clone(), namespace, &sts, &new_size).await? {
                return Ok(InstanceAction::ExpandStorage { new_size });
            }
        }
        ChangeDecision::RollingUpdate(mutations) => {
            return Ok(InstanceAction::RollingUpdate { mutations });
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
        return Ok(InstanceAction::UpdateConfig);
    }

    let (phase, ready, message) = workload_phase(&name, instance.spec.replicas, &sts);
    let ready_replicas = sts
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    let current = instance.status.as_ref();
    let unchanged = current.is_some_and(|s| {
        s.phase == phase
            && s.ready == ready
            && s.message.as_deref() == Some(message.as_str())
            && s.ready_replicas == ready_replicas
    });
    if unchanged {
        return Ok(InstanceAction::NoOp);
    }
    Ok(InstanceAction::ReportStatus {
        phase,
        ready,
        message,
        replicas: instance.spec.replicas,
        ready_replicas,
    })
}

/// Observed → reported phase mapping for a single workload set.
pub(crate) fn workload_phase(
    name: &str,
    desired_replicas: i32,
    sts: &StatefulSet,
) -> (RedisPhase, ReadyState, String) {
    let status = sts.status.clone().unwrap_or_default();
    let replicas = desired_replicas;
    let updated = status.updated_replicas.unwrap_or(0);
    let ready = status.ready_replicas.unwrap_or(0);

    // Nothing ready covers both initial bring-up and a total outage.
    if ready == 0 && replicas > 0 {
        return (
            RedisPhase::Pending,
            ReadyState::False,
            format!("'{name}' has no ready replicas yet"),
        );
    }
    if updated < replicas || ready < updated {
        return (
            RedisPhase::Updating,
            ReadyState::False,
            format!("'{name}' is rolling out: {updated}/{replicas} updated, {ready} ready"),
        );
    }
    if ready == replicas {
        return (
            RedisPhase::Running,
            ReadyState::True,
            format!("'{name}' is running with {ready}/{replicas} ready replicas"),
        );
    }
    (
        RedisPhase::Running,
        ReadyState::False,
        format!("'{name}' is running with {ready}/{replicas} ready replicas"),
    )
}

fn on_error(instance: Arc<RedisInstance>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!(
            "RedisInstance reconciliation error: {:?} on {}/{}",
            error,
            instance.namespace().unwrap_or_default(),
            instance.name_any()
        )
        .red()
    );
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSetStatus;

    fn sts(replicas: i32, updated: i32, ready: i32) -> StatefulSet {
        StatefulSet {
            status: Some(StatefulSetStatus {
                replicas,
                updated_replicas: Some(updated),
                ready_replicas: Some(ready),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn rollout_in_progress_reports_updating() {
        let (phase, ready, _) = workload_phase("cache", 3, &sts(3, 1, 1));
        assert_eq!(phase, RedisPhase::Updating);
        assert_eq!(ready, ReadyState::False);
    }

    #[test]
    fn lagging_readiness_reports_updating() {
        let (phase, ready, _) = workload_phase("cache", 3, &sts(3, 3, 2));
        assert_eq!(phase, RedisPhase::Updating);
        assert_eq!(ready, ReadyState::False);
    }

    #[test]
    fn nothing_ready_reports_pending() {
        // All pods updated but none have passed readiness yet.
        let (phase, ready, _) = workload_phase("cache", 3, &sts(3, 3, 0));
        assert_eq!(phase, RedisPhase::Pending);
        assert_eq!(ready, ReadyState::False);
    }

    #[test]
    fn full_readiness_reports_running_true() {
        let (phase, ready, _) = workload_phase("cache", 3, &sts(3, 3, 3));
        assert_eq!(phase, RedisPhase::Running);
        assert_eq!(ready, ReadyState::True);
    }
}
