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

use super::actions::{self, Role};
use crate::config;
use crate::drift::{self, ChangeDecision};
use crate::instance::reconcile::workload_phase;
use crate::storage;
use crate::util::{self, Error, finalizer, leader};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Entrypoint for the `RedisMasterReplica` controller.
pub async fn run(
    client: Client,
    namespace: String,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    println!("{}", "⚙️ starting RedisMasterReplica controller".green());
    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone()));

    leader::run_leader_elected(
        client,
        &namespace,
        "redis-operator-masterreplica-lock",
        shutdown,
        move |client, ns| {
            let context = context.clone();
            tokio::spawn(async move {
                let instances: Api<RedisMasterReplica> = Api::namespaced(client.clone(), &ns);
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
                metrics: ControllerMetrics::new("masterreplica"),
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
enum MasterReplicaAction {
    Create {
        partial: bool,
    },
    UpdateConfig {
        role: Role,
    },
    RollingUpdate {
        role: Role,
        mutation_count: usize,
    },
    ExpandStorage {
        role: Role,
        new_size: String,
    },
    Rebuild {
        role: Role,
        reason: String,
    },
    Reject {
        message: String,
    },
    ReportStatus {
        phase: RedisPhase,
        ready: ReadyState,
        message: String,
        master_ready: bool,
        replicas_ready: i32,
    },
    Finalize,
    NoOp,
}

impl MasterReplicaAction {
    fn to_str(&self) -> &str {
        match self {
            MasterReplicaAction::Create { .. } => "Create",
            MasterReplicaAction::UpdateConfig { .. } => "UpdateConfig",
            MasterReplicaAction::RollingUpdate { .. } => "RollingUpdate",
            MasterReplicaAction::ExpandStorage { .. } => "ExpandStorage",
            MasterReplicaAction::Rebuild { .. } => "Rebuild",
            MasterReplicaAction::Reject { .. } => "Reject",
            MasterReplicaAction::ReportStatus { .. } => "ReportStatus",
            MasterReplicaAction::Finalize => "Finalize",
            MasterReplicaAction::NoOp => "NoOp",
        }
    }
}

async fn reconcile(
    instance: Arc<RedisMasterReplica>,
    context: Arc<ContextData>,
) -> Result<Action, Error> {
    let client: Client = context.client.clone();

    let namespace: String = match instance.namespace() {
        None => {
            return Err(Error::UserInput(
                "Expected RedisMasterReplica to be namespaced".to_owned(),
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
        finalizer::ensure_finalizer(
            client.clone(),
            instance.as_ref(),
            finalizers::MASTER_REPLICA,
        )
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
        MasterReplicaAction::NoOp => None,
        _ => Some(
            context
                .metrics
                .write_histogram
                .with_label_values(&[&name, &namespace, action.to_str()])
                .start_timer(),
        ),
    };

    let result = match action {
        MasterReplicaAction::Finalize => {
            actions::finalize(client, &instance).await?;
            Action::requeue(Duration::from_secs(2))
        }
        MasterReplicaAction::Create { partial } => {
            actions::create(client, &instance, partial).await?;
            Action::requeue(Duration::from_secs(2))
        }
        MasterReplicaAction::UpdateConfig { role } => {
            actions::update_config(client, &instance, role).await?;
            Action::requeue(Duration::from_secs(2))
        }
        MasterReplicaAction::RollingUpdate {
            role,
            mutation_count,
        } => {
            actions::rolling_update(client, &instance, role, mutation_count).await?;
            Action::await_change()
        }
        MasterReplicaAction::ExpandStorage { role, new_size } => {
            actions::expand_storage(client, &instance, role, &new_size).await?;
            Action::requeue(util::probe_interval())
        }
        MasterReplicaAction::Rebuild { role, reason } => {
            actions::rebuild(client, &instance, role, &reason).await?;
            Action::requeue(Duration::from_secs(5))
        }
        MasterReplicaAction::Reject { message } => {
            actions::reject(client, &instance, &message).await?;
            return Err(Error::SpecViolation(message));
        }
        MasterReplicaAction::ReportStatus {
            phase,
            ready,
            message,
            master_ready,
            replicas_ready,
        } => {
            actions::report_status(
                client,
                &instance,
                phase,
                ready,
                message,
                master_ready,
                replicas_ready,
            )
            .await?;
            Action::requeue(util::probe_interval())
        }
        MasterReplicaAction::NoOp => Action::requeue(util::probe_interval()),
    };

    #[cfg(feature = "metrics")]
    if let Some(timer) = timer {
        timer.observe_duration();
    }

    Ok(result)
}

fn rank(decision: &ChangeDecision) -> u8 {
    match decision {
        ChangeDecision::Reject(_) => 4,
        ChangeDecision::Rebuild(_) => 3,
        ChangeDecision::ExpandStorage(_) => 2,
        ChangeDecision::RollingUpdate(_) => 1,
        ChangeDecision::NoChange => 0,
    }
}

async fn determine_action(
    client: Client,
    namespace: &str,
    instance: &RedisMasterReplica,
) -> Result<MasterReplicaAction, Error> {
    if instance.metadata.deletion_timestamp.is_some() {
        return Ok(MasterReplicaAction::Finalize);
    }
    if let Err(violation) = instance.spec.validate() {
        return Ok(MasterReplicaAction::Reject { message: violation });
    }

    let name = instance.name_any();
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);

    let mut observed: HashMap<Role, StatefulSet> = HashMap::new();
    let mut missing = 0usize;
    let mut present = 0usize;
    for role in [Role::Master, Role::Replica] {
        for exists in [
            util::get_opt(&config_maps, &actions::config_map_name(&name, role))
                .await?
                .is_some(),
            util::get_opt(&services, &actions::workload_name(&name, role))
                .await?
                .is_some(),
        ] {
            if exists {
                present += 1;
            } else {
                missing += 1;
            }
        }
        match util::get_opt(&workloads, &actions::workload_name(&name, role)).await? {
            Some(sts) => {
                present += 1;
                observed.insert(role, sts);
            }
            None => missing += 1,
        }
    }
    if missing > 0 {
        return Ok(MasterReplicaAction::Create {
            partial: present > 0,
        });
    }

    // Classify both sub-workloads; the highest-precedence category wins
    // the action taken this pass (master first on ties).
    let mut winner: Option<(Role, ChangeDecision)> = None;
    for role in [Role::Master, Role::Replica] {
        let sts = observed.get(&role).cloned().unwrap_or_default();
        let mut decision = drift::classify(&actions::desired(instance, role)?, &sts);
        // An expansion whose claims are already at size is settled; the
        // immutable claim template just remembers the original request.
        if let ChangeDecision::ExpandStorage(size) = &decision
            && !storage::needs_expansion(client.clone(), namespace, &sts, size).await?
        {
            decision = ChangeDecision::NoChange;
        }
        let better = winner
            .as_ref()
            .is_none_or(|(_, current)| rank(&decision) > rank(current));
        if better {
            winner = Some((role, decision));
        }
    }
    if let Some((role, decision)) = winner {
        match decision {
            ChangeDecision::Reject(message) => {
                return Ok(MasterReplicaAction::Reject { message });
            }
            ChangeDecision::Rebuild(reason) => {
                return Ok(MasterReplicaAction::Rebuild { role, reason });
            }
            ChangeDecision::ExpandStorage(new_size) => {
                return Ok(MasterReplicaAction::ExpandStorage { role, new_size });
            }
            ChangeDecision::RollingUpdate(mutations) => {
                return Ok(MasterReplicaAction::RollingUpdate {
                    role,
                    mutation_count: mutations.len(),
                });
            }
            ChangeDecision::NoChange => {}
        }
    }

    // Config payload drift with a matching stamp: restore the payload.
    for role in [Role::Master, Role::Replica] {
        let cm = util::get_opt(&config_maps, &actions::config_map_name(&name, role)).await?;
        let rendered = actions::rendered_config(instance, role)?;
        let payload = cm
            .as_ref()
            .and_then(|cm| cm.data.as_ref())
            .and_then(|d| d.get(config::REDIS_CONF))
            .map(String::as_str);
        if payload != Some(rendered.as_str()) {
            return Ok(MasterReplicaAction::UpdateConfig { role });
        }
    }

    let master_sts = observed.remove(&Role::Master).unwrap_or_default();
    let replica_sts = observed.remove(&Role::Replica).unwrap_or_default();
    let (phase, ready, message, master_ready, replicas_ready) =
        compound_phase(&name, instance.spec.replica.replicas, &master_sts, &replica_sts);

    let unchanged = instance.status.as_ref().is_some_and(|s| {
        s.phase == phase
            && s.ready == ready
            && s.message.as_deref() == Some(message.as_str())
            && s.master.ready == master_ready
            && s.replicas.ready == replicas_ready
    });
    if unchanged {
        return Ok(MasterReplicaAction::NoOp);
    }
    Ok(MasterReplicaAction::ReportStatus {
        phase,
        ready,
        message,
        master_ready,
        replicas_ready,
    })
}

/// Compound readiness requires both sub-workloads at full ready count.
fn compound_phase(
    name: &str,
    replica_total: i32,
    master_sts: &StatefulSet,
    replica_sts: &StatefulSet,
) -> (RedisPhase, ReadyState, String, bool, i32) {
    let (master_phase, master_ready_state, _) =
        workload_phase(&format!("{name}-master"), 1, master_sts);
    let (replica_phase, _, _) =
        workload_phase(&format!("{name}-replica"), replica_total, replica_sts);

    let master_ready = master_ready_state == ReadyState::True;
    let replicas_ready = replica_sts
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);

    let phases = [master_phase, replica_phase];
    let phase = if phases.contains(&RedisPhase::Updating) {
        RedisPhase::Updating
    } else if !master_ready && replicas_ready == 0 {
        RedisPhase::Pending
    } else {
        RedisPhase::Running
    };
    let ready = ReadyState::from(master_ready && replicas_ready == replica_total);
    let message = format!(
        "'{name}': master {}, {replicas_ready}/{replica_total} replicas ready",
        if master_ready { "ready" } else { "not ready" }
    );
    (phase, ready, message, master_ready, replicas_ready)
}

fn on_error(
    instance: Arc<RedisMasterReplica>,
    error: &Error,
    _context: Arc<ContextData>,
) -> Action {
    eprintln!(
        "{}",
        format!(
            "RedisMasterReplica reconciliation error: {:?} on {}/{}",
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
    fn fully_ready_pair_is_running_true() {
        let (phase, ready, _, master_ready, replicas_ready) =
            compound_phase("cache", 2, &sts(1, 1, 1), &sts(2, 2, 2));
        assert_eq!(phase, RedisPhase::Running);
        assert_eq!(ready, ReadyState::True);
        assert!(master_ready);
        assert_eq!(replicas_ready, 2);
    }

    #[test]
    fn partial_replicas_is_running_but_not_ready() {
        let (phase, ready, _, _, replicas_ready) =
            compound_phase("cache", 2, &sts(1, 1, 1), &sts(2, 2, 1));
        assert_eq!(phase, RedisPhase::Running);
        assert_eq!(ready, ReadyState::False);
        assert_eq!(replicas_ready, 1);
    }

    #[test]
    fn nothing_ready_is_pending() {
        let (phase, ready, _, _, _) = compound_phase("cache", 2, &sts(1, 0, 0), &sts(2, 0, 0));
        assert_eq!(phase, RedisPhase::Pending);
        assert_eq!(ready, ReadyState::False);
    }

    #[test]
    fn rollout_on_either_side_is_updating() {
        let (phase, _, _, _, _) = compound_phase("cache", 2, &sts(1, 1, 1), &sts(2, 1, 1));
        assert_eq!(phase, RedisPhase::Updating);
    }

    #[test]
    fn reject_outranks_rebuild() {
        assert!(rank(&ChangeDecision::Reject(String::new())) > rank(&ChangeDecision::Rebuild(String::new())));
        assert!(
            rank(&ChangeDecision::Rebuild(String::new()))
                > rank(&ChangeDecision::ExpandStorage(String::new()))
        );
        assert!(
            rank(&ChangeDecision::ExpandStorage(String::new()))
                > rank(&ChangeDecision::RollingUpdate(Vec::new()))
        );
        assert!(rank(&ChangeDecision::RollingUpdate(Vec::new())) > rank(&ChangeDecision::NoChange));
    }
}
