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

use super::actions::{self, StatusReport, Target};
use crate::config;
use crate::drift::{self, ChangeDecision};
use crate::instance::reconcile::workload_phase;
use crate::storage;
use crate::util::{self, Error, finalizer, leader};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Entrypoint for the `RedisSentinel` controller.
pub async fn run(
    client: Client,
    namespace: String,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    println!("{}", "⚙️ starting RedisSentinel controller".green());
    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone()));

    leader::run_leader_elected(
        client,
        &namespace,
        "redis-operator-sentinel-lock",
        shutdown,
        move |client, ns| {
            let context = context.clone();
            tokio::spawn(async move {
                let instances: Api<RedisSentinel> = Api::namespaced(client.clone(), &ns);
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
                metrics: ControllerMetrics::new("sentinel"),
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
enum SentinelAction {
    Create {
        partial: bool,
        host: String,
    },
    /// Rewrite a config object; for the sentinel config this is also how
    /// a changed primary address propagates, without touching the
    /// workload set.
    UpdateConfig {
        target: Target,
        host: String,
    },
    RollingUpdate {
        target: Target,
        mutation_count: usize,
    },
    ExpandStorage {
        target: Target,
        new_size: String,
    },
    Rebuild {
        target: Target,
        reason: String,
        host: String,
    },
    Reject {
        message: String,
    },
    ReportStatus(Box<StatusReport>),
    Finalize,
    NoOp,
}

impl SentinelAction {
    fn to_str(&self) -> &str {
        match self {
            SentinelAction::Create { .. } => "Create",
            SentinelAction::UpdateConfig { .. } => "UpdateConfig",
            SentinelAction::RollingUpdate { .. } => "RollingUpdate",
            SentinelAction::ExpandStorage { .. } => "ExpandStorage",
            SentinelAction::Rebuild { .. } => "Rebuild",
            SentinelAction::Reject { .. } => "Reject",
            SentinelAction::ReportStatus(_) => "ReportStatus",
            SentinelAction::Finalize => "Finalize",
            SentinelAction::NoOp => "NoOp",
        }
    }
}

async fn reconcile(instance: Arc<RedisSentinel>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client: Client = context.client.clone();

    let namespace: String = match instance.namespace() {
        None => {
            return Err(Error::UserInput(
                "Expected RedisSentinel to be namespaced".to_owned(),
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
        finalizer::ensure_finalizer(client.clone(), instance.as_ref(), finalizers::SENTINEL)
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
        SentinelAction::NoOp => None,
        _ => Some(
            context
                .metrics
                .write_histogram
                .with_label_values(&[&name, &namespace, action.to_str()])
                .start_timer(),
        ),
    };

    let result = match action {
        SentinelAction::Finalize => {
            actions::finalize(client, &instance).await?;
            Action::requeue(Duration::from_secs(2))
        }
        SentinelAction::Create { partial, host } => {
            actions::create(client, &instance, &host, partial).await?;
            Action::requeue(Duration::from_secs(2))
        }
        SentinelAction::UpdateConfig { target, host } => {
            actions::update_config(client, &instance, target, &host).await?;
            Action::requeue(Duration::from_secs(2))
        }
        SentinelAction::RollingUpdate {
            target,
            mutation_count,
        } => {
            actions::rolling_update(client, &instance, target, mutation_count).await?;
            Action::await_change()
        }
        SentinelAction::ExpandStorage { target, new_size } => {
            actions::expand_storage(client, &instance, target, &new_size).await?;
            Action::requeue(util::probe_interval())
        }
        SentinelAction::Rebuild {
            target,
            reason,
            host,
        } => {
            actions::rebuild(client, &instance, target, &host, &reason).await?;
            Action::requeue(Duration::from_secs(5))
        }
        SentinelAction::Reject { message } => {
            actions::reject(client, &instance, &message).await?;
            return Err(Error::SpecViolation(message));
        }
        SentinelAction::ReportStatus(report) => {
            actions::report_status(client, &instance, *report).await?;
            Action::requeue(util::probe_interval())
        }
        SentinelAction::NoOp => Action::requeue(util::probe_interval()),
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
    instance: &RedisSentinel,
) -> Result<SentinelAction, Error> {
    if instance.metadata.deletion_timestamp.is_some() {
        return Ok(SentinelAction::Finalize);
    }
    if let Err(violation) = instance.spec.validate() {
        return Ok(SentinelAction::Reject { message: violation });
    }

    let name = instance.name_any();
    let embedded = !instance.spec.is_referenced();
    let host = actions::resolve_primary_address(client.clone(), instance).await?;

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let workloads: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);

    let sentinel_cm = util::get_opt(&config_maps, &actions::sentinel_config_name(&name)).await?;
    let sentinel_sts = util::get_opt(&workloads, &actions::sentinel_workload_name(&name)).await?;
    let sentinel_svc = util::get_opt(&services, &actions::sentinel_workload_name(&name)).await?;

    let mut presence = vec![
        sentinel_cm.is_some(),
        sentinel_sts.is_some(),
        sentinel_svc.is_some(),
    ];
    let mut redis_cm = None;
    let mut redis_sts = None;
    if embedded {
        redis_cm = util::get_opt(&config_maps, &actions::redis_config_name(&name)).await?;
        redis_sts = util::get_opt(&workloads, &actions::redis_workload_name(&name)).await?;
        let redis_svc = util::get_opt(&services, &actions::redis_service_name(&name)).await?;
        presence.extend([redis_cm.is_some(), redis_sts.is_some(), redis_svc.is_some()]);
    }
    let missing = presence.iter().filter(|p| !**p).count();
    if missing > 0 {
        return Ok(SentinelAction::Create {
            partial: missing < presence.len(),
            host,
        });
    }

    let sentinel_sts = sentinel_sts.unwrap_or_default();
    let mut targets = vec![(Target::Sentinel, sentinel_sts.clone())];
    if embedded {
        targets.push((Target::Redis, redis_sts.clone().unwrap_or_default()));
    }
    let mut winner: Option<(Target, ChangeDecision)> = None;
    for (target, sts) in &targets {
        let mut decision = drift::classify(&actions::desired(instance, *target), sts);
        // An expansion whose claims are already at size is settled; the
        // immutable claim template just remembers the original request.
        if let ChangeDecision::ExpandStorage(size) = &decision
            && !storage::needs_expansion(client.clone(), namespace, sts, size).await?
        {
            decision = ChangeDecision::NoChange;
        }
        let better = winner
            .as_ref()
            .is_none_or(|(_, current)| rank(&decision) > rank(current));
        if better {
            winner = Some((*target, decision));
        }
    }
    if let Some((target, decision)) = winner {
        match decision {
            ChangeDecision::Reject(message) => return Ok(SentinelAction::Reject { message }),
            ChangeDecision::Rebuild(reason) => {
                return Ok(SentinelAction::Rebuild {
                    target,
                    reason,
                    host,
                });
            }
            ChangeDecision::ExpandStorage(new_size) => {
                return Ok(SentinelAction::ExpandStorage { target, new_size });
            }
            ChangeDecision::RollingUpdate(mutations) => {
                return Ok(SentinelAction::RollingUpdate {
                    target,
                    mutation_count: mutations.len(),
                });
            }
            ChangeDecision::NoChange => {}
        }
    }

    // Config payload drift. For the sentinel config this includes a
    // changed primary address; the workload stamp is tuning-only, so the
    // rewrite never cascades into a rebuild.
    let sentinel_payload = sentinel_cm
        .as_ref()
        .and_then(|cm| cm.data.as_ref())
        .and_then(|d| d.get(config::SENTINEL_CONF))
        .map(String::as_str);
    let rendered_sentinel = actions::rendered_sentinel_config(instance, &host);
    if sentinel_payload != Some(rendered_sentinel.as_str()) {
        return Ok(SentinelAction::UpdateConfig {
            target: Target::Sentinel,
            host,
        });
    }
    if embedded {
        let redis_payload = redis_cm
            .as_ref()
            .and_then(|cm| cm.data.as_ref())
            .and_then(|d| d.get(config::REDIS_CONF))
            .map(String::as_str);
        let rendered_redis = actions::rendered_redis_config(instance);
        if redis_payload != Some(rendered_redis.as_str()) {
            return Ok(SentinelAction::UpdateConfig {
                target: Target::Redis,
                host,
            });
        }
    }

    let report = status_report(
        client,
        instance,
        &name,
        &host,
        &sentinel_sts,
        redis_sts.as_ref(),
    )
    .await?;
    let unchanged = instance.status.as_ref().is_some_and(|s| {
        s.phase == report.phase
            && s.ready == report.ready
            && s.message.as_deref() == Some(report.message.as_str())
            && s.sentinels.ready == report.sentinels_ready
            && s.monitored_master.as_ref() == Some(&report.monitored)
    });
    if unchanged {
        return Ok(SentinelAction::NoOp);
    }
    Ok(SentinelAction::ReportStatus(Box::new(report)))
}

async fn status_report(
    client: Client,
    instance: &RedisSentinel,
    name: &str,
    host: &str,
    sentinel_sts: &StatefulSet,
    redis_sts: Option<&StatefulSet>,
) -> Result<StatusReport, Error> {
    let total = instance.spec.replicas;
    let sentinels_ready = sentinel_sts
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    let (sentinel_phase, _, _) = workload_phase(
        &actions::sentinel_workload_name(name),
        total,
        sentinel_sts,
    );

    let (known_replicas, primary_ready, redis_phase) = match redis_sts {
        Some(sts) => {
            let expected = instance.spec.embedded_redis_replicas();
            let ready = sts.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
            let (phase, _, _) =
                workload_phase(&actions::redis_workload_name(name), expected, sts);
            (expected - 1, ready == expected, Some(phase))
        }
        None => {
            // Referenced mode: read the monitored set's own status.
            let external = instance.spec.external_master.as_ref();
            let ref_name = external.map(|e| e.name.as_str()).unwrap_or_default();
            let ref_namespace = external
                .and_then(|e| e.namespace.as_deref())
                .or(instance.metadata.namespace.as_deref())
                .unwrap_or_default();
            let api: Api<RedisMasterReplica> = Api::namespaced(client, ref_namespace);
            match util::get_opt(&api, ref_name).await?.and_then(|m| m.status) {
                Some(status) => (
                    status.replicas.total,
                    status.ready == ReadyState::True,
                    None,
                ),
                None => (0, false, None),
            }
        }
    };

    let sentinels_full = sentinels_ready == total;
    let ready = ReadyState::from(sentinels_full && primary_ready);
    let phases = [Some(sentinel_phase), redis_phase];
    let phase = if phases.iter().flatten().any(|p| *p == RedisPhase::Updating) {
        RedisPhase::Updating
    } else if sentinels_ready == 0 {
        RedisPhase::Pending
    } else {
        RedisPhase::Running
    };
    let message = format!(
        "'{name}': {sentinels_ready}/{total} sentinels ready, monitoring '{}' at {host}",
        instance.spec.master_name()
    );
    Ok(StatusReport {
        phase,
        ready,
        message,
        sentinels_ready,
        monitored: MonitoredMaster {
            name: instance.spec.master_name().to_string(),
            ip: Some(host.to_string()),
            port: ports::REDIS,
            known_replicas,
            known_sentinels: total,
            status: if primary_ready { "ok" } else { "unknown" }.to_string(),
        },
    })
}

fn on_error(instance: Arc<RedisSentinel>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!(
            "RedisSentinel reconciliation error: {:?} on {}/{}",
            error,
            instance.namespace().unwrap_or_default(),
            instance.name_any()
        )
        .red()
    );
    Action::requeue(Duration::from_secs(5))
}
