use futures::stream::StreamExt;
use kube::{
    Api, ResourceExt,
    client::Client,
    runtime::{
        Controller,
        controller::Action,
        reflector::ObjectRef,
        watcher::{self, Event},
    },
};
use owo_colors::OwoColorize;
use redis_operator_types::*;
use serde::de::DeserializeOwned;
use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Instant};
use tokio::{sync::Mutex, time::Duration};
use tokio_util::sync::CancellationToken;

use super::actions;
use crate::util::{self, Error, leader};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Entrypoint for the `Redis` aggregate-view controller. Besides the
/// controller itself, the leader runs one watcher per managed kind that
/// materializes `<name>-view` objects on first observation.
pub async fn run(
    client: Client,
    namespace: String,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    println!("{}", "⚙️ starting Redis view controller".green());
    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone()));

    leader::run_leader_elected(
        client,
        &namespace,
        "redis-operator-view-lock",
        shutdown,
        move |client, ns| {
            let context = context.clone();
            tokio::spawn(async move {
                tokio::join!(
                    controller(client.clone(), ns.clone(), context),
                    materializer::<RedisInstance>(client.clone(), ns.clone(), RedisKindRef::Instance),
                    materializer::<RedisMasterReplica>(
                        client.clone(),
                        ns.clone(),
                        RedisKindRef::MasterReplica
                    ),
                    materializer::<RedisSentinel>(client.clone(), ns.clone(), RedisKindRef::Sentinel),
                    materializer::<RedisCluster>(client, ns, RedisKindRef::Cluster),
                );
            })
        },
    )
    .await
}

async fn controller(client: Client, ns: String, context: Arc<ContextData>) {
    let views: Api<Redis> = Api::namespaced(client.clone(), &ns);
    // Changes to any managed kind fan in to its conventional view name;
    // hand-authored views with other names converge on their periodic
    // requeue.
    let map_to_view = |name: String, ns: String| {
        Some(ObjectRef::<Redis>::new(&view_name(&name)).within(&ns))
    };
    Controller::new(views, Default::default())
        .watches(
            Api::<RedisInstance>::namespaced(client.clone(), &ns),
            Default::default(),
            move |obj| map_to_view(obj.name_any(), obj.namespace()?),
        )
        .watches(
            Api::<RedisMasterReplica>::namespaced(client.clone(), &ns),
            Default::default(),
            move |obj| map_to_view(obj.name_any(), obj.namespace()?),
        )
        .watches(
            Api::<RedisSentinel>::namespaced(client.clone(), &ns),
            Default::default(),
            move |obj| map_to_view(obj.name_any(), obj.namespace()?),
        )
        .watches(
            Api::<RedisCluster>::namespaced(client.clone(), &ns),
            Default::default(),
            move |obj| map_to_view(obj.name_any(), obj.namespace()?),
        )
        .run(reconcile, on_error, context)
        .for_each(|_res| async move {})
        .await;
}

/// Watch one managed kind and ensure every observed object has its view.
async fn materializer<K>(client: Client, ns: String, kind: RedisKindRef)
where
    K: kube::Resource<DynamicType = (), Scope = kube::core::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + 'static,
{
    let api: Api<K> = Api::namespaced(client.clone(), &ns);
    let mut stream = std::pin::pin!(kube::runtime::watcher(api, watcher::Config::default()));
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Apply(obj)) | Ok(Event::InitApply(obj)) => {
                let name = obj.name_any();
                if let Err(e) = actions::ensure_view(client.clone(), &ns, kind, &name).await {
                    eprintln!(
                        "{}",
                        format!("failed to materialize view for {kind} '{name}': {e}").red()
                    );
                }
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}", format!("{kind} view watch error: {e}").red());
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
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
                metrics: ControllerMetrics::new("view"),
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
enum ViewAction {
    /// Mirror the referenced object's status into the view.
    UpdateView(Box<RedisStatus>),
    NoOp,
}

impl ViewAction {
    fn to_str(&self) -> &str {
        match self {
            ViewAction::UpdateView(_) => "UpdateView",
            ViewAction::NoOp => "NoOp",
        }
    }
}

async fn reconcile(view: Arc<Redis>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client: Client = context.client.clone();

    let namespace: String = match view.namespace() {
        None => {
            return Err(Error::UserInput(
                "Expected Redis view to be namespaced".to_owned(),
            ));
        }
        Some(namespace) => namespace,
    };
    let name = view.name_any();

    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();

    // Views own nothing, so deletion needs no cleanup.
    if view.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let action = determine_action(client.clone(), &namespace, &view).await?;
    if action != ViewAction::NoOp {
        util::log_transition(&context.last_action, &namespace, &name, action.to_str()).await;
    }

    #[cfg(feature = "metrics")]
    context
        .metrics
        .action_counter
        .with_label_values(&[&name, &namespace, action.to_str()])
        .inc();

    match action {
        ViewAction::UpdateView(projected) => {
            actions::update_view(client, &view, *projected).await?;
        }
        ViewAction::NoOp => {}
    }
    Ok(Action::requeue(util::probe_interval()))
}

async fn determine_action(
    client: Client,
    namespace: &str,
    view: &Redis,
) -> Result<ViewAction, Error> {
    let projected = actions::project(client, namespace, &view.spec).await?;
    let unchanged = view.status.as_ref().is_some_and(|current| {
        let mut comparable = current.clone();
        comparable.last_updated = None;
        comparable == projected
    });
    if unchanged {
        return Ok(ViewAction::NoOp);
    }
    Ok(ViewAction::UpdateView(Box::new(projected)))
}

fn on_error(view: Arc<Redis>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!(
            "Redis view reconciliation error: {:?} on {}/{}",
            error,
            view.namespace().unwrap_or_default(),
            view.name_any()
        )
        .red()
    );
    Action::requeue(Duration::from_secs(5))
}
