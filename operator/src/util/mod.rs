use std::collections::HashMap;
use std::fmt::Debug;
use std::time::{Duration, Instant};

use kube::Api;
use owo_colors::OwoColorize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use self::colors::{FG1, FG2};

pub mod finalizer;
pub mod leader;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod patch;

pub(crate) mod colors;

mod error;

pub use error::*;

/// The default interval for requeuing a managed resource.
pub(crate) const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

static PROBE_INTERVAL: std::sync::OnceLock<Duration> = std::sync::OnceLock::new();

/// Override the steady-state requeue interval; set once at startup.
pub fn set_probe_interval(interval: Duration) {
    let _ = PROBE_INTERVAL.set(interval);
}

pub(crate) fn probe_interval() -> Duration {
    PROBE_INTERVAL.get().copied().unwrap_or(DEFAULT_PROBE_INTERVAL)
}

/// Name of the kubernetes resource manager.
pub(crate) const MANAGER_NAME: &str = "redis-operator";

/// Installs the stop-signal handlers once and hands back the token every
/// controller loop watches. SIGTERM is what the kubelet sends; Ctrl+C
/// covers a local run.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        stop_signal().await;
        eprintln!("{}", "🛑 stop signal received, draining controllers".red());
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn stop_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{}", format!("failed to install SIGTERM handler: {e}").red());
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Grace period between deleting a workload set and recreating it during a
/// rebuild, letting the apiserver observe the deletion.
pub(crate) const REBUILD_GRACE: Duration = Duration::from_secs(2);

/// Attempts for optimistic-concurrency retries on status/finalizer writes.
pub(crate) const CONFLICT_RETRIES: u32 = 5;

/// Fetch a namespaced object, mapping 404 to `None`.
pub async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>, Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Log an action transition once, staying quiet while the action repeats.
/// Steady states re-log after five minutes so long-lived resources still
/// leave a trace.
pub(crate) async fn log_transition(
    last_action: &Mutex<HashMap<(String, String), (String, Instant)>>,
    namespace: &str,
    name: &str,
    action: &str,
) {
    let value = {
        let mut la = last_action.lock().await;
        la.insert(
            (namespace.to_string(), name.to_string()),
            (action.to_string(), Instant::now()),
        )
    };
    let should_log = match value {
        Some((last, at)) => last != action || at.elapsed() > Duration::from_secs(300),
        None => true,
    };
    if should_log {
        println!(
            "🔧 {}{}{}{}{}",
            namespace.color(FG2),
            "/".color(FG1),
            name.color(FG2),
            " ACTION: ".color(FG1),
            action.color(FG2),
        );
    }
}

/// Delete an object, tolerating it already being gone.
pub async fn delete_opt<K>(api: &Api<K>, name: &str) -> Result<(), Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Create an object, tolerating a concurrent creation of the same name.
pub async fn create_opt<K>(api: &Api<K>, object: &K) -> Result<(), Error>
where
    K: Clone + serde::Serialize + DeserializeOwned + Debug,
{
    match api.create(&Default::default(), object).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}
