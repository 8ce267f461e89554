use super::Error;
use kube::client::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs a controller under leader election. Only the current leader runs
/// the controller task produced by `start`; on leadership loss the task is
/// aborted and this replica returns to standby. The `shutdown` token is
/// the process-wide one from [`super::shutdown_token`]. Keeping the lease
/// in the controller namespace lets RBAC stay namespaced rather than
/// cluster-scoped.
pub async fn run_leader_elected(
    client: Client,
    namespace: &str,
    lease_name: &str,
    shutdown: CancellationToken,
    start: impl Fn(Client, String) -> tokio::task::JoinHandle<()>,
) -> Result<(), Error> {
    // Unique identity per replica (Downward API POD_NAME is ideal).
    // Fallback to hostname if not present.
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("{}-{}", lease_name, uuid::Uuid::new_v4()));
    // TTL: how long leadership is considered valid without renewal.
    // Renew should happen well before TTL expires.
    let lease_ttl = Duration::from_secs(15);
    let renew_every = Duration::from_secs(5);
    let leadership = LeaseLock::new(
        client.clone(),
        namespace,
        LeaseLockParams {
            holder_id,
            lease_name: lease_name.to_string(),
            lease_ttl,
        },
    );

    let namespace = namespace.to_string();
    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(renew_every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break Ok(())
            },
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                // If we can't talk to the apiserver / update the Lease,
                // assume we are not safe to lead.
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                    eprintln!("aborted {lease_name} controller due to leader election error");
                }
                continue;
            }
        };
        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_task.is_none() {
                println!(
                    "{}",
                    format!("👑 acquired {lease_name}; starting controller").green()
                );
                controller_task = Some(start(client.clone(), namespace.clone()));
            }
        } else if let Some(task) = controller_task.take() {
            // We are NOT leader; ensure the controller is stopped.
            eprintln!("lost leadership on {lease_name}; stopping controller");
            task.abort();
        }
    }
}
