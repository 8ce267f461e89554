use clap::Parser;
use kube::Client;
use owo_colors::OwoColorize;

mod aggregate;
mod cluster;
mod config;
mod drift;
mod instance;
mod masterreplica;
mod resources;
mod sentinel;
mod storage;
mod util;

#[derive(Parser, Debug)]
#[command(name = "redis-operator", about = "Redis lifecycle operator")]
struct Args {
    /// Namespace the controllers and their leases run in.
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    namespace: String,

    /// Port serving /metrics, /healthz and /readyz.
    #[arg(long, env = "METRICS_PORT", default_value_t = 9090)]
    metrics_port: u16,

    /// Steady-state requeue interval, e.g. "30s" or "2m".
    #[arg(long, env = "PROBE_INTERVAL", default_value = "30s")]
    probe_interval: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    redis_operator_common::init();
    let args = Args::parse();

    let probe_interval = parse_duration::parse(&args.probe_interval)
        .map_err(|e| anyhow::anyhow!("invalid --probe-interval '{}': {e}", args.probe_interval))?;
    util::set_probe_interval(probe_interval);

    let client = Client::try_default().await?;

    #[cfg(feature = "metrics")]
    tokio::spawn(util::metrics::serve(args.metrics_port));
    #[cfg(not(feature = "metrics"))]
    let _ = args.metrics_port;

    redis_operator_common::signal_ready();
    println!(
        "{}",
        format!("🚀 redis-operator up in namespace '{}'", args.namespace).green()
    );

    let ns = args.namespace;
    let shutdown = util::shutdown_token();
    tokio::try_join!(
        instance::run(client.clone(), ns.clone(), shutdown.clone()),
        masterreplica::run(client.clone(), ns.clone(), shutdown.clone()),
        sentinel::run(client.clone(), ns.clone(), shutdown.clone()),
        cluster::run(client.clone(), ns.clone(), shutdown.clone()),
        aggregate::run(client, ns, shutdown),
    )?;
    Ok(())
}
