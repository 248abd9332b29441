use anyhow::Context as _;
use clap::Parser;
use kube::Client;
use podlock::client::LockClient;
use podlock::cluster::{ClusterReader, KubeClusterReader};
use podlock::config::{ChecksArgs, Cli, Command, HealthArgs, InitArgs, LockArgs};
use podlock::health::{
    DaemonSetCheck, DaemonSetFilter, EndpointCheck, Evaluator, HealthAggregator, HealthSignal,
    NodeLoadCheck,
};
use podlock::lease::LeaseManager;
use podlock::metrics::{create_metrics, SharedMetrics};
use podlock::probe::EndpointProbe;
use podlock::retry::RetryPolicy;
use podlock::server::{gate_router, metrics_router, serve, status_router, GateState};
use podlock::shutdown::spawn_signal_handler;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Enabled evaluators plus an aggregator over every check, disabled ones included
struct Health {
    aggregator: HealthAggregator,
    evaluators: Vec<Evaluator>,
}

impl Health {
    fn spawn(self, shutdown: &CancellationToken) -> (HealthAggregator, Vec<JoinHandle<()>>) {
        let handles = self
            .evaluators
            .into_iter()
            .map(|evaluator| evaluator.spawn(shutdown.clone()))
            .collect();
        (self.aggregator, handles)
    }
}

/// Build one evaluator per enabled check
///
/// Cluster checks talk to the API server; the node is fetched once here and a
/// failure to read it aborts startup.
async fn build_health(
    checks: &ChecksArgs,
    metrics: &SharedMetrics,
    shutdown: &CancellationToken,
) -> anyhow::Result<Health> {
    let mut signals = Vec::new();
    let mut evaluators = Vec::new();

    if checks.endpoint_check_enabled() {
        let probe = EndpointProbe::new(checks.endpoint_timeout())?;
        let check = EndpointCheck::new(checks.endpoints.clone(), probe);
        let evaluator = Evaluator::new(
            Box::new(check),
            checks.endpoint_periods(),
            metrics.clone(),
        );
        signals.push(evaluator.signal());
        evaluators.push(evaluator);
    } else {
        info!("Endpoint check disabled");
        signals.push(HealthSignal::disabled("endpoints"));
    }

    if checks.cluster_checks_enabled() {
        let node_name = checks
            .node_name()
            .context("NODE_NAME is required for cluster checks")?
            .to_string();

        let client = match Client::try_default().await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "Failed to create Kubernetes client");
                return Err(e.into());
            }
        };
        info!("Connected to Kubernetes cluster");

        let reader: Arc<dyn ClusterReader> = Arc::new(KubeClusterReader::new(
            client,
            RetryPolicy::default(),
            shutdown.clone(),
        ));
        let node = reader
            .get_node(&node_name)
            .await
            .with_context(|| format!("failed to read node {}", node_name))?;

        if checks.daemonset_check {
            let filter = DaemonSetFilter {
                include: checks.daemonset_include(),
                exclude: checks.daemonset_exclude(),
                host_network_only: checks.daemonset_host_network,
            };
            let node_labels = node.metadata.labels.clone().unwrap_or_default();
            let check = DaemonSetCheck::new(
                reader.clone(),
                filter,
                checks.daemonset_namespace(),
                node_name.clone(),
                node_labels,
            );
            let evaluator = Evaluator::new(
                Box::new(check),
                checks.daemonset_periods(),
                metrics.clone(),
            );
            signals.push(evaluator.signal());
            evaluators.push(evaluator);
        } else {
            signals.push(HealthSignal::disabled("daemonsets"));
        }

        if checks.nodeload_check {
            let check = NodeLoadCheck::new(
                reader.clone(),
                node_name.clone(),
                &node,
                checks.nodeload_threshold,
            )?;
            let evaluator = Evaluator::new(
                Box::new(check),
                checks.nodeload_periods(),
                metrics.clone(),
            );
            signals.push(evaluator.signal());
            evaluators.push(evaluator);
        } else {
            signals.push(HealthSignal::disabled("nodeload"));
        }
    } else {
        info!("Cluster checks disabled");
        signals.push(HealthSignal::disabled("daemonsets"));
        signals.push(HealthSignal::disabled("nodeload"));
    }

    Ok(Health {
        aggregator: HealthAggregator::new(signals),
        evaluators,
    })
}

async fn bind(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {}:{}", host, port))
}

/// Wait for evaluator loops after the server has stopped
async fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Health evaluator task failed");
        }
    }
}

async fn run_lock(args: LockArgs, shutdown: CancellationToken) -> anyhow::Result<()> {
    let metrics = create_metrics()?;
    let health = build_health(&args.checks, &metrics, &shutdown).await?;
    let (aggregator, handles) = health.spawn(&shutdown);

    let state = GateState {
        leases: Arc::new(LeaseManager::new(args.parallel_locks)),
        health: aggregator,
        default_duration: args.default_duration(),
        metrics: metrics.clone(),
    };
    info!(
        parallel_locks = args.parallel_locks,
        default_duration_secs = args.lock_duration,
        "Lease gate configured"
    );

    let app = gate_router(state).merge(metrics_router(metrics));
    let listener = bind(&args.host, args.port).await?;
    serve(listener, app, shutdown.clone()).await?;

    shutdown.cancel();
    join_all(handles).await;
    Ok(())
}

async fn run_health(args: HealthArgs, shutdown: CancellationToken) -> anyhow::Result<()> {
    let metrics = create_metrics()?;
    let health = build_health(&args.checks, &metrics, &shutdown).await?;
    let (aggregator, handles) = health.spawn(&shutdown);

    let app = status_router(aggregator).merge(metrics_router(metrics));
    let listener = bind(&args.host, args.port).await?;
    serve(listener, app, shutdown.clone()).await?;

    shutdown.cancel();
    join_all(handles).await;
    Ok(())
}

async fn run_init(args: InitArgs, shutdown: CancellationToken) -> anyhow::Result<()> {
    let client = LockClient::new(
        &args.lock_host,
        args.lock_port,
        args.duration(),
        args.timeout(),
    )?;
    if client.wait_for_lease(args.period(), &shutdown).await {
        Ok(())
    } else {
        anyhow::bail!("shut down before a lease from {} was granted", client.url())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = cli.command.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    let shutdown = CancellationToken::new();
    let _signals = spawn_signal_handler(shutdown.clone());

    match cli.command {
        Command::Lock(args) => {
            info!("Starting podlock lease gate");
            run_lock(args, shutdown).await
        }
        Command::Health(args) => {
            info!("Starting podlock health status server");
            run_health(args, shutdown).await
        }
        Command::Init(args) => {
            info!("Waiting for a lease");
            run_init(args, shutdown).await
        }
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
