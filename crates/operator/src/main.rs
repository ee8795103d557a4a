use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use resact_core::ResourceAction;
use resact_engine::{Engine, EngineConfig};
use tokio::signal;
use tracing::{error, info, warn};

mod reconcile;

use reconcile::RuleReconciler;

#[derive(Parser, Debug)]
#[command(name = "resact", version, about = "Run HTTP actions on Kubernetes resource lifecycle events")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine against the current kube context
    Run {
        /// Prometheus listener, e.g. 0.0.0.0:9090
        #[arg(long = "metrics-addr", env = "RESACT_METRICS_ADDR")]
        metrics_addr: Option<String>,
        /// Status write attempts before a dispatch reports a conflict
        #[arg(long = "status-retry-attempts", env = "RESACT_STATUS_RETRY", default_value_t = 5)]
        status_retry_attempts: u32,
        /// Seconds between retries of resource types discovery cannot resolve yet
        #[arg(long = "requeue-secs", env = "RESACT_REQUEUE_SECS", default_value_t = 30)]
        requeue_secs: u64,
    },
    /// Print the ResourceAction CRD manifest
    Crd,
}

fn init_tracing() {
    let env = std::env::var("RESACT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
            Ok(()) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = %e, "failed to install metrics exporter"),
        },
        Err(_) => warn!(addr = %addr, "invalid metrics address; expected host:port"),
    }
}

async fn run(metrics_addr: Option<String>, status_retry_attempts: u32, requeue_secs: u64) -> Result<()> {
    init_metrics(metrics_addr.as_deref());
    let client = resact_kubehub::get_kube_client().await?;
    let config = EngineConfig { status_update_attempts: status_retry_attempts.max(1), ..EngineConfig::default() };
    let engine = Arc::new(Engine::with_http(resact_kubehub::kube_ports(client.clone()), config));
    let shutdown = engine.shutdown_token();

    let reconciler = RuleReconciler::new(engine.clone(), Duration::from_secs(requeue_secs.max(1)));
    let handle = tokio::spawn(reconciler.run(client, shutdown.clone()));

    tokio::select! {
        res = signal::ctrl_c() => {
            res.context("listening for ctrl-c")?;
            info!("ctrl-c received");
        }
        _ = shutdown.cancelled() => {}
    }
    engine.shutdown();
    handle.await.context("joining rule reconciler")??;
    info!(watched = engine.watched().len(), "resact stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { metrics_addr, status_retry_attempts, requeue_secs } => {
            if let Err(e) = run(metrics_addr, status_retry_attempts, requeue_secs).await {
                error!(error = ?e, "run failed");
                return Err(e);
            }
        }
        Commands::Crd => {
            let yaml = serde_yaml::to_string(&ResourceAction::crd()).context("rendering CRD manifest")?;
            print!("{yaml}");
        }
    }
    Ok(())
}
