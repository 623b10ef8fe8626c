//! Satellite Storage Operator
//!
//! Per-unit reconciler for a storage node of a LINSTOR-style cluster:
//! node registration, storage-pool convergence, and deregistration driven
//! by relation lifecycle and configuration events.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use satellite_storage_operator::{
    Error, FileInputSource, FileStateStore, PodIdentityResolver, Reconciler, Result,
    RestClusterFactory, Runner,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Satellite Storage Operator - storage-node registration and pool reconciler
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// This unit's platform-assigned identifier (matched against pod metadata)
    #[arg(long, env = "UNIT_NAME")]
    unit: String,

    /// Application name this unit belongs to
    #[arg(long, env = "APP_NAME", default_value = "satellite-storage")]
    app: String,

    /// Kubernetes namespace the application's pods run in
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Path to the controller relation data file (JSON, `url` key)
    #[arg(long, env = "RELATION_DATA_FILE", default_value = "/var/lib/satellite/relation.json")]
    relation_data_file: String,

    /// Path to the storage-pool config option text
    #[arg(long, env = "POOL_CONFIG_FILE", default_value = "/var/lib/satellite/storage-pools")]
    pool_config_file: String,

    /// Path to the persisted unit state file
    #[arg(long, env = "STATE_FILE", default_value = "/var/lib/satellite/unit-state.json")]
    state_file: String,

    /// Reconcile/redelivery interval in seconds
    #[arg(long, env = "RECONCILE_INTERVAL", default_value = "30")]
    reconcile_interval_secs: u64,

    /// Cluster API call timeout in seconds
    #[arg(long, env = "CLUSTER_TIMEOUT", default_value = "10")]
    cluster_timeout_secs: u64,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Satellite Storage Operator");
    info!("  Version: {}", satellite_storage_operator::VERSION);
    info!("  Unit: {}", args.unit);
    info!("  Application: {}", args.app);
    info!("  Namespace: {}", args.namespace);
    info!("  Reconcile interval: {}s", args.reconcile_interval_secs);

    let client = kube::Client::try_default().await?;

    let resolver = PodIdentityResolver::new(client, &args.namespace, &args.app, &args.unit);
    let clusters = RestClusterFactory::new(Duration::from_secs(args.cluster_timeout_secs));
    let store = FileStateStore::new(&args.state_file);

    let reconciler = Reconciler::new(
        Arc::new(clusters),
        Arc::new(resolver),
        Arc::new(store),
        args.app.clone(),
    );

    let source = FileInputSource::new(&args.relation_data_file, &args.pool_config_file);
    let runner = Runner::new(reconciler, Box::new(source));

    // Health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    info!("Starting reconciliation loop");
    runner
        .run(Duration::from_secs(args.reconcile_interval_secs))
        .await?;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("kube=info".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" => Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::from("ok"))
                    .unwrap(),
                "/readyz" => Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::from("ok"))
                    .unwrap(),
                _ => Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from("not found"))
                    .unwrap(),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid health server address: {e}")))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {e}")))?;

    Ok(())
}
