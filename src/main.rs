//! Local Volume Provisioner
//!
//! Runs the claim scheduler (cluster-wide), the node-local volume agent,
//! or both, next to a health endpoint and a Prometheus metrics endpoint.

use clap::Parser;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use local_volume_provisioner::cluster::{claim_from, volume_from};
use local_volume_provisioner::config::{DEFAULT_PROVISIONER_NAME, DEFAULT_QUOTA_COMMAND, DEFAULT_SELECTOR_FILE};
use local_volume_provisioner::{
    ClaimScheduler, DefaultSelectorTable, Error, HostFiles, KubeStore, LocalHost, ProvisionerConfig,
    ProvisionerMetrics, Result, RunMode, TeardownMode, UpdatePolicy, VolumeLifecycleReconciler, WatchFeed,
    XfsQuota,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Local Volume Provisioner - capacity-aware placement of local volumes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Kubeconfig file; in-cluster or default configuration when unset
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Name of the node this process runs on (required for the node agent)
    #[arg(long, env = "NODE_NAME")]
    node_name: Option<String>,

    /// Mount point of the local volume filesystem
    #[arg(long, env = "STORAGE_PATH", default_value = "/mnt/local-volumes")]
    storage_path: PathBuf,

    /// YAML file mapping storage classes to default node selectors
    #[arg(long, env = "DEFAULT_SELECTOR_FILE", default_value = DEFAULT_SELECTOR_FILE)]
    default_selector_file: PathBuf,

    /// Which components to run
    #[arg(long, env = "MODE", value_enum, default_value_t = RunMode::All)]
    mode: RunMode,

    /// Provisioner identity matched against claims and storage classes
    #[arg(long, env = "PROVISIONER_NAME", default_value = DEFAULT_PROVISIONER_NAME)]
    provisioner_name: String,

    /// Resource version handling on claim and node writes
    #[arg(long, env = "UPDATE_POLICY", value_enum, default_value_t = UpdatePolicy::Overwrite)]
    update_policy: UpdatePolicy,

    /// Cleanup performed when a Delete volume is removed
    #[arg(long, env = "TEARDOWN_MODE", value_enum, default_value_t = TeardownMode::Full)]
    teardown_mode: TeardownMode,

    /// Root under which the host's /etc files are visible
    #[arg(long, env = "HOST_ROOT", default_value = "/")]
    host_root: PathBuf,

    /// Project quota command
    #[arg(long, env = "QUOTA_COMMAND", default_value = DEFAULT_QUOTA_COMMAND)]
    quota_command: String,

    /// Claim resync interval in seconds (0 disables)
    #[arg(long, env = "RESYNC_SECS", default_value = "10")]
    resync_secs: u64,

    /// Deadline for API calls and quota commands in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    request_timeout_secs: u64,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            provisioner_name: self.provisioner_name.clone(),
            update_policy: self.update_policy,
            teardown_mode: self.teardown_mode,
            host_files: HostFiles::under_root(&self.host_root),
            storage_path: self.storage_path.clone(),
            quota_command: self.quota_command.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            claim_resync: Duration::from_secs(self.resync_secs),
            ..ProvisionerConfig::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting Local Volume Provisioner");
    info!("  Version: {}", local_volume_provisioner::VERSION);
    info!("  Mode: {:?}", args.mode);
    info!("  Provisioner: {}", args.provisioner_name);
    info!("  Update policy: {:?}", args.update_policy);

    let config = args.provisioner_config();
    let client = connect(args.kubeconfig.as_ref()).await?;
    let store = Arc::new(KubeStore::new(client.clone(), config.request_timeout));
    let metrics = Arc::new(ProvisionerMetrics::new()?);
    let ready = Arc::new(AtomicBool::new(false));
    let shutdown = CancellationToken::new();

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let served_metrics = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, served_metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    let mut feeds: JoinSet<Result<()>> = JoinSet::new();

    if args.mode.runs_scheduler() {
        let defaults = Arc::new(DefaultSelectorTable::load_or_empty(&args.default_selector_file));
        info!("  Default selectors: {}", defaults.len());

        let scheduler = Arc::new(ClaimScheduler::new(
            &config,
            defaults,
            store.clone(),
            store.clone(),
            metrics.clone(),
        ));
        let feed = WatchFeed::new(
            "PersistentVolumeClaim",
            Api::<PersistentVolumeClaim>::all(client.clone()),
            claim_from,
        )
        .with_resync(config.claim_resync);
        let token = shutdown.clone();
        feeds.spawn(async move { feed.run(scheduler.as_ref(), token).await });
    }

    if args.mode.runs_node_agent() {
        let node_name = args.node_name.clone().ok_or_else(|| {
            Error::Configuration("node name is required for the node agent (--node-name or NODE_NAME)".into())
        })?;

        let quota = XfsQuota::new(
            config.quota_command.clone(),
            config.storage_path.clone(),
            config.request_timeout,
        );
        let reconciler = Arc::new(VolumeLifecycleReconciler::new(
            node_name.clone(),
            &config,
            store.clone(),
            store.clone(),
            Arc::new(LocalHost::new()),
            Arc::new(quota),
            metrics.clone(),
        ));

        let seeded = reconciler.initialize_capacity().await?;
        info!("  Node: {} (capacity {})", node_name, seeded);

        let feed = WatchFeed::new(
            "PersistentVolume",
            Api::<PersistentVolume>::all(client.clone()),
            volume_from,
        );
        let token = shutdown.clone();
        feeds.spawn(async move { feed.run(reconciler.as_ref(), token).await });
    }

    ready.store(true, Ordering::SeqCst);
    info!("Provisioner running");

    let result = tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            info!("Shutdown signal received");
            Ok(())
        }
        Some(joined) = feeds.join_next() => match joined {
            Ok(Ok(())) => Err(Error::Internal("watch feed stopped unexpectedly".into())),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(Error::Internal(format!("watch feed task failed: {}", e))),
        },
    };

    ready.store(false, Ordering::SeqCst);
    shutdown.cancel();
    while let Some(joined) = feeds.join_next().await {
        if let Ok(Err(e)) = joined {
            error!("Watch feed error during shutdown: {}", e);
        }
    }

    match &result {
        Ok(()) => info!("Provisioner shutdown complete"),
        Err(e) => error!("Provisioner stopping: {}", e),
    }
    result
}

async fn connect(kubeconfig: Option<&PathBuf>) -> Result<Client> {
    let Some(path) = kubeconfig else {
        return Ok(Client::try_default().await?);
    };
    let kubeconfig = Kubeconfig::read_from(path)
        .map_err(|e| Error::Configuration(format!("Cannot read kubeconfig {}: {}", path.display(), e)))?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::Configuration(format!("Invalid kubeconfig {}: {}", path.display(), e)))?;
    Ok(Client::try_from(config)?)
}

async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directive = |d: &str| -> Result<Directive> {
        d.parse()
            .map_err(|e| Error::Configuration(format!("Invalid log directive {}: {}", d, e)))
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("kube=info")?)
        .add_directive(directive("tower=warn")?);

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
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::SeqCst);
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if ready => text_response(StatusCode::OK, "ok"),
                        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "starting"),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid health server address: {}", e)))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: Arc<ProvisionerMetrics>) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok((content_type, buffer)) => {
                                let mut response = Response::new(Body::from(buffer));
                                if let Ok(value) = HeaderValue::from_str(&content_type) {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => {
                                error!("Cannot encode metrics: {}", e);
                                text_response(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
                            }
                        },
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
