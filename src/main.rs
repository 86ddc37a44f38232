//! Local Diskmaker
//!
//! Node-local daemon that links unmounted block devices and shared
//! directories into per-storage-class directories for local volume
//! provisioning.

use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use local_diskmaker::domain::ports::EventReporterRef;
use local_diskmaker::{
    DiskConfig, DiskMaker, DiskMakerConfig, DiskMakerMetrics, Error, KubeEventReporter,
    LogReporter, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Local Diskmaker - stable symlinks for local storage devices
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Diskmaker configuration file written by the operator
    #[arg(long, env = "CONFIG_LOCATION", default_value = "/etc/local-storage/diskMakerConfig")]
    config_location: PathBuf,

    /// Root directory for per-storage-class symlinks
    #[arg(long, env = "SYMLINK_LOCATION", default_value = local_diskmaker::config::DEFAULT_SYMLINK_ROOT)]
    symlink_location: PathBuf,

    /// Host root filesystem as mounted into the container
    #[arg(long, env = "ROOTFS_DIR", default_value = local_diskmaker::config::DEFAULT_ROOTFS_DIR)]
    rootfs_dir: PathBuf,

    /// Glob for stable device identifier links
    #[arg(long, env = "DEVICE_ID_GLOB", default_value = local_diskmaker::config::DEFAULT_DEVICE_ID_GLOB)]
    device_id_glob: String,

    /// Block device listing command
    #[arg(long, env = "LSBLK_COMMAND", default_value = local_diskmaker::config::DEFAULT_LSBLK_COMMAND)]
    lsblk_command: String,

    /// Reconciliation interval in seconds
    #[arg(long, env = "CHECK_INTERVAL", default_value_t = local_diskmaker::config::DEFAULT_CHECK_INTERVAL_SECS)]
    check_interval_secs: u64,

    /// Node name reported as the event source instance
    #[arg(long, env = "MY_NODE_NAME")]
    node_name: Option<String>,

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

    /// Run without a Kubernetes API server, events go to the log
    #[arg(long, env = "STANDALONE")]
    standalone: bool,
}

impl Args {
    fn diskmaker_config(&self) -> DiskMakerConfig {
        DiskMakerConfig {
            symlink_root: self.symlink_location.clone(),
            rootfs_dir: self.rootfs_dir.clone(),
            device_id_glob: self.device_id_glob.clone(),
            lsblk_command: self.lsblk_command.clone(),
            check_interval: Duration::from_secs(self.check_interval_secs),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting Local Diskmaker");
    info!("  Version: {}", local_diskmaker::VERSION);
    info!("  Config: {}", args.config_location.display());
    info!("  Symlink location: {}", args.symlink_location.display());
    info!("  Check interval: {}s", args.check_interval_secs);
    info!("  Standalone mode: {}", args.standalone);

    let config = args.diskmaker_config();
    config.validate()?;

    let shutdown = CancellationToken::new();

    let (reporter, publisher): (EventReporterRef, Option<JoinHandle<()>>) = if args.standalone {
        (Arc::new(LogReporter), None)
    } else {
        let client = kube::Client::try_default().await?;
        let (reporter, handle) =
            KubeEventReporter::start(client, args.node_name.clone(), shutdown.clone());
        (Arc::new(reporter), Some(handle))
    };

    let metrics = DiskMakerMetrics::register(prometheus::default_registry())?;
    let diskmaker = Arc::new(DiskMaker::new(config, reporter).with_metrics(metrics));

    if let Err(e) = diskmaker.ensure_symlink_root() {
        error!("{}", e);
        std::process::exit(1);
    }

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::spawn(wait_for_stop_signal(shutdown.clone()));

    run_loop(diskmaker, args.config_location.clone(), shutdown).await;

    // Publisher flushes queued events once the stop signal is seen
    if let Some(handle) = publisher {
        if let Err(e) = handle.await {
            error!("Event publisher task failed: {}", e);
        }
    }

    info!("Diskmaker shutdown complete");
    Ok(())
}

// =============================================================================
// Reconciliation Loop
// =============================================================================

/// Tick until stopped. Each cycle is awaited before the next tick is taken,
/// so cycles never overlap.
async fn run_loop(diskmaker: Arc<DiskMaker>, config_location: PathBuf, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(diskmaker.config().check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Exiting, received stop signal");
                break;
            }
            _ = ticker.tick() => {
                let diskmaker = diskmaker.clone();
                let config_location = config_location.clone();
                let cycle = tokio::task::spawn_blocking(move || run_tick(&diskmaker, &config_location));
                if let Err(e) = cycle.await {
                    error!("Reconciliation task failed: {}", e);
                }
            }
        }
    }
}

fn run_tick(diskmaker: &DiskMaker, config_location: &Path) {
    match DiskConfig::load(config_location) {
        Ok(disk_config) => {
            diskmaker.reconcile(&disk_config);
        }
        Err(e) => error!("Error loading configuration: {}", e),
    }
}

async fn wait_for_stop_signal(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
    shutdown.cancel();
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

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

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
            let mut response = Response::new(Body::from("ok"));
            match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => {}
                _ => {
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    *response.body_mut() = Body::from("not found");
                }
            }
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid health server address: {}", e)))?;

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

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let mut response = Response::new(Body::empty());
            match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => {
                            if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
                                response.headers_mut().insert(CONTENT_TYPE, content_type);
                            }
                            *response.body_mut() = Body::from(buffer);
                        }
                        Err(e) => {
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            *response.body_mut() = Body::from(e.to_string());
                        }
                    }
                }
                _ => {
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    *response.body_mut() = Body::from("not found");
                }
            }
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
