//! LUN Orchestrator
//!
//! Runs the provisioning control plane for the local iSCSI target: the REST
//! API on one listener and Prometheus metrics on another.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lun_orchestrator::{
    ApiServer, ApiServerConfig, Error, Orchestrator, OrchestratorConfig, ProvisionerMetrics,
    Result, SystemExecutor,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// LUN Orchestrator - LVM and LIO iSCSI provisioning control plane
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// YAML configuration file
    #[arg(long, env = "LUN_ORCHESTRATOR_CONFIG")]
    config: Option<String>,

    /// Target IQN, overrides the configuration file
    #[arg(long, env = "TARGET_IQN")]
    target_iqn: Option<String>,

    /// Directory for file-backed LUN images, overrides the configuration file
    #[arg(long, env = "BACKSTORE_DIR")]
    backstore_dir: Option<String>,

    /// Run storage tools directly instead of through sudo
    #[arg(long, env = "NO_SUDO")]
    no_sudo: bool,

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

    info!("Starting LUN Orchestrator");
    info!("  Version: {}", lun_orchestrator::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Metrics: {}", args.metrics_addr);

    let config = load_config(&args)?;
    info!("  Target: {}", config.target.iqn);
    info!("  Backstore dir: {}", config.backends.backstore_dir);
    info!("  Sudo: {}", config.executor.use_sudo);

    let metrics = Arc::new(ProvisionerMetrics::new()?);
    let executor = Arc::new(SystemExecutor::new(config.executor.clone()));
    let orchestrator = Orchestrator::new(config, executor, metrics.clone());

    // The API still serves listings when the target cannot be prepared yet;
    // every create and delete retries the preparation.
    if let Err(e) = orchestrator.initialize().await {
        warn!("Target not ready at startup: {}", e);
    }

    let metrics_addr = parse_addr(&args.metrics_addr, "metrics")?;
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    let api_config = ApiServerConfig {
        rest_addr: parse_addr(&args.api_addr, "REST API")?,
    };
    let api_server = ApiServer::new(api_config, orchestrator);

    let shutdown = api_server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown.send(());
        }
    });

    api_server.run().await?;

    info!("Shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<OrchestratorConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path);
            OrchestratorConfig::load(path)?
        }
        None => OrchestratorConfig::default(),
    };

    if let Some(iqn) = &args.target_iqn {
        config.target.iqn = iqn.clone();
    }
    if let Some(dir) = &args.backstore_dir {
        config.backends.backstore_dir = dir.clone();
    }
    if args.no_sudo {
        config.executor.use_sudo = false;
    }

    config.validate()?;
    Ok(config)
}

fn parse_addr(addr: &str, what: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} address {}: {}", what, addr, e)))
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
    for directive in ["hyper=warn", "tower=warn", "tower_http=info", "axum=info"] {
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
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, metrics: Arc<ProvisionerMetrics>) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = if req.uri().path() != "/metrics" {
                        let mut response = Response::new(Body::from("not found"));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        response
                    } else {
                        match metrics.encode() {
                            Ok((content_type, buffer)) => {
                                let mut response = Response::new(Body::from(buffer));
                                if let Ok(value) = HeaderValue::from_str(&content_type) {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => {
                                error!("Metrics encoding failed: {}", e);
                                let mut response = Response::new(Body::from(e.to_string()));
                                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                response
                            }
                        }
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
