//! VisionCOP image indexing and similarity search service.
//!
//! Accepts image uploads over HTTP, indexes them with a color-feature
//! embedder and answers visual similarity and authenticity queries.
//!
//! # Environment Variables
//! - `DATA_DIR` - Root for stored images and the index snapshot (default: data)
//! - `HTTP_PORT` - API listen port (default: 8000)
//! - `METRICS_PORT` - Prometheus metrics port (default: 9090)
//! - `EPHEMERAL_INDEX` - Keep the index in memory only (default: false)
//! - `EMBEDDING_MODEL` - color-histogram | spatial-color (default: color-histogram)
//! - `HEALTHCHECK_URL` - Base URL probed by `healthcheck` (default: localhost)
//! - `RUST_LOG` - Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use visioncop::config::Config;
use visioncop::engine::VisionEngine;
use visioncop::http::{router, RouterOptions};
use visioncop::{metrics, seed};

#[derive(Debug, Parser)]
#[command(name = "visioncop", version, about = "Image indexing and similarity search service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Generate and index the sample dataset
    Seed,
    /// Probe a running instance and exit 0 if it is serving
    Healthcheck,
}

/// Run healthcheck mode: GET /health and return the process exit code.
/// Tries both IPv6 and IPv4 loopback unless `HEALTHCHECK_URL` is set.
async fn run_healthcheck() -> i32 {
    let urls = match std::env::var("HEALTHCHECK_URL") {
        Ok(url) => vec![(url, Duration::from_secs(5))],
        Err(_) => {
            let port = Config::from_env().map(|c| c.http_port).unwrap_or(8000);
            vec![
                (format!("http://[::1]:{}", port), Duration::from_secs(2)),
                (format!("http://127.0.0.1:{}", port), Duration::from_secs(2)),
            ]
        }
    };

    for (url, timeout) in &urls {
        match tokio::time::timeout(*timeout, check_health(url)).await {
            Ok(Ok(())) => {
                eprintln!("healthcheck: service is healthy (via {})", url);
                return 0;
            }
            Ok(Err(e)) => eprintln!("healthcheck: {} failed: {}", url, e),
            Err(_) => eprintln!("healthcheck: timeout connecting to {}", url),
        }
    }

    eprintln!("healthcheck: service is not healthy");
    1
}

async fn check_health(base_url: &str) -> anyhow::Result<()> {
    let client: Client<_, Empty<Bytes>> = Client::builder(TokioExecutor::new()).build_http();
    let uri: hyper::Uri = format!("{}/health", base_url.trim_end_matches('/')).parse()?;

    let response = client.get(uri).await?;
    if response.status().is_success() {
        Ok(())
    } else {
        anyhow::bail!("service returned {}", response.status())
    }
}

/// Bind the API listener.
/// Supports: auto-detect, explicit IPv4 (0.0.0.0), IPv6 (::), or dual-stack ([::])
async fn bind_listener(config: &Config) -> anyhow::Result<TcpListener> {
    if config.bind_address == "auto" {
        // Auto-detect: Try dual-stack first, fall back to IPv4-only
        if let Ok(listener) = TcpListener::bind(("::", config.http_port)).await {
            info!("Auto-detected dual-stack support, using [::]");
            return Ok(listener);
        }
        info!("IPv6 not available, falling back to IPv4 (0.0.0.0)");
        return Ok(TcpListener::bind(("0.0.0.0", config.http_port)).await?);
    }

    // Add brackets if it's an IPv6 address without them
    let bind_str = if config.bind_address.contains(':') && !config.bind_address.starts_with('[') {
        format!("[{}]:{}", config.bind_address, config.http_port)
    } else {
        format!("{}:{}", config.bind_address, config.http_port)
    };
    let addr: SocketAddr = bind_str
        .parse()
        .with_context(|| format!("invalid BIND_ADDRESS {:?}", config.bind_address))?;

    Ok(TcpListener::bind(addr).await?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn load_engine(config: &Config) -> anyhow::Result<VisionEngine> {
    // No silent fallbacks: a snapshot that cannot be loaded stops startup
    VisionEngine::from_config(config).await.map_err(|e| {
        error!(
            error = %e,
            index = %config.index_path().display(),
            "FATAL: Failed to load image index. Set EPHEMERAL_INDEX=true to start empty."
        );
        e.into()
    })
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!("Starting visioncop service");

    let metrics_handle = metrics::init_metrics().context("failed to install metrics recorder")?;

    let engine = Arc::new(load_engine(&config).await?);
    metrics::set_indexed_images(engine.index().len().await);

    // Start metrics server in background
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_port, metrics_handle).await {
            error!(error = %e, port = metrics_port, "Metrics server failed");
        }
    });

    let options = RouterOptions {
        max_upload_bytes: config.max_upload_bytes,
        cors_permissive: config.cors_permissive,
    };
    let app = router(Arc::clone(&engine), &options);

    let listener = bind_listener(&config).await?;
    info!(addr = %listener.local_addr()?, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn run_seed(config: Config) -> anyhow::Result<()> {
    let engine = load_engine(&config).await?;
    let indexed = seed::generate_samples(&engine).await?;
    let total = engine.index().len().await;

    println!("Indexed {} sample images ({} total in index)", indexed, total);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (use RUST_LOG env var to control log level)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Check if running in healthcheck mode
    let program_name = std::env::args()
        .next()
        .and_then(|path| {
            std::path::Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
        .unwrap_or_default();

    let command = if program_name == "healthcheck" {
        Command::Healthcheck
    } else {
        Cli::parse().command.unwrap_or(Command::Serve)
    };

    if let Command::Healthcheck = command {
        std::process::exit(run_healthcheck().await);
    }

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_port = config.http_port,
        metrics_port = config.metrics_port,
        data_dir = %config.data_dir.display(),
        model = %config.embedding_model,
        ephemeral_index = config.ephemeral_index,
        "Configuration loaded"
    );

    match command {
        Command::Seed => run_seed(config).await,
        _ => serve(config).await,
    }
}
