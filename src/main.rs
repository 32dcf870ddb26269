//! Tiered Cache CLI
//!
//! Operational entry point for a cache deployment: inspect tier health,
//! invalidate entries, purge expired records, or run a long-lived sweeper
//! with health and metrics endpoints.
//!
//! ```text
//! tiered-cache [--config cache.yaml] [--redis-host H] [--no-remote] <command>
//!
//!   status                         tier health + disk entry count (JSON)
//!   invalidate [--key K] [--tiers] delete one key or clear tiers
//!   sweep                          purge expired memory/disk entries once
//!   serve [--addr A]               sweeper + /healthz /readyz /metrics
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tiered_cache::cache::{
    CacheConfig, CacheKey, CacheManager, Sweeper, TierPolicy, DEFAULT_SWEEP_INTERVAL,
};
use tiered_cache::telemetry;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tiered Cache - memory, Redis and disk cache administration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// YAML configuration file
    #[arg(long, global = true, env = "TIERED_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Redis host
    #[arg(long, global = true, env = "REDIS_HOST")]
    redis_host: Option<String>,

    /// Redis port
    #[arg(long, global = true, env = "REDIS_PORT")]
    redis_port: Option<u16>,

    /// Redis database number
    #[arg(long, global = true, env = "REDIS_DB")]
    redis_db: Option<i64>,

    /// Run without the remote tier
    #[arg(long, global = true, env = "TIERED_CACHE_NO_REMOTE")]
    no_remote: bool,

    /// Disk tier directory
    #[arg(long, global = true, env = "TIERED_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print tier health and disk entry count
    Status,

    /// Delete one key, or clear every entry, in the selected tiers
    Invalidate {
        /// Key to delete (64 hex characters); omit to clear
        #[arg(long)]
        key: Option<String>,

        /// Tiers: memory, remote (redis), disk or multi
        #[arg(long, default_value = "multi")]
        tiers: String,
    },

    /// Purge expired memory and disk entries once
    Sweep,

    /// Run the sweeper with health and metrics endpoints until Ctrl-C
    Serve {
        /// HTTP bind address
        #[arg(long, env = "TIERED_CACHE_ADDR", default_value = "0.0.0.0:8080")]
        addr: String,

        /// Seconds between sweeps
        #[arg(long, env = "SWEEP_INTERVAL_SECONDS")]
        sweep_interval_seconds: Option<u64>,
    },
}

impl Args {
    /// File configuration with command-line overrides applied
    fn cache_config(&self) -> anyhow::Result<CacheConfig> {
        let mut config = match &self.config {
            Some(path) => CacheConfig::from_yaml_file(path)?,
            None => CacheConfig::default(),
        };

        if let Some(host) = &self.redis_host {
            config.remote.host = host.clone();
        }
        if let Some(port) = self.redis_port {
            config.remote.port = port;
        }
        if let Some(db) = self.redis_db {
            config.remote.db = db;
        }
        if self.no_remote {
            config.remote.enabled = false;
        }
        if let Some(dir) = &self.cache_dir {
            config.disk.dir = dir.clone();
        }
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    telemetry::init_logging(&args.log_level, args.log_json);

    let config = args.cache_config()?;
    info!("Starting tiered cache");
    info!("  Remote: {} (enabled: {})", config.remote.url(), config.remote.enabled);
    info!("  Disk: {}", config.disk.dir.display());

    let manager = Arc::new(
        CacheManager::connect(config)
            .await
            .context("failed to open cache")?,
    );

    match args.command {
        Command::Status => {
            let status = serde_json::json!({
                "health": manager.health(),
                "disk_entries": manager.disk().len().await?,
                "disk_dir": manager.disk().dir(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Invalidate { key, tiers } => {
            let tiers: TierPolicy = tiers.parse()?;
            let key = key.as_deref().map(CacheKey::from_hex).transpose()?;
            manager.invalidate(key.as_ref(), tiers).await;
        }
        Command::Sweep => {
            let stats = manager.purge_expired().await?;
            println!("{}", serde_json::to_string(&stats)?);
        }
        Command::Serve {
            addr,
            sweep_interval_seconds,
        } => {
            let interval = sweep_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL);
            serve(manager.clone(), &addr, interval).await?;
        }
    }

    manager.shutdown();
    Ok(())
}

// =============================================================================
// Health & Metrics Server
// =============================================================================

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

async fn handle(
    manager: Arc<CacheManager>,
    req: Request<hyper::body::Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/healthz" | "/livez" => respond(StatusCode::OK, "text/plain", "ok"),
        "/readyz" => {
            let health = manager.health();
            let status = if health.status.is_operational() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            match serde_json::to_vec(&health) {
                Ok(body) => respond(status, "application/json", body),
                Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string()),
            }
        }
        "/metrics" => match telemetry::encode_prometheus(&manager.metrics(), Some(&manager.health())) {
            Ok(text) => respond(StatusCode::OK, "text/plain; version=0.0.4", text),
            Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string()),
        },
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
    };
    Ok(response)
}

async fn serve(manager: Arc<CacheManager>, addr: &str, interval: Duration) -> anyhow::Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid server address '{}'", addr))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let cancel = CancellationToken::new();
    let sweeper = Sweeper::spawn(manager.clone(), interval, cancel.clone());

    info!("Health and metrics server listening on {}", addr);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Server accept error: {}", e);
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let manager = manager.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(manager.clone(), req));
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Server connection error: {}", e);
                    }
                });
            }
        }
    }

    cancel.cancel();
    if let Err(e) = sweeper.await {
        error!("Sweeper task failed: {}", e);
    }
    Ok(())
}
