//! buildrop OTA install server
//!
//! HTTP service issuing install links, installer manifests and downloads.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use buildrop_core::config::load_config;
use buildrop_core::tracing_init::init_tracing;
use buildrop_crypto::OtaTokenCodec;
use buildrop_server::auth::{AccessControl, JwtManager};
use buildrop_server::blob;
use buildrop_server::ingest;
use buildrop_server::origin::OriginResolver;
use buildrop_server::routes::{AppState, build_router};
use buildrop_server::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "buildrop-server")]
#[command(version, about = "buildrop OTA install server - install links, manifests and downloads")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "BUILDROP_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config).
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Path to SQLite database file (overrides config).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.listen_addr = addr;
    }
    if let Some(path) = args.db_path {
        config.server.database_path = path;
    }
    if args.log_json {
        config.logging.json = true;
    }
    config.validate()?;

    init_tracing(&config.logging);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.listen_addr,
        environment = ?config.ota.environment,
        "Starting buildrop-server"
    );

    let (tokens, secret_source) = OtaTokenCodec::from_secrets(
        config.ota.token_secret.as_deref(),
        config.ota.app_secret.as_deref(),
    )
    .map_err(|e| anyhow::anyhow!("Install token signing is not configured: {e}"))?;
    info!(source = ?secret_source, "Install token secret resolved");

    let session_secret = config
        .ota
        .app_secret
        .as_deref()
        .or(config.ota.token_secret.as_deref())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("No session secret configured"))?;
    let jwt = Arc::new(JwtManager::new(session_secret.as_bytes()));

    let origins = OriginResolver::from_config(&config.ota);
    if let Some(e) = origins.config_error() {
        warn!(error = %e, "Public URL is invalid; install links will fail until it is fixed");
    }

    info!(path = %config.server.database_path.display(), "Opening database");
    let db = Database::open(&config.server.database_path).await?;
    let blobs = blob::from_config(&config.storage)?;

    let (ingest, worker) = ingest::from_config(&config.ingest, db.clone(), Arc::clone(&blobs));
    info!(mode = ?config.ingest.mode, "Ingest pipeline ready");

    let state = AppState {
        access: AccessControl::new(jwt, db.clone()),
        db,
        blobs,
        tokens: Arc::new(tokens),
        origins: Arc::new(origins),
        ingest,
        default_ttl_secs: config.ota.default_ttl_secs,
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    info!(addr = %config.server.listen_addr, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal");
    })
    .await?;

    // The router held the last queue sender; the worker drains and exits.
    if let Some(worker) = worker {
        if tokio::time::timeout(Duration::from_secs(10), worker).await.is_err() {
            warn!("Ingest worker did not finish in time");
        }
    }
    info!("buildrop-server stopped");
    Ok(())
}
