//! Depot server binary.

use anyhow::{Context, Result};
use clap::Parser;
use depot_core::config::AppConfig;
use depot_metadata::{MetadataStore, SqliteStore};
use depot_server::reconciler::sync_channel;
use depot_server::{AppState, Auditor, Janitor, Reconciler, create_router};
use depot_storage::BlobStore;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Depot - a self-hosted artifact repository
#[derive(Parser, Debug)]
#[command(name = "depotd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "DEPOT_CONFIG", default_value = "depot.yaml")]
    config: String,

    /// Listen port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Blob storage base directory (overrides config)
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Metadata database file (overrides config)
    #[arg(long)]
    db_file: Option<PathBuf>,

    /// Audit log file (overrides config)
    #[arg(long)]
    audit_file: Option<PathBuf>,

    /// Web interface directory (overrides config)
    #[arg(long)]
    web_dir: Option<PathBuf>,

    /// Maximum upload size, e.g. 100MB (overrides config)
    #[arg(long)]
    max_upload_size: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Depot v{}", env!("CARGO_PKG_VERSION"));

    // Layered configuration: defaults < YAML file < env vars < CLI flags.
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
    let config_path = std::path::Path::new(&args.config);
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "loading configuration file");
        figment = figment.merge(Yaml::file(&args.config));
    } else {
        tracing::debug!("no config file at {}", args.config);
    }

    let mut config: AppConfig = figment
        .merge(Env::prefixed("DEPOT_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(base_dir) = args.base_dir {
        config.storage.base_dir = base_dir;
    }
    if let Some(db_file) = args.db_file {
        config.database.file = db_file;
    }
    if let Some(audit_file) = args.audit_file {
        config.audit.file = audit_file;
    }
    if let Some(web_dir) = args.web_dir {
        config.server.web_dir = web_dir;
    }
    if let Some(max_upload_size) = args.max_upload_size {
        config.storage.max_upload_size = max_upload_size;
    }

    config.finalize().context("invalid configuration")?;

    // Blob store and metadata store.
    let blobs = Arc::new(
        BlobStore::new(&config.storage.base_dir)
            .await
            .context("failed to initialize blob store")?,
    );
    tracing::info!(base_dir = %config.storage.base_dir.display(), "blob store initialized");

    let metadata: Arc<dyn MetadataStore> = Arc::new(
        SqliteStore::new(&config.database.file)
            .await
            .context("failed to initialize metadata store")?,
    );
    metadata
        .health_check()
        .await
        .context("metadata store health check failed")?;
    tracing::info!(file = %config.database.file.display(), "metadata store initialized");

    let audit = Arc::new(Auditor::open(&config.audit.file).context("failed to open audit log")?);

    // Background tasks share one shutdown signal.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (sync_handle, trigger_rx) = sync_channel();

    let state = AppState::new(
        config.clone(),
        blobs.clone(),
        metadata.clone(),
        audit.clone(),
        sync_handle,
    );

    let janitor = Arc::new(Janitor::new(
        blobs.clone(),
        metadata.clone(),
        audit.clone(),
        state.config.clone(),
    ));
    let _janitor_handle = janitor.spawn(shutdown_rx.clone());
    tracing::info!(
        period_secs = state.config.janitor.period_secs,
        "janitor spawned"
    );

    let reconciler = Arc::new(Reconciler::new(
        blobs,
        metadata,
        audit,
        state.config.clone(),
        shutdown_rx,
    ));
    let _reconciler_handle = reconciler.spawn(trigger_rx);
    tracing::info!(
        interval_secs = state.config.sync.interval_secs,
        "reconciler spawned"
    );

    let app = create_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the janitor and reconciler promptly.
    let _ = shutdown_tx.send(true);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
