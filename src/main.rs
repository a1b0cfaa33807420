//! imagestore -- per-user image store server.
//!
//! Images live as plain files under `<root>/<user>/`; there is no index to
//! rebuild, so every startup only needs the root directory and the token
//! database to exist.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use imagestore::config::{Config, LoggingConfig};
use imagestore::storage::validation::ExtensionAllowList;
use imagestore::storage::{ImageStore, LocalImageStore};
use imagestore::tokens::{SqliteTokenStore, TokenStore};

/// Command-line arguments for the imagestore server.
#[derive(Parser, Debug)]
#[command(name = "imagestore", version, about = "Per-user image store server")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "imagestore.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The logging section lives in the config file, so read it first and
    // report a missing file once the subscriber is up.
    let config_path = std::path::Path::new(&cli.config);
    let missing_config = !config_path.exists();
    let config = if missing_config {
        Config::default()
    } else {
        imagestore::config::load_config(config_path)?
    };

    init_tracing(&config.logging);
    if missing_config {
        warn!("Config file {} not found, using defaults", cli.config);
    } else {
        info!("Loaded configuration from {}", cli.config);
    }

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        imagestore::metrics::init_metrics();
        imagestore::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    // Image storage (local filesystem).
    let storage_cfg = &config.storage;
    let local = LocalImageStore::new(&storage_cfg.root_dir)?
        .with_validator(ExtensionAllowList::new(storage_cfg.allowed_extensions.clone()))
        .serialize_writes(storage_cfg.serialize_writes);
    info!(
        "Image store initialized at {} (extensions: {}, serialized writes: {})",
        storage_cfg.root_dir,
        storage_cfg.allowed_extensions.join(","),
        storage_cfg.serialize_writes
    );
    let storage: Arc<dyn ImageStore> = Arc::new(local);

    // Token store (SQLite).
    let token_path = &config.auth.database;
    if let Some(parent) = std::path::Path::new(token_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tokens: Arc<dyn TokenStore> = Arc::new(SqliteTokenStore::new(token_path)?);
    info!("Token store initialized at {}", token_path);
    if !config.auth.enabled {
        warn!("Authentication is disabled; image routes are open");
    }

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(imagestore::AppState {
        config,
        storage,
        tokens,
    });

    let app = imagestore::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("imagestore listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;

    info!("imagestore shut down");

    Ok(())
}

/// Install the global tracing subscriber.  `RUST_LOG` overrides the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
///
/// In-flight requests get `timeout` to finish before the process exits anyway.
async fn shutdown_signal(timeout: Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }

    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        tracing::warn!("Requests still in flight after {:?}, exiting", timeout);
        std::process::exit(1);
    });
}
