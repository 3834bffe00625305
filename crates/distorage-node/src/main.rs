//! distorage-node: storage node daemon
//!
//! Usage:
//!   distorage-node [--config ~/.distorage/config.toml]

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use distorage_core::config::{expand_tilde, DistorageConfig};
use distorage_crypto::ClientKeys;
use distorage_node::announce::Announcer;
use distorage_node::{FsChunkStore, NodeMetrics, NodeService};

#[derive(Parser, Debug)]
#[command(name = "distorage-node", version, about = "distorage storage node")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        long,
        short = 'c',
        env = "DISTORAGE_CONFIG",
        default_value = "~/.distorage/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "DISTORAGE_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides the config file
    #[arg(long, env = "DISTORAGE_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);

    // Parse before logging is up so the file can pick the level; the
    // missing-file warning is emitted once logging is running.
    let config = DistorageConfig::load(&config_path);
    let (level, format) = match &config {
        Ok(c) => (c.node.log_level.clone(), c.node.log_format.clone()),
        Err(_) => ("info".to_string(), "text".to_string()),
    };
    let level = cli.log.clone().unwrap_or(level);
    let format = cli.log_format.clone().unwrap_or(match format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    if !config_path.exists() {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            config_path.display()
        );
    }
    let config = config.context("loading configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "distorage-node starting"
    );

    run(config).await
}

async fn run(config: DistorageConfig) -> Result<()> {
    let node = &config.node;

    let keys = load_or_create_keys(&expand_tilde(&node.keys_file))?;
    let address = keys.address();
    info!(address = %address, "node identity ready");

    let store_dir = expand_tilde(&node.store_dir);
    let store = FsChunkStore::open(&store_dir)
        .with_context(|| format!("opening chunk store {}", store_dir.display()))?;
    info!(path = %store_dir.display(), "chunk store ready");

    let mut registry = prometheus_client::registry::Registry::default();
    let metrics = NodeMetrics::register(&mut registry);
    if let Some(addr) = node.metrics_addr.clone() {
        let registry = Arc::new(registry);
        tokio::spawn(async move {
            if let Err(e) = distorage_node::metrics::serve(addr, registry).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    let service = Arc::new(
        NodeService::new(Arc::new(store), metrics)
            .with_timeout(Duration::from_secs(node.handshake_timeout_secs)),
    );

    let shutdown = CancellationToken::new();

    let announcer = if node.announce {
        let announcer = Announcer::new(
            &node.directory_url,
            address,
            Duration::from_secs(node.announce_retry_secs),
        );
        Some(tokio::spawn(announcer.run(shutdown.clone())))
    } else {
        None
    };

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        signal_token.cancel();
    });

    let listener = tokio::net::TcpListener::bind(&node.listen)
        .await
        .with_context(|| format!("binding {}", node.listen))?;
    distorage_node::server::serve(listener, service, shutdown.clone()).await?;

    if let Some(handle) = announcer {
        let _ = handle.await;
    }
    info!("distorage-node stopped");
    Ok(())
}

fn load_or_create_keys(path: &Path) -> Result<ClientKeys> {
    if path.exists() {
        return ClientKeys::load(path).with_context(|| format!("loading keys {}", path.display()));
    }
    let keys = ClientKeys::generate().context("generating node keys")?;
    keys.save(path)
        .with_context(|| format!("saving keys {}", path.display()))?;
    info!(path = %path.display(), "generated new node keys");
    Ok(keys)
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
