//! distorage: client for the distorage storage network
//!
//! Commands:
//!   init [--force]              - generate the file key and signing identity
//!   upload <path>               - encrypt, chunk, and replicate a file
//!   download <id> [--out <dir>] - fetch, verify, and decrypt a file
//!   list                        - show the local file registry
//!   delete <id>                 - remove a file from every node holding it
//!   cleanup                     - retry replicas left over from earlier deletes

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use distorage_client::{
    Engine, EngineSettings, FileRegistry, HttpDirectory, ProgressFn, WsConnector,
};
use distorage_core::config::{expand_tilde, DistorageConfig};
use distorage_crypto::ClientKeys;

type ClientEngine = Engine<HttpDirectory, WsConnector>;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "distorage",
    version,
    about = "distorage client",
    long_about = "distorage: store encrypted, replicated files on a network of storage nodes"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        long,
        short = 'c',
        env = "DISTORAGE_CONFIG",
        default_value = "~/.distorage/config.toml",
        global = true
    )]
    config: PathBuf,

    /// Skip the cleanup sweep that normally runs before each command
    #[arg(long, global = true)]
    no_cleanup: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "DISTORAGE_LOG", default_value = "warn", global = true)]
    log: String,

    /// Log format
    #[arg(long, env = "DISTORAGE_LOG_FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate client keys (file key + signing identity)
    Init {
        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },

    /// Encrypt and upload a file
    Upload {
        /// Local file
        path: PathBuf,
    },

    /// Download a file by id
    Download {
        /// File id as printed by `upload` or `list`
        id: Uuid,
        /// Destination directory (default: current directory)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// List files in the local registry
    List,

    /// Delete a file from the network
    Delete {
        id: Uuid,
    },

    /// Retry deleting leftover replicas of deleted files
    Cleanup,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);

    let config_path = expand_tilde(&cli.config);
    let config = DistorageConfig::load(&config_path).context("loading configuration")?;
    let keys_path = expand_tilde(&config.client.keys_file);

    if let Commands::Init { force } = cli.command {
        return cmd_init(&keys_path, force);
    }

    let keys = ClientKeys::load(&keys_path).with_context(|| {
        format!(
            "loading keys {} (run `distorage init` first)",
            keys_path.display()
        )
    })?;
    let registry_path = expand_tilde(&config.client.registry_file);
    let mut registry = FileRegistry::open(&registry_path)
        .with_context(|| format!("opening registry {}", registry_path.display()))?;
    let engine = build_engine(&config, keys)?;

    if matches!(cli.command, Commands::Cleanup) {
        return cmd_cleanup(&engine, &mut registry).await;
    }
    if !cli.no_cleanup {
        sweep(&engine, &mut registry).await;
    }

    match cli.command {
        Commands::Upload { path } => cmd_upload(&engine, &mut registry, &path).await,
        Commands::Download { id, out } => {
            let out = out.unwrap_or_else(|| PathBuf::from("."));
            cmd_download(&engine, &registry, &id, &out).await
        }
        Commands::List => cmd_list(&registry),
        Commands::Delete { id } => cmd_delete(&engine, &mut registry, &id).await,
        Commands::Init { .. } | Commands::Cleanup => Ok(()),
    }
}

fn build_engine(config: &DistorageConfig, keys: ClientKeys) -> Result<ClientEngine> {
    let client = &config.client;
    let settings = EngineSettings::from_config(client);
    let directory = HttpDirectory::new(
        &client.directory_url,
        client.node_port,
        settings.request_timeout,
    )
    .context("building directory client")?;
    Ok(Engine::new(directory, WsConnector, keys, settings))
}

/// Opportunistic cleanup; failures are logged and never stop the command.
async fn sweep(engine: &ClientEngine, registry: &mut FileRegistry) {
    match engine.cleanup(registry).await {
        Ok(report) => debug!(
            examined = report.examined,
            removed = report.removed,
            "cleanup sweep done"
        ),
        Err(e) => warn!("cleanup sweep failed: {e}"),
    }
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn progress_callback(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |done, total, msg| {
        pb.set_length(total);
        pb.set_position(done);
        pb.set_message(msg.to_string());
    })
}

// ── `distorage init` ──────────────────────────────────────────────────────────

fn cmd_init(keys_path: &Path, force: bool) -> Result<()> {
    if keys_path.exists() && !force {
        anyhow::bail!(
            "key file already exists: {} (use --force to replace it)",
            keys_path.display()
        );
    }
    let keys = ClientKeys::generate().context("generating keys")?;
    keys.save(keys_path)
        .with_context(|| format!("writing {}", keys_path.display()))?;

    println!("Keys written to {}", keys_path.display());
    println!("  address: {}", keys.address());
    Ok(())
}

// ── `distorage upload` ────────────────────────────────────────────────────────

async fn cmd_upload(engine: &ClientEngine, registry: &mut FileRegistry, path: &Path) -> Result<()> {
    if !path.is_file() {
        anyhow::bail!("not a file: {}", path.display());
    }
    println!("Uploading {}", path.display());

    let pb = make_progress_bar("upload");
    let progress = progress_callback(&pb);
    let report = engine
        .upload(path, registry, Some(&progress))
        .await
        .with_context(|| format!("uploading {}", path.display()));
    pb.finish_and_clear();
    let report = report?;

    println!("  id:      {}", report.file_id);
    println!("  bytes:   {}", fmt_bytes(report.size));
    println!("  chunks:  {}", report.chunks);
    if !report.degraded.is_empty() {
        let wanted = engine.settings().replication_count;
        eprintln!(
            "warning: {} chunk(s) stored on fewer than {wanted} nodes",
            report.degraded.len()
        );
        for (chunk, replicas) in &report.degraded {
            eprintln!("  chunk {chunk}: {replicas} replica(s)");
        }
    }
    Ok(())
}

// ── `distorage download` ──────────────────────────────────────────────────────

async fn cmd_download(
    engine: &ClientEngine,
    registry: &FileRegistry,
    id: &Uuid,
    out: &Path,
) -> Result<()> {
    let pb = make_progress_bar("download");
    let progress = progress_callback(&pb);
    let report = engine
        .download(id, registry, out, Some(&progress))
        .await
        .with_context(|| format!("downloading {id}"));
    pb.finish_and_clear();
    let report = report?;

    println!("Downloaded:");
    println!("  local:  {}", report.path.display());
    println!("  bytes:  {}", fmt_bytes(report.bytes));
    Ok(())
}

// ── `distorage list` ──────────────────────────────────────────────────────────

fn cmd_list(registry: &FileRegistry) -> Result<()> {
    let entries = registry.read_all();
    if entries.is_empty() {
        println!("No files.");
        return Ok(());
    }
    for (id, file) in entries {
        let state = if file.available { "available" } else { "deleting" };
        println!("{id}  {}", file.name);
        println!(
            "    {state}, {}, {} chunk(s), {} replica(s)",
            fmt_bytes(file.size),
            file.chunks.len(),
            file.replica_count()
        );
    }
    Ok(())
}

// ── `distorage delete` ────────────────────────────────────────────────────────

async fn cmd_delete(engine: &ClientEngine, registry: &mut FileRegistry, id: &Uuid) -> Result<()> {
    let report = engine
        .delete(id, registry)
        .await
        .with_context(|| format!("deleting {id}"))?;
    if report.removed {
        println!("Deleted {id}");
    } else {
        println!(
            "Marked {id} deleted; {} replica(s) left for cleanup",
            report.remaining_replicas
        );
    }
    Ok(())
}

// ── `distorage cleanup` ───────────────────────────────────────────────────────

async fn cmd_cleanup(engine: &ClientEngine, registry: &mut FileRegistry) -> Result<()> {
    let report = engine.cleanup(registry).await.context("cleanup sweep")?;
    println!("Cleanup complete:");
    println!("  examined: {}", report.examined);
    println!("  removed:  {}", report.removed);
    Ok(())
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
