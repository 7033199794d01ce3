//! Command-line interface for the Portico identity portal host.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use portico_api::{builtins, create_router, ServerState};
use portico_core::{ExtensionType, PluginFactoryRegistry};
use portico_runtime::RuntimePaths;
use portico_storage::{CatalogFilter, CatalogStore, EventLogStore};

/// Portico identity portal - extension runtime host.
#[derive(Parser, Debug)]
#[command(name = "portico")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Data directory for catalog, event log, and extension files.
    #[arg(long, global = true, env = "PORTICO_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the admin API server.
    Serve {
        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to bind to.
        #[arg(short, long, default_value_t = 9480)]
        port: u16,
    },
    /// Extension maintenance commands.
    Extensions {
        #[command(subcommand)]
        extensions_cmd: ExtensionsCommand,
    },
    /// Event execution log commands.
    EventLog {
        #[command(subcommand)]
        event_log_cmd: EventLogCommand,
    },
}

/// Extension subcommands.
#[derive(Subcommand, Debug)]
enum ExtensionsCommand {
    /// List installed extensions.
    List,
    /// Install an extension archive from disk.
    Install {
        /// Path to the zip archive.
        #[arg(required = true)]
        archive: PathBuf,
        /// Declared extension name (the manifest name wins if present).
        #[arg(short, long, default_value = "")]
        name: String,
        /// Extension type.
        #[arg(short = 't', long, default_value = "system")]
        extension_type: String,
    },
    /// Uninstall an extension by id or slug.
    Remove {
        #[arg(required = true)]
        extension: String,
    },
}

/// Event log subcommands.
#[derive(Subcommand, Debug)]
enum EventLogCommand {
    /// Show the most recent entries.
    Recent {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Retention job: delete entries older than the given number of days.
    Prune {
        #[arg(short, long, default_value_t = 30)]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let paths = RuntimePaths::new(&args.data_dir);

    match args.command {
        Command::Serve { host, port } => serve(paths, host, port).await,
        Command::Extensions { extensions_cmd } => extensions(paths, extensions_cmd).await,
        Command::EventLog { event_log_cmd } => event_log(paths, event_log_cmd),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // JSON logging for production/container environments.
    if std::env::var("PORTICO_LOG_JSON").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_state(paths: RuntimePaths) -> Result<ServerState> {
    let factories = Arc::new(PluginFactoryRegistry::new());
    builtins::register_builtin_factories(&factories);
    ServerState::new(paths, factories)
}

async fn serve(paths: RuntimePaths, host: String, port: u16) -> Result<()> {
    let state = build_state(paths)?;
    state.startup().await;

    let app = create_router(state.clone());
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(%addr, "portico admin API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "failed to listen for shutdown signal");
    }
}

async fn extensions(paths: RuntimePaths, command: ExtensionsCommand) -> Result<()> {
    match command {
        ExtensionsCommand::List => {
            let catalog = CatalogStore::open(paths.catalog_db())?;
            let records = catalog.find_all(&CatalogFilter::default())?;
            if records.is_empty() {
                println!("No extensions installed.");
                return Ok(());
            }
            println!(
                "{:<38} {:<24} {:<10} {:<10} {}",
                "ID", "SLUG", "VERSION", "TYPE", "ENABLED"
            );
            for record in records {
                println!(
                    "{:<38} {:<24} {:<10} {:<10} {}",
                    record.id, record.slug, record.version, record.extension_type, record.enabled
                );
            }
            Ok(())
        }
        ExtensionsCommand::Install {
            archive,
            name,
            extension_type,
        } => {
            let extension_type: ExtensionType = extension_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let bytes = std::fs::read(&archive)
                .with_context(|| format!("failed to read {}", archive.display()))?;

            let state = build_state(paths)?;
            let outcome = state
                .installer
                .install(&bytes, &name, extension_type, None)
                .await;

            if outcome.success {
                println!("{}", outcome.message);
                for warning in outcome.warnings {
                    println!("warning: {}", warning);
                }
                Ok(())
            } else {
                for error in &outcome.errors {
                    eprintln!("error: {}", error);
                }
                anyhow::bail!("{}", outcome.message)
            }
        }
        ExtensionsCommand::Remove { extension } => {
            let state = build_state(paths)?;
            let id = match state.catalog.find_by_id(&extension)? {
                Some(record) => record.id,
                None => state
                    .catalog
                    .find_by_slug(&extension)?
                    .map(|record| record.id)
                    .ok_or_else(|| anyhow::anyhow!("extension '{}' not found", extension))?,
            };
            let record = state.installer.uninstall(&id).await?;
            println!("Extension '{}' uninstalled.", record.name);
            Ok(())
        }
    }
}

fn event_log(paths: RuntimePaths, command: EventLogCommand) -> Result<()> {
    let store = EventLogStore::open(paths.event_log_db())?;
    match command {
        EventLogCommand::Recent { limit } => {
            for record in store.recent(limit)? {
                let outcome = if record.success { "ok" } else { "error" };
                println!(
                    "{} {:<32} {:<6} handlers={} {}ms {}",
                    record.created_at,
                    record.event_name,
                    outcome,
                    record.handlers_executed,
                    record.duration_ms,
                    record.error.unwrap_or_default()
                );
            }
            Ok(())
        }
        EventLogCommand::Prune { days } => {
            let cutoff = chrono::Utc::now().timestamp_millis() - days * 24 * 60 * 60 * 1000;
            let removed = store.prune_older_than(cutoff)?;
            println!("Pruned {} event log entries older than {} days.", removed, days);
            Ok(())
        }
    }
}
