//! FilterSync - filter resolution and live counter CLI.
//!
//! # Commands
//!
//! - `filtersync watch`: Run an engine and print every event as a JSON line
//! - `filtersync resolve`: Load a catalog once and print the resolved filter
//! - `filtersync check-env`: Wait until the backend answers its health probe
//!
//! # Environment Variables
//!
//! See the [`config`](filtersync_engine::config) module for available
//! configuration options.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use filtersync_engine::config::Config;
use filtersync_engine::engine::FilterSyncEngine;
use filtersync_engine::events::EngineEvent;
use filtersync_engine::http::{wait_until_reachable, HttpBackend};
use filtersync_engine::resolver::resolve;
use filtersync_engine::types::Selector;
use filtersync_engine::FilterCatalog;

/// Default number of health probes for `check-env`.
const DEFAULT_CHECK_RETRIES: u32 = 10;

/// Default seconds between health probes.
const DEFAULT_CHECK_DELAY_SECS: u64 = 1;

/// FilterSync - filter resolution and live counters.
#[derive(Parser, Debug)]
#[command(name = "filtersync")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    FILTERSYNC_BACKEND_URL        Backend base URL (required)
    FILTERSYNC_APP                Application context (default for --app)
    FILTERSYNC_POLL_INTERVAL_MS   Counter poll interval (default: 30000)
    FILTERSYNC_NOTIFICATIONS      Live notification counters (default: true)
    FILTERSYNC_EVENT_CAPACITY     Engine event buffer (default: 256)
    FILTERSYNC_LOAD_RETRY_LIMIT   Catalog load attempts (default: 3)

EXAMPLES:
    # Follow the counters of the 'tasks' app, starting on the 'mine' filter
    export FILTERSYNC_BACKEND_URL=http://localhost:8080
    filtersync watch --app tasks --filter-key mine

    # Show which filter index 2 resolves to
    filtersync resolve --app tasks --filter-index 2

    # Wait for the backend before running tests
    filtersync check-env --retries 20
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine and print every event as a JSON line.
    ///
    /// Stops on Ctrl+C or SIGTERM.
    Watch {
        /// Application context (defaults to FILTERSYNC_APP).
        #[arg(long)]
        app: Option<String>,

        #[command(flatten)]
        selector: SelectorArgs,
    },

    /// Load the catalog once and print the resolved filter as JSON.
    Resolve {
        /// Application context (defaults to FILTERSYNC_APP).
        #[arg(long)]
        app: Option<String>,

        #[command(flatten)]
        selector: SelectorArgs,
    },

    /// Wait until the backend answers its health probe.
    CheckEnv {
        /// Number of probes before giving up.
        #[arg(long, default_value_t = DEFAULT_CHECK_RETRIES)]
        retries: u32,

        /// Seconds between probes.
        #[arg(long, default_value_t = DEFAULT_CHECK_DELAY_SECS)]
        delay_secs: u64,
    },
}

/// Filter selection flags. Resolution tries id, key, name, index in order.
#[derive(Args, Debug, Default)]
struct SelectorArgs {
    /// Select by filter id.
    #[arg(long)]
    filter_id: Option<String>,

    /// Select by filter key.
    #[arg(long)]
    filter_key: Option<String>,

    /// Select by filter display name.
    #[arg(long)]
    filter_name: Option<String>,

    /// Select by zero-based catalog position.
    #[arg(long, allow_negative_numbers = true)]
    filter_index: Option<i64>,
}

impl From<SelectorArgs> for Selector {
    fn from(args: SelectorArgs) -> Self {
        Self {
            id: args.filter_id,
            key: args.filter_key,
            name: args.filter_name,
            index: args.filter_index,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Command::Watch { app, selector } => run_watch(app, selector.into()).await,
        Command::Resolve { app, selector } => run_resolve(app, selector.into()).await,
        Command::CheckEnv {
            retries,
            delay_secs,
        } => run_check_env(retries, Duration::from_secs(delay_secs)).await,
    }
}

/// Runs the engine until a shutdown signal arrives.
async fn run_watch(app: Option<String>, selector: Selector) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let app = pick_app(app, &config)?;
    let backend = Arc::new(HttpBackend::new(&config.backend_url).context("Invalid backend URL")?);

    let mut engine = FilterSyncEngine::new(backend.clone(), config.engine_settings());
    let printer = tokio::spawn(print_events(engine.subscribe()));

    // Held until the catalog arrives, then applied by set_context.
    engine.select(selector);
    engine
        .set_context(&app)
        .await
        .with_context(|| format!("Failed to load filters for '{app}'"))?;

    if engine.settings().notifications_enabled {
        match backend.notifications(&app).await {
            Ok(stream) => {
                engine.attach_notifications(stream);
            }
            Err(e) => warn!(error = %e, "Live notifications unavailable, relying on polling"),
        }
    } else {
        info!("Live notifications disabled");
    }

    info!(app = %app, "Watching filters, press Ctrl+C to stop");
    wait_for_shutdown().await;

    engine.dispose();
    printer.abort();
    Ok(())
}

/// Prints engine events as JSON lines until the channel closes.
async fn print_events(mut events: Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Failed to serialize event"),
            },
            Err(RecvError::Lagged(missed)) => warn!(missed, "Event printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Resolves a selector against a freshly loaded catalog.
async fn run_resolve(app: Option<String>, selector: Selector) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let app = pick_app(app, &config)?;
    let backend = HttpBackend::new(&config.backend_url).context("Invalid backend URL")?;

    let catalog = FilterCatalog::load(&backend, &app)
        .await
        .with_context(|| format!("Failed to load filters for '{app}'"))?;

    match resolve(catalog.filters(), &selector) {
        Some(filter) => {
            println!("{}", serde_json::to_string_pretty(filter)?);
            Ok(())
        }
        None => {
            eprintln!("Error: application '{app}' has no filters");
            std::process::exit(1);
        }
    }
}

/// Probes the backend health endpoint until it answers.
async fn run_check_env(retries: u32, delay: Duration) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let backend = HttpBackend::new(&config.backend_url).context("Invalid backend URL")?;

    match wait_until_reachable(&backend, retries, delay).await {
        Ok(attempts) => {
            println!("Backend {} reachable after {attempts} attempt(s)", backend.base_url());
            Ok(())
        }
        Err(e) => {
            eprintln!(
                "Error: backend {} unreachable after {retries} attempt(s): {e}",
                backend.base_url()
            );
            std::process::exit(1);
        }
    }
}

fn pick_app(app: Option<String>, config: &Config) -> Result<String> {
    app.or_else(|| config.app.clone())
        .context("No application context: pass --app or set FILTERSYNC_APP")
}

/// Initializes the tracing subscriber on stderr; stdout carries output.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
