//! FilterSync Server - Main entry point.
//!
//! This binary starts the reference filter backend with:
//! - Structured JSON logging
//! - Graceful shutdown handling (SIGTERM/SIGINT) that closes notification streams
//! - An optional seed file for catalogs and counts
//!
//! # Configuration
//!
//! See [`filtersync_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! # Empty registry on the default port
//! cargo run --bin filtersync-server
//!
//! # Seeded registry
//! FILTERSYNC_SEED_FILE=seed.json PORT=9000 cargo run --release --bin filtersync-server
//! ```

use std::process::ExitCode;

use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use filtersync_server::config::Config;
use filtersync_server::registry::Registry;
use filtersync_server::routes::{create_router, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                  - HTTP server port (default: 8080)");
            eprintln!("  FILTERSYNC_SEED_FILE  - JSON file with initial catalogs and counts");
            eprintln!("  RUST_LOG              - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    let registry = match &config.seed_file {
        Some(path) => match Registry::load_seed_file(path) {
            Ok(registry) => registry,
            Err(err) => {
                error!(error = %err, "Failed to load seed file");
                eprintln!("Error: {err}");
                return ExitCode::from(1);
            }
        },
        None => Registry::new(),
    };

    info!(
        port = config.port,
        apps = registry.app_count(),
        seeded = config.seed_file.is_some(),
        "FilterSync server starting"
    );

    let state = AppState::new(registry);
    let app = create_router(state.clone()).layer(TraceLayer::new_for_http());

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            info!(port = config.port, address = %bind_addr, "Server listening");
            listener
        }
        Err(err) => {
            error!(error = %err, address = %bind_addr, "Failed to bind to address");
            return ExitCode::from(1);
        }
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        state.begin_shutdown();
    });

    info!("Server ready to accept connections");

    if let Err(err) = server.await {
        error!(error = %err, "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Initialize structured logging with tracing.
///
/// JSON lines, filtered by `RUST_LOG` (default `info`).
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGTERM or SIGINT is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
