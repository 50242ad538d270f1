use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use clap::Parser;
use sweeper::{
    AppState, build_app,
    config::{DEFAULT_CONFIG_PATH, SweeperConfig},
    jobs::CleanupDispatcher,
    observability,
};
use tokio_util::task::TaskTracker;

/// How long shutdown waits for in-flight cleanup runs.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// CLI arguments for the sweeper service
#[derive(Parser, Debug)]
#[command(version, about = "Batched cleanup of stale PostgreSQL rows", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the HTTP server (default)
    Serve,
    /// Load and validate the configuration file, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(&args.config).await,
        Command::CheckConfig => check_config(&args.config),
    }
}

fn load_config(path: &Path) -> Option<SweeperConfig> {
    match SweeperConfig::from_file(path) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            None
        }
    }
}

fn check_config(path: &Path) -> ExitCode {
    match load_config(path) {
        Some(_) => {
            println!("Configuration OK: {}", path.display());
            ExitCode::SUCCESS
        }
        None => ExitCode::FAILURE,
    }
}

async fn run_server(config_path: &Path) -> ExitCode {
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };

    let _tracing_guard = match observability::init_tracing(&config.observability) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    tracing::info!(
        config_file = %config_path.display(),
        timestamp_column = %config.cleanup.timestamp_column,
        default_batch_size = config.cleanup.default_batch_size,
        "Starting sweeper"
    );

    let state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            return ExitCode::FAILURE;
        }
    };

    let task_tracker = state.task_tracker.clone();
    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    let app = build_app(&config, state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "Failed to bind to address");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(task_tracker, dispatcher))
        .await;

    if let Some(db) = db {
        db.close().await;
    }

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

/// Wait for SIGINT/SIGTERM, then cancel in-flight runs and wait for them to
/// release their locks.
async fn shutdown_signal(task_tracker: TaskTracker, dispatcher: CleanupDispatcher) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling cleanup runs...");

    dispatcher.shutdown();
    task_tracker.close();

    match tokio::time::timeout(SHUTDOWN_GRACE, task_tracker.wait()).await {
        Ok(()) => tracing::info!("All cleanup runs stopped"),
        Err(_) => tracing::warn!(
            remaining = task_tracker.len(),
            "Timed out waiting for cleanup runs to stop"
        ),
    }
}
