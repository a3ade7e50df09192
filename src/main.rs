//! # dirxferd
//!
//! HTTP server for concurrent folder transfer.
//!
//! ## API surface
//!
//! | Method | Path                  | Description                                   |
//! |--------|-----------------------|-----------------------------------------------|
//! | GET    | `/api/health`         | Liveness probe                                |
//! | POST   | `/api/upload`         | Multipart upload, processed asynchronously    |
//! | GET    | `/api/download?path=` | File as octet-stream, directory as tar.gz     |
//! | GET    | `/api/status/{id}`    | Status of an upload or directory download     |
//! | GET    | `/api/list?path=`     | Directory listing                             |
//!
//! All paths are relative to `server.storage_path`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use dirxfer::config::{Config, ServerConfig};
use dirxfer::error::{Result, XferError};
use dirxfer::{logging, router, AppState};

/// Concurrent folder transfer server.
#[derive(Parser)]
#[command(name = "dirxferd", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Socket address to bind, overriding the config file.
    #[arg(long)]
    listen: Option<String>,
    /// Storage directory, overriding the config file.
    #[arg(long)]
    storage: Option<String>,
    /// tracing filter level, overriding the config file.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("dirxferd: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(storage) = cli.storage {
        config.server.storage_path = storage;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let installed = logging::build(&config.logging).and_then(|dispatch| {
        tracing::dispatcher::set_global_default(dispatch)
            .map_err(|e| XferError::Config(format!("failed to install logger: {e}")))
    });
    if let Err(e) = installed {
        eprintln!("dirxferd: {e}");
        return ExitCode::FAILURE;
    }

    match run_server(config.server).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: ServerConfig) -> Result<()> {
    info!("dirxferd v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Storage: {}", config.storage_path);
    info!("Listening on {}", config.listen);

    tokio::fs::create_dir_all(&config.storage_path)
        .await
        .map_err(|e| XferError::io(format!("failed to create storage {}", config.storage_path), e))?;

    let sweep_interval = config.sweep_interval();
    let state = AppState::new(config);
    let app = router(state.clone());

    let listener = TcpListener::bind(&state.config.listen)
        .await
        .map_err(|e| XferError::io(format!("failed to bind {}", state.config.listen), e))?;

    info!("Server ready");

    // Periodic sweep: evict finished transfer statuses
    let registry = state.registry.clone();
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            registry.sweep().await;
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| XferError::io("server error", e))?;

    info!("Shutting down...");
    sweep_task.abort();
    info!("Goodbye");
    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
