//! # dirxfer
//!
//! Command-line client: upload and download files or whole directory trees,
//! list remote directories, and query transfer status.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use dirxfer::client::{ProgressCallback, TransferProgress, XferClient};
use dirxfer::config::Config;
use dirxfer::error::{Result, XferError};
use dirxfer::logging;

/// Concurrent folder transfer client.
#[derive(Parser)]
#[command(name = "dirxfer", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Server base URL, overriding the config file.
    #[arg(long, global = true)]
    server: Option<String>,
    /// tracing filter level, overriding the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Files transferred in parallel by folder uploads.
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file or a directory tree.
    Upload {
        local: PathBuf,
        /// Remote destination (default: the local base name).
        remote: Option<String>,
        /// Wait for the server to finish storing each file.
        #[arg(long)]
        wait: bool,
    },
    /// Download a remote file or directory tree.
    Download {
        remote: String,
        /// Local destination (default: the remote base name).
        local: Option<PathBuf>,
    },
    /// List a remote directory.
    List {
        /// Remote directory (default: the storage root).
        remote: Option<String>,
    },
    /// Show the status of a server-side transfer.
    Status {
        id: String,
        /// Poll until the transfer finishes.
        #[arg(long)]
        wait: bool,
    },
    /// Check that the server is up.
    Health,
    /// Write a default config file or print the effective one.
    Config {
        /// Write a config file with default values to this path.
        #[arg(long, conflicts_with = "show")]
        generate: Option<PathBuf>,
        /// Print the effective configuration as TOML.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.client.server_url = server;
    }
    if let Some(concurrency) = cli.concurrency {
        config.client.concurrency = concurrency;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    let dispatch = logging::build(&config.logging)?;
    tracing::dispatcher::set_global_default(dispatch)
        .map_err(|e| XferError::Config(format!("failed to install logger: {e}")))?;

    if let Command::Config { generate, show } = &cli.command {
        if let Some(path) = generate {
            Config::default().save(path)?;
            println!("Wrote default configuration to {}", path.display());
        } else if *show {
            print!("{}", config.to_toml()?);
        } else {
            return Err(XferError::InvalidRequest(
                "config needs --generate <file> or --show".into(),
            ));
        }
        return Ok(());
    }

    let mut client_config = config.client;
    if let Command::Upload { wait: true, .. } = cli.command {
        client_config.wait_for_server = true;
    }
    let client = XferClient::new(client_config)?;

    match cli.command {
        Command::Upload { local, remote, .. } => upload(&client, &local, remote).await,
        Command::Download { remote, local } => {
            let local = local.unwrap_or_else(|| default_local(&remote));
            let progress = client.download(&remote, &local, Some(progress_printer())).await?;
            finish_line(&progress, "downloaded", &local.display().to_string());
            Ok(())
        }
        Command::List { remote } => {
            let entries = client.list(remote.as_deref().unwrap_or("")).await?;
            for e in entries {
                println!(
                    "{:<4} {:>12}  {}  {}",
                    if e.is_dir { "dir" } else { "file" },
                    e.size,
                    e.mod_time.format("%Y-%m-%d %H:%M:%S"),
                    e.name
                );
            }
            Ok(())
        }
        Command::Status { id, wait } => {
            let status = if wait {
                client.wait_for(&id).await?
            } else {
                client.status(&id).await?
            };
            print_json(&serde_json::to_value(&status).map_err(|e| {
                XferError::InvalidRequest(format!("failed to render status: {e}"))
            })?);
            Ok(())
        }
        Command::Health => {
            print_json(&client.health().await?);
            Ok(())
        }
        Command::Config { .. } => Ok(()),
    }
}

async fn upload(client: &XferClient, local: &Path, remote: Option<String>) -> Result<()> {
    let meta = std::fs::metadata(local).map_err(|e| XferError::io_at("stat", local, e))?;
    let remote = remote.unwrap_or_else(|| {
        local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    if meta.is_dir() {
        let progress = client
            .upload_folder(local, &remote, Some(progress_printer()))
            .await?;
        finish_line(&progress, "uploaded", &remote);
    } else {
        let receipt = client.upload_file(local, &remote).await?;
        println!(
            "uploaded {} -> {remote} (transfer {})",
            local.display(),
            receipt.transfer_id
        );
    }
    Ok(())
}

/// Base name of the remote path, or the current directory for the root.
fn default_local(remote: &str) -> PathBuf {
    remote
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
}

/// Progress callback that redraws one status line on stderr.
fn progress_printer() -> ProgressCallback {
    Arc::new(|p: &TransferProgress| {
        let mut err = std::io::stderr().lock();
        let _ = write!(
            err,
            "\r[{:>3.0}%] {}/{} files  {}\x1b[K",
            p.fraction() * 100.0,
            p.processed_files,
            p.total_files,
            p.current_file.as_deref().unwrap_or("")
        );
        let _ = err.flush();
    })
}

fn finish_line(progress: &TransferProgress, verb: &str, target: &str) {
    eprintln!();
    println!(
        "{verb} {} files ({} bytes) -> {target}",
        progress.processed_files, progress.processed_bytes
    );
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(_) => println!("{value}"),
    }
}
