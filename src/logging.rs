//! Tracing subscriber construction.
//!
//! [`build`] turns a [`LoggingConfig`] into a [`Dispatch`] without installing
//! it. Binaries call `tracing::dispatcher::set_global_default` once at
//! startup; tests use `tracing::dispatcher::with_default`. Library code only
//! emits events.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing::Dispatch;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Result, XferError};

/// Build a dispatcher from `config`. `RUST_LOG`, when set, replaces the level.
pub fn build(config: &LoggingConfig) -> Result<Dispatch> {
    build_with_env(config, std::env::var("RUST_LOG").ok().as_deref())
}

fn build_with_env(config: &LoggingConfig, env_filter: Option<&str>) -> Result<Dispatch> {
    let filter = filter(&config.level, env_filter)?;
    let (writer, ansi) = writer(&config.sink)?;

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Text => fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(layer).with(filter);
    Ok(Dispatch::new(subscriber))
}

fn filter(level: &str, env_filter: Option<&str>) -> Result<EnvFilter> {
    let directive = env_filter.filter(|s| !s.trim().is_empty()).unwrap_or(level);
    EnvFilter::try_new(directive)
        .map_err(|e| XferError::Config(format!("invalid log filter {directive:?}: {e}")))
}

/// Resolve the sink name; ANSI colors only for terminals.
fn writer(sink: &str) -> Result<(BoxMakeWriter, bool)> {
    match sink {
        "" | "stderr" => Ok((BoxMakeWriter::new(std::io::stderr), true)),
        "stdout" => Ok((BoxMakeWriter::new(std::io::stdout), true)),
        path => {
            let path = Path::new(path);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| XferError::io_at("open log file", path, e))?;
            Ok((BoxMakeWriter::new(Arc::new(file)), false))
        }
    }
}
