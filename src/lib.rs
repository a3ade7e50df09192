#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! dirxfer library: concurrent folder transfer over HTTP.
//!
//! This library exposes the building blocks of both binaries:
//! - `xfer`: digests, path sanitizing, the tar.gz codec, the status registry
//! - `client`: reqwest client and the bounded-concurrency dispatcher
//! - `routes`: axum handlers and the router
//! - `config`: TOML configuration for server and client
//! - `logging`: tracing subscriber construction
//! - `error`: the crate error type

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod state;
pub mod xfer;

// Re-export key types at crate root for convenience.
pub use client::{Dispatcher, TransferProgress, XferClient};
pub use config::Config;
pub use error::{Result, XferError};
pub use routes::router;
pub use state::AppState;
