//! plsgate - Async PL/SQL web gateway powered by Rust and Tokio.
//!
//! This crate serves stored database procedures over HTTP: a request
//! under the mount path names a procedure, its parameters become typed
//! bindings, and the page the procedure writes into its output buffer
//! comes back as the HTTP response. It supports HTTP/1.1, HTTP/2, and
//! HTTPS with TLS 1.3.
//!
//! # Features
//!
//! - **Async I/O**: Built on Tokio for high-performance async networking
//! - **Three invocation modes**: fixed-argument, `!` variable-argument,
//!   and configured path aliases
//! - **File transfer**: multipart uploads into a document table and
//!   BLOB downloads out of one
//! - **Access Logging**: Structured JSON logging with tracing
//!
//! # Architecture
//!
//! The engine talks to the database through the pluggable
//! [`db::ConnectionPool`] trait:
//!
//! - `StubPool` - Canned responses for tests and benchmarking
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use plsgate::config::Config;
//! use plsgate::db::StubPool;
//! use plsgate::server::Server;
//!
//! let config = Config::from_env()?;
//! let pool = Arc::new(StubPool::new(config.gateway.pool_size));
//! let server = Server::new(config.server, config.gateway, pool)?;
//! server.run().await?;
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod config;
pub mod core;
pub mod db;
pub mod engine;
pub mod logging;
pub mod server;

// Re-exports for convenience
pub use config::Config;
pub use engine::{Gateway, GatewayError};
pub use server::Server;
