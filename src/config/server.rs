//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::parse::{env_bool, env_opt, env_or, env_parse, parse_duration};
use super::ConfigError;

/// Request timeout configuration.
#[derive(Clone, Debug)]
pub struct RequestTimeout(pub Option<Duration>);

impl RequestTimeout {
    /// Parse duration string (e.g., "30s", "2m", "off").
    pub fn parse(s: &str) -> Self {
        match parse_duration(s) {
            Ok(d) => Self(d),
            Err(_) => Self::default(),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    #[inline]
    pub fn as_secs(&self) -> u64 {
        self.0.map(|d| d.as_secs()).unwrap_or(0)
    }

    #[inline]
    pub fn as_duration(&self) -> Option<Duration> {
        self.0
    }
}

impl Default for RequestTimeout {
    fn default() -> Self {
        Self(Some(Duration::from_secs(120))) // 2 minutes
    }
}

/// TLS configuration.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    /// Path to TLS certificate (PEM format).
    pub cert_path: Option<PathBuf>,
    /// Path to TLS private key (PEM format).
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Check if TLS is configured.
    pub fn is_enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }

    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self {
            cert_path: env_opt("TLS_CERT").map(PathBuf::from),
            key_path: env_opt("TLS_KEY").map(PathBuf::from),
        }
    }
}

/// Server configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8080).
    pub listen_addr: SocketAddr,
    /// Number of accept workers (0 = one per CPU core).
    pub workers: usize,
    /// Graceful shutdown drain timeout.
    pub drain_timeout: Duration,
    /// Request timeout.
    pub request_timeout: RequestTimeout,
    /// Whether to emit per-request access log records.
    pub access_log: bool,
    /// TLS configuration.
    pub tls: TlsConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr: SocketAddr = env_or("LISTEN_ADDR", "0.0.0.0:8080")
            .parse()
            .map_err(|e| ConfigError::Parse {
                key: "LISTEN_ADDR".into(),
                value: env_or("LISTEN_ADDR", "0.0.0.0:8080"),
                error: format!("{}", e),
            })?;

        let drain_timeout_secs: u64 = env_parse("DRAIN_TIMEOUT_SECS", 30)?;

        Ok(Self {
            listen_addr,
            workers: env_parse("WORKERS", 0)?,
            drain_timeout: Duration::from_secs(drain_timeout_secs),
            request_timeout: RequestTimeout::parse(&env_or("REQUEST_TIMEOUT", "2m")),
            access_log: env_bool("ACCESS_LOG", false),
            tls: TlsConfig::from_env(),
        })
    }

    /// Effective worker count, resolving 0 to the core count.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}
