//! Configuration module for plsgate.
//!
//! This module provides centralized configuration loading from environment variables.
//!
//! # Example
//!
//! ```rust,ignore
//! use plsgate::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Listen address: {}", config.server.listen_addr);
//! println!("Mount path: {}", config.gateway.mount_path);
//! ```

mod error;
mod gateway;
mod logging;
mod parse;
mod server;

pub use error::ConfigError;
pub use gateway::{GatewayConfig, DEFAULT_EXCLUSIONS};
pub use logging::LoggingConfig;
pub use server::{RequestTimeout, ServerConfig, TlsConfig};

/// Complete application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Gateway configuration.
    pub gateway: GatewayConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("  Listen: {}", self.server.listen_addr);
        info!("  Mount path: {}", self.gateway.mount_path);
        info!("  Workers: {}", self.server.worker_count());
        info!("  Pool size: {}", self.gateway.pool_size);

        if !self.gateway.path_aliases.is_empty() {
            info!("  Path aliases: {}", self.gateway.path_aliases.len());
        }

        if let Some(ref table) = self.gateway.document_table {
            info!("  Document table: {}", table);
        }

        if let Some(ref func) = self.gateway.validation_function {
            info!("  Validation function: {}", func);
        }

        if self.server.tls.is_enabled() {
            info!("  TLS: enabled");
        }

        if self.server.request_timeout.is_enabled() {
            info!(
                "  Request timeout: {}s",
                self.server.request_timeout.as_secs()
            );
        } else {
            info!("  Request timeout: disabled");
        }

        if self.server.access_log {
            info!("  Access log: enabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        // Clear all env vars that might affect the test
        std::env::remove_var("LISTEN_ADDR");
        std::env::remove_var("MOUNT_PATH");
        std::env::remove_var("WORKERS");
        std::env::remove_var("PATH_ALIASES");
        std::env::remove_var("DOCUMENT_TABLE");
        std::env::remove_var("REQUEST_VALIDATION_FUNCTION");
        std::env::remove_var("EXCLUSION_PREFIXES");
        std::env::remove_var("POOL_SIZE");
        std::env::remove_var("ACCESS_LOG");

        let config = Config::from_env().expect("Should load config");

        assert_eq!(
            config.server.listen_addr,
            "0.0.0.0:8080".parse().unwrap()
        );
        assert_eq!(config.gateway.mount_path, "/pls");
        assert_eq!(config.server.workers, 0); // Auto-detect
        assert_eq!(config.gateway.pool_size, 8);
        assert!(config.gateway.path_aliases.is_empty());
        assert!(config.gateway.document_table.is_none());
        assert!(!config.server.access_log);
    }

    #[test]
    fn test_path_aliases_json() {
        std::env::set_var("PATH_ALIASES", r#"{"docs": "docs.serve_path"}"#);
        let config = GatewayConfig::from_env().expect("Should load config");
        assert_eq!(
            config.path_aliases.get("docs").map(String::as_str),
            Some("docs.serve_path")
        );
        std::env::remove_var("PATH_ALIASES");
    }
}
