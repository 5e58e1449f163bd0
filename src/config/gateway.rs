//! Gateway protocol configuration.

use std::collections::HashMap;
use std::time::Duration;

use super::parse::{env_bool, env_opt, env_or, env_parse};
use super::ConfigError;

/// Procedure-name prefixes denied out of the box. Everything here is a
/// schema-internal package a browser has no business calling.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    "sys.",
    "dbms_",
    "utl_",
    "owa.",
    "owa_",
    "htp.",
    "htf.",
    "wpg_docload.",
];

/// Gateway configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// URL prefix under which procedures are served (default: /pls).
    pub mount_path: String,
    /// Path alias name to handler procedure, from PATH_ALIASES JSON.
    pub path_aliases: HashMap<String, String>,
    /// Table receiving uploaded files; uploads are skipped when unset.
    pub document_table: Option<String>,
    /// Boolean stored function consulted before each invocation.
    pub validation_function: Option<String>,
    /// Lowercased prefixes of procedure names to deny.
    pub exclusion_prefixes: Vec<String>,
    /// Connection pool size.
    pub pool_size: usize,
    /// How long a request waits for a pooled connection.
    pub pool_acquire_timeout: Duration,
    /// Include diagnostic detail in error responses.
    pub verbose_errors: bool,
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mount_path = normalize_mount(&env_or("MOUNT_PATH", "/pls"));

        let path_aliases = match env_opt("PATH_ALIASES") {
            Some(json) => {
                serde_json::from_str::<HashMap<String, String>>(&json).map_err(|e| {
                    ConfigError::Parse {
                        key: "PATH_ALIASES".into(),
                        value: json,
                        error: e.to_string(),
                    }
                })?
            }
            None => HashMap::new(),
        };

        let exclusion_prefixes = match env_opt("EXCLUSION_PREFIXES") {
            Some(list) => list
                .split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            None => DEFAULT_EXCLUSIONS.iter().map(|p| p.to_string()).collect(),
        };

        let acquire_secs: u64 = env_parse("POOL_ACQUIRE_TIMEOUT_SECS", 10)?;
        let pool_size: usize = env_parse("POOL_SIZE", 8)?;
        if pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "POOL_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            mount_path,
            path_aliases,
            document_table: env_opt("DOCUMENT_TABLE"),
            validation_function: env_opt("REQUEST_VALIDATION_FUNCTION"),
            exclusion_prefixes,
            pool_size,
            pool_acquire_timeout: Duration::from_secs(acquire_secs),
            verbose_errors: env_bool("VERBOSE_ERRORS", false),
        })
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mount_path: "/pls".to_string(),
            path_aliases: HashMap::new(),
            document_table: None,
            validation_function: None,
            exclusion_prefixes: DEFAULT_EXCLUSIONS.iter().map(|p| p.to_string()).collect(),
            pool_size: 8,
            pool_acquire_timeout: Duration::from_secs(10),
            verbose_errors: false,
        }
    }
}

/// Mount paths always carry a leading slash and never a trailing one.
fn normalize_mount(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/pls".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_normalization() {
        assert_eq!(normalize_mount("/pls"), "/pls");
        assert_eq!(normalize_mount("/pls/"), "/pls");
        assert_eq!(normalize_mount("apex"), "/apex");
        assert_eq!(normalize_mount(""), "/pls");
        assert_eq!(normalize_mount("/"), "/pls");
    }

    #[test]
    fn defaults_deny_internal_packages() {
        let config = GatewayConfig::default();
        assert!(config.exclusion_prefixes.contains(&"dbms_".to_string()));
        assert!(config.exclusion_prefixes.contains(&"wpg_docload.".to_string()));
        assert!(config.document_table.is_none());
        assert!(config.validation_function.is_none());
        assert_eq!(config.pool_acquire_timeout, Duration::from_secs(10));
    }
}
