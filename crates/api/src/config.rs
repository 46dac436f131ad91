//! Application configuration loaded from environment variables.

use std::path::PathBuf;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default `"0.0.0.0"`)
/// - `PORT`: listen port (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on the in-memory store
/// - `SNAPSHOT_DIR`: directory for signed snapshots; unset keeps them in memory
/// - `PDF_RENDERER_URL`: HTML-to-PDF service; unset serves rendered HTML
/// - `SIGNING_TOKEN_TTL_DAYS`: signing link lifetime (default `7`)
/// - `DEFAULT_CURRENCY`: currency for purchases and sales (default `"KES"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub snapshot_dir: Option<PathBuf>,
    pub pdf_renderer_url: Option<String>,
    pub signing_token_ttl_days: i64,
    pub default_currency: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns the raw value of a
    /// variable if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: non_empty("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: non_empty("DATABASE_URL"),
            snapshot_dir: non_empty("SNAPSHOT_DIR").map(PathBuf::from),
            pdf_renderer_url: non_empty("PDF_RENDERER_URL"),
            signing_token_ttl_days: non_empty("SIGNING_TOKEN_TTL_DAYS")
                .and_then(|d| d.parse().ok())
                .filter(|d| *d > 0)
                .unwrap_or(defaults.signing_token_ttl_days),
            default_currency: non_empty("DEFAULT_CURRENCY")
                .map(|c| c.trim().to_uppercase())
                .unwrap_or(defaults.default_currency),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            snapshot_dir: None,
            pdf_renderer_url: None,
            signing_token_ttl_days: 7,
            default_currency: "KES".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.signing_token_ttl_days, 7);
        assert_eq!(config.default_currency, "KES");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_lookup_overrides_defaults() {
        let config = from_pairs(&[
            ("PORT", "8081"),
            ("DATABASE_URL", "postgres://localhost/rizara"),
            ("SNAPSHOT_DIR", "/var/lib/rizara/snapshots"),
            ("SIGNING_TOKEN_TTL_DAYS", "14"),
            ("DEFAULT_CURRENCY", " usd "),
        ]);
        assert_eq!(config.port, 8081);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/rizara")
        );
        assert_eq!(
            config.snapshot_dir,
            Some(PathBuf::from("/var/lib/rizara/snapshots"))
        );
        assert_eq!(config.signing_token_ttl_days, 14);
        assert_eq!(config.default_currency, "USD");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "not-a-port"),
            ("SIGNING_TOKEN_TTL_DAYS", "0"),
            ("DATABASE_URL", "  "),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.signing_token_ttl_days, 7);
        assert!(config.database_url.is_none());
    }
}
