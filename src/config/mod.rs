//! Configuration module for Herb Finder.
//!
//! All configuration is loaded from environment variables with sensible defaults.
//! The backend reads [`Config`], the client core reads [`ClientConfig`].

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Malformed configuration value.
#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {key}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

/// Backend configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Root directory of the object store
    pub storage_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Base URL used when building public object URLs
    pub public_url: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Lifetime of issued id tokens
    pub id_token_ttl: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let db_path = env::var("HERB_DB_PATH")
            .unwrap_or_else(|_| "./data/herb.sqlite".to_string())
            .into();

        let storage_path = env::var("HERB_STORAGE_PATH")
            .unwrap_or_else(|_| "./data/storage".to_string())
            .into();

        let bind_addr: SocketAddr = parse_var("HERB_BIND_ADDR", "127.0.0.1:8080")?;

        let public_url = env::var("HERB_PUBLIC_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| format!("http://{}", bind_addr));

        let log_level = env::var("HERB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let id_token_ttl = Duration::from_secs(parse_var("HERB_ID_TOKEN_TTL_SECS", "3600")?);

        Ok(Self {
            db_path,
            storage_path,
            bind_addr,
            public_url,
            log_level,
            id_token_ttl,
        })
    }
}

/// Client core configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend API, without trailing slash
    pub api_base_url: String,
    /// Posts fetched per feed page
    pub page_size: usize,
    /// Deadline for ordinary requests (page loads, writes)
    pub request_timeout: Duration,
    /// Deadline for the analysis request
    pub analysis_timeout: Duration,
    /// Size of each upload chunk
    pub upload_chunk_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080".to_string(),
            page_size: 10,
            request_timeout: Duration::from_millis(5000),
            analysis_timeout: Duration::from_millis(30_000),
            upload_chunk_bytes: 256 * 1024,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_base_url = env::var("HERB_API_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
            .trim_end_matches('/')
            .to_string();

        let page_size: usize = parse_var("HERB_PAGE_SIZE", "10")?;
        if page_size == 0 {
            return Err(ConfigError {
                key: "HERB_PAGE_SIZE",
                value: "0".to_string(),
            });
        }

        let request_timeout = Duration::from_millis(parse_var("HERB_REQUEST_TIMEOUT_MS", "5000")?);
        let analysis_timeout =
            Duration::from_millis(parse_var("HERB_ANALYSIS_TIMEOUT_MS", "30000")?);
        let upload_chunk_bytes: usize = parse_var("HERB_UPLOAD_CHUNK_BYTES", "262144")?;

        Ok(Self {
            api_base_url,
            page_size,
            request_timeout,
            analysis_timeout,
            upload_chunk_bytes: upload_chunk_bytes.max(1),
        })
    }

    /// Build a config pointing at a specific backend.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|_| ConfigError { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        env::remove_var("HERB_DB_PATH");
        env::remove_var("HERB_STORAGE_PATH");
        env::remove_var("HERB_BIND_ADDR");
        env::remove_var("HERB_PUBLIC_URL");
        env::remove_var("HERB_LOG_LEVEL");
        env::remove_var("HERB_ID_TOKEN_TTL_SECS");

        let config = Config::from_env().unwrap();

        assert_eq!(config.db_path, PathBuf::from("./data/herb.sqlite"));
        assert_eq!(config.storage_path, PathBuf::from("./data/storage"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.public_url, "http://127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.id_token_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn test_default_client_config() {
        env::remove_var("HERB_API_BASE_URL");
        env::remove_var("HERB_PAGE_SIZE");
        env::remove_var("HERB_REQUEST_TIMEOUT_MS");
        env::remove_var("HERB_ANALYSIS_TIMEOUT_MS");
        env::remove_var("HERB_UPLOAD_CHUNK_BYTES");

        let config = ClientConfig::from_env().unwrap();

        assert_eq!(config.api_base_url, "http://127.0.0.1:8080");
        assert_eq!(config.page_size, 10);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.analysis_timeout, Duration::from_secs(30));
        assert_eq!(config.upload_chunk_bytes, 262144);
    }

    #[test]
    fn test_with_base_url_strips_trailing_slash() {
        let config = ClientConfig::with_base_url("http://localhost:9000/");
        assert_eq!(config.api_base_url, "http://localhost:9000");
        assert_eq!(config.page_size, 10);
    }

    #[test]
    fn test_config_error_message() {
        let err = ConfigError {
            key: "HERB_PAGE_SIZE",
            value: "ten".to_string(),
        };
        assert_eq!(err.to_string(), "invalid value \"ten\" for HERB_PAGE_SIZE");
    }
}
