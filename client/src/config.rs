//! Configuration management for the sync client.

use ledgersync_engine::QueuePolicy;
use std::env;
use std::time::Duration;
use url::Url;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the local SQLite database file
    pub database_path: String,
    /// Base URL of the sync server API
    pub api_base_url: Url,
    /// Bearer token for API and websocket auth
    pub api_token: String,
    /// Websocket endpoint; derived from the API URL when unset
    pub ws_url: Url,
    /// Interval between scheduled syncs
    pub sync_interval: Duration,
    /// Minimum gap between non-forced syncs
    pub min_sync_gap: Duration,
    /// Trailing window for the voucher pull phase, in days
    pub voucher_window_days: i64,
    /// Page size for pull requests
    pub page_size: u32,
    /// Queue bounds and retry policy
    pub queue_max_size: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_path =
            env::var("LEDGERSYNC_DB_PATH").unwrap_or_else(|_| "ledgersync.db".to_string());

        let api_base_url: Url = env::var("LEDGERSYNC_API_URL")
            .map_err(|_| ConfigError::MissingApiUrl)?
            .parse()
            .map_err(|_| ConfigError::InvalidUrl("LEDGERSYNC_API_URL"))?;

        let api_token = env::var("LEDGERSYNC_API_TOKEN").map_err(|_| ConfigError::MissingToken)?;

        let ws_url = match env::var("LEDGERSYNC_WS_URL") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidUrl("LEDGERSYNC_WS_URL"))?,
            Err(_) => derive_ws_url(&api_base_url)?,
        };

        let sync_interval = Duration::from_secs(parse_or(
            "LEDGERSYNC_SYNC_INTERVAL_SECS",
            300,
            ConfigError::InvalidNumber("LEDGERSYNC_SYNC_INTERVAL_SECS"),
        )?);

        let min_sync_gap = Duration::from_secs(parse_or(
            "LEDGERSYNC_MIN_SYNC_GAP_SECS",
            60,
            ConfigError::InvalidNumber("LEDGERSYNC_MIN_SYNC_GAP_SECS"),
        )?);

        let voucher_window_days = parse_or(
            "LEDGERSYNC_VOUCHER_WINDOW_DAYS",
            30,
            ConfigError::InvalidNumber("LEDGERSYNC_VOUCHER_WINDOW_DAYS"),
        )?;

        let page_size = parse_or(
            "LEDGERSYNC_PAGE_SIZE",
            100,
            ConfigError::InvalidNumber("LEDGERSYNC_PAGE_SIZE"),
        )?;

        let queue_max_size = parse_or(
            "LEDGERSYNC_QUEUE_MAX_SIZE",
            10_000,
            ConfigError::InvalidNumber("LEDGERSYNC_QUEUE_MAX_SIZE"),
        )?;

        let max_retries = parse_or(
            "LEDGERSYNC_MAX_RETRIES",
            3,
            ConfigError::InvalidNumber("LEDGERSYNC_MAX_RETRIES"),
        )?;

        let retry_base_delay = Duration::from_secs(parse_or(
            "LEDGERSYNC_RETRY_DELAY_SECS",
            5,
            ConfigError::InvalidNumber("LEDGERSYNC_RETRY_DELAY_SECS"),
        )?);

        Ok(Self {
            database_path,
            api_base_url,
            api_token,
            ws_url,
            sync_interval,
            min_sync_gap,
            voucher_window_days,
            page_size,
            queue_max_size,
            max_retries,
            retry_base_delay,
        })
    }

    pub fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            max_size: self.queue_max_size,
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &str,
    default: T,
    err: ConfigError,
) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| err),
        Err(_) => Ok(default),
    }
}

/// `https://api.example.com/v1` becomes `wss://api.example.com/v1/ws`.
fn derive_ws_url(api: &Url) -> Result<Url, ConfigError> {
    let mut ws = api.clone();
    let scheme = match api.scheme() {
        "https" => "wss",
        "http" => "ws",
        _ => return Err(ConfigError::InvalidUrl("LEDGERSYNC_API_URL")),
    };
    ws.set_scheme(scheme)
        .map_err(|_| ConfigError::InvalidUrl("LEDGERSYNC_API_URL"))?;
    ws.path_segments_mut()
        .map_err(|_| ConfigError::InvalidUrl("LEDGERSYNC_API_URL"))?
        .pop_if_empty()
        .push("ws");
    Ok(ws)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("LEDGERSYNC_API_URL environment variable is required")]
    MissingApiUrl,

    #[error("LEDGERSYNC_API_TOKEN environment variable is required")]
    MissingToken,

    #[error("invalid URL in {0}")]
    InvalidUrl(&'static str),

    #[error("invalid numeric value in {0}")]
    InvalidNumber(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_derivation() {
        let api: Url = "https://api.example.com/v1".parse().unwrap();
        assert_eq!(derive_ws_url(&api).unwrap().as_str(), "wss://api.example.com/v1/ws");

        let api: Url = "http://localhost:3000".parse().unwrap();
        assert_eq!(derive_ws_url(&api).unwrap().as_str(), "ws://localhost:3000/ws");
    }

    #[test]
    fn ws_url_rejects_non_http_schemes() {
        let api: Url = "ftp://example.com".parse().unwrap();
        assert!(derive_ws_url(&api).is_err());
    }
}
