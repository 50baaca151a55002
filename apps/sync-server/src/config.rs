//! Process configuration, loaded once at startup from `SYNC_*` environment
//! variables. Unknown/invalid values fail startup rather than silently
//! falling back to a default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    pub server_db_path: PathBuf,
    pub project_data_dir: PathBuf,
    pub shutdown_timeout: Duration,
    pub allow_signup: bool,
    pub base_url: String,
    pub log_format: LogFormat,
    pub log_level: String,
    pub rate_limit: sync_ratelimit::RateLimitTiers,
    pub cors_allowed_origins: Vec<String>,
    pub auth_event_retention: Duration,
    pub rate_limit_event_retention: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl AppConfig {
    /// # Errors
    ///
    /// Returns an error naming the offending variable if any `SYNC_*` value
    /// fails to parse.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            listen_addr: env_or("SYNC_LISTEN_ADDR", ":8080"),
            server_db_path: PathBuf::from(env_or("SYNC_SERVER_DB_PATH", "./data/server.db")),
            project_data_dir: PathBuf::from(env_or("SYNC_PROJECT_DATA_DIR", "./data/projects")),
            shutdown_timeout: parse_duration("SYNC_SHUTDOWN_TIMEOUT", "30s")?,
            allow_signup: parse_bool("SYNC_ALLOW_SIGNUP", true)?,
            base_url: env_or("SYNC_BASE_URL", "http://localhost:8080"),
            log_format: parse_log_format("SYNC_LOG_FORMAT")?,
            log_level: env_or("SYNC_LOG_LEVEL", "info"),
            rate_limit: sync_ratelimit::RateLimitTiers {
                auth: parse_u32("SYNC_RATE_LIMIT_AUTH", 10)?,
                push: parse_u32("SYNC_RATE_LIMIT_PUSH", 60)?,
                pull: parse_u32("SYNC_RATE_LIMIT_PULL", 120)?,
                other: parse_u32("SYNC_RATE_LIMIT_OTHER", 300)?,
            },
            cors_allowed_origins: parse_csv("SYNC_CORS_ALLOWED_ORIGINS"),
            auth_event_retention: parse_duration("SYNC_AUTH_EVENT_RETENTION", "90days")?,
            rate_limit_event_retention: parse_duration("SYNC_RATE_LIMIT_EVENT_RETENTION", "30days")?,
        })
    }

    /// Parses `listen_addr` (`:8080` or `host:port`) into a bindable socket
    /// address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not resolve to a valid
    /// `SocketAddr`.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr> {
        let addr = if let Some(port) = self.listen_addr.strip_prefix(':') {
            format!("0.0.0.0:{port}")
        } else {
            self.listen_addr.clone()
        };
        addr.parse()
            .with_context(|| format!("invalid SYNC_LISTEN_ADDR {:?}", self.listen_addr))
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_csv(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_bool(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid boolean for {key}: {raw:?}")),
    }
}

fn parse_u32(key: &str, default: u32) -> Result<u32> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid integer for {key}: {raw:?}")),
    }
}

fn parse_duration(key: &str, default: &str) -> Result<Duration> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_owned());
    humantime::parse_duration(raw.trim())
        .with_context(|| format!("invalid duration for {key}: {raw:?}"))
}

fn parse_log_format(key: &str) -> Result<LogFormat> {
    match std::env::var(key).as_deref().unwrap_or("pretty") {
        "pretty" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        other => anyhow::bail!("invalid {key}: {other:?} (expected pretty|json)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_addr_with_leading_colon_binds_all_interfaces() {
        let mut config = test_config();
        config.listen_addr = ":9090".to_owned();
        assert_eq!(config.socket_addr().unwrap().port(), 9090);
    }

    #[test]
    fn host_port_listen_addr_parses_directly() {
        let mut config = test_config();
        config.listen_addr = "127.0.0.1:9090".to_owned();
        assert_eq!(config.socket_addr().unwrap().port(), 9090);
    }

    fn test_config() -> AppConfig {
        AppConfig {
            listen_addr: ":8080".to_owned(),
            server_db_path: PathBuf::from("./data/server.db"),
            project_data_dir: PathBuf::from("./data/projects"),
            shutdown_timeout: Duration::from_secs(30),
            allow_signup: true,
            base_url: "http://localhost:8080".to_owned(),
            log_format: LogFormat::Pretty,
            log_level: "info".to_owned(),
            rate_limit: sync_ratelimit::RateLimitTiers::default(),
            cors_allowed_origins: Vec::new(),
            auth_event_retention: Duration::from_secs(60 * 60 * 24 * 90),
            rate_limit_event_retention: Duration::from_secs(60 * 60 * 24 * 30),
        }
    }
}
