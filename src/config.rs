use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Text
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<LogLevel>,
    #[serde(default)]
    pub format: Option<LogFormat>,
}

fn default_listen_addr() -> String {
    "localhost:8080".to_string()
}

fn default_upstream_proxy() -> Option<String> {
    Some("localhost:3128".to_string())
}

fn default_excluded_hosts() -> BTreeSet<String> {
    ["www.orf.at", "orf.at"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_dial_timeout() -> u64 {
    10
}

fn default_response_timeout() -> u64 {
    10
}

fn default_read_header_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_write_timeout() -> u64 {
    30
}

fn default_upstream_connect_timeout() -> u64 {
    30
}

fn default_tcp_keepalive() -> u64 {
    30
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

/// Resolved proxy configuration.
///
/// Built once at startup and shared read-only behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    // None runs the proxy in direct-only mode
    #[serde(default = "default_upstream_proxy")]
    pub upstream_proxy: Option<String>,
    // Exact host matches that bypass the upstream proxy
    #[serde(default = "default_excluded_hosts")]
    pub excluded_hosts: BTreeSet<String>,
    /// CONNECT dial timeout in seconds
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
    /// Time allowed for the outbound round trip to produce a response
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
    #[serde(default = "default_read_header_timeout")]
    pub read_header_timeout_secs: u64,
    /// Client connections without traffic for this long are closed
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Longest a response write may stay blocked on a client
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout_secs: u64,
    #[serde(default = "default_tcp_keepalive")]
    pub tcp_keepalive_secs: u64,
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_proxy: default_upstream_proxy(),
            excluded_hosts: default_excluded_hosts(),
            dial_timeout_secs: default_dial_timeout(),
            response_timeout_secs: default_response_timeout(),
            read_header_timeout_secs: default_read_header_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            write_timeout_secs: default_write_timeout(),
            upstream_connect_timeout_secs: default_upstream_connect_timeout(),
            tcp_keepalive_secs: default_tcp_keepalive(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            logging: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ProxyError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ProxyError::Config(format!("Invalid configuration file {}: {}", path, e)))
    }

    pub fn to_file(&self, path: &str) -> Result<(), ProxyError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProxyError::Config(format!("Failed to serialize configuration: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ProxyError::Config("Listen address must not be empty".to_string()));
        }

        let timeouts = [
            ("dial_timeout_secs", self.dial_timeout_secs),
            ("response_timeout_secs", self.response_timeout_secs),
            ("read_header_timeout_secs", self.read_header_timeout_secs),
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("write_timeout_secs", self.write_timeout_secs),
            ("upstream_connect_timeout_secs", self.upstream_connect_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ProxyError::Config(format!("{} must be greater than zero", name)));
            }
        }

        if let Some(upstream) = &self.upstream_proxy {
            crate::upstream::parse_proxy_url(upstream)?;
        }

        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn read_header_timeout(&self) -> Duration {
        Duration::from_secs(self.read_header_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    /// Zero disables TCP keepalive on outbound connections
    pub fn tcp_keepalive(&self) -> Option<Duration> {
        (self.tcp_keepalive_secs > 0).then(|| Duration::from_secs(self.tcp_keepalive_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr, "localhost:8080");
        assert_eq!(config.upstream_proxy.as_deref(), Some("localhost:3128"));
        assert_eq!(config.excluded_hosts.len(), 2);
        assert!(config.excluded_hosts.contains("orf.at"));
        assert!(config.excluded_hosts.contains("www.orf.at"));
        assert_eq!(config.response_timeout(), Duration::from_secs(10));
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.write_timeout(), Duration::from_secs(30));
        assert_eq!(config.pool_idle_timeout(), Duration::from_secs(90));
        assert_eq!(config.pool_max_idle_per_host, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "listen_addr": "127.0.0.1:9090", "upstream_proxy": null }"#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9090");
        assert!(config.upstream_proxy.is_none());
        assert_eq!(config.excluded_hosts, default_excluded_hosts());
        assert_eq!(config.dial_timeout_secs, 10);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.json");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.excluded_hosts.insert("intranet.local".to_string());
        config.logging = Some(LoggingConfig {
            level: Some(LogLevel::Debug),
            format: Some(LogFormat::Json),
        });
        config.to_file(path).unwrap();

        let loaded = Config::from_file(path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.listen_addr = "  ".to_string();
        assert!(matches!(config.validate(), Err(ProxyError::Config(_))));

        let mut config = Config::default();
        config.response_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.write_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.upstream_proxy = Some("socks5://127.0.0.1:1080".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_keepalive_disables_it() {
        let mut config = Config::default();
        assert_eq!(config.tcp_keepalive(), Some(Duration::from_secs(30)));
        config.tcp_keepalive_secs = 0;
        assert_eq!(config.tcp_keepalive(), None);
    }
}
