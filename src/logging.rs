use crate::config::{LogFormat, LogLevel, LoggingConfig};
use crate::error::ProxyError;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::io::Write;

/// Installs the global logger. `RUST_LOG`, when set, takes precedence over
/// the configured level.
pub fn init(config: &LoggingConfig) -> Result<(), ProxyError> {
    let level = config.level.clone().unwrap_or_default();
    let format = config.format.clone().unwrap_or_default();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.to_string()));

    if format == LogFormat::Json {
        builder.format(|buf, record| {
            let timestamp: DateTime<Utc> = Utc::now();
            let log_entry = json!({
                "timestamp": timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
                "level": record.level().to_string().to_lowercase(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{}", log_entry)
        });
    }

    builder
        .try_init()
        .map_err(|e| ProxyError::Config(format!("Failed to initialise logging: {}", e)))
}

pub fn parse_log_level(s: &str) -> Result<LogLevel, ProxyError> {
    match s.to_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        _ => Err(ProxyError::Config(format!(
            "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
            s
        ))),
    }
}

pub fn parse_log_format(s: &str) -> Result<LogFormat, ProxyError> {
    match s.to_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        _ => Err(ProxyError::Config(format!(
            "Invalid log format: {}. Must be one of: text, json",
            s
        ))),
    }
}
