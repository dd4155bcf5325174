//! Logger bootstrap for the fleet binaries.
//!
//! Installs a global `tracing` subscriber once, with an env-filter style
//! level string and either human-readable text or JSON output.

use std::str::FromStr;

use thiserror::Error;
use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, fmt, fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("invalid logger format: {0} (expected: text|json)")]
    InvalidFormat(String),
    #[error("invalid log level: {0}")]
    InvalidLevel(String),
    #[error("logger has already been initialized")]
    AlreadyInitialized,
    #[error("failed to initialize logger: {0}")]
    InitFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerFormat {
    Text,
    Json,
}

impl FromStr for LoggerFormat {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LoggerFormat::Text),
            "json" => Ok(LoggerFormat::Json),
            _ => Err(LoggerError::InvalidFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    pub level: String,
    pub with_targets: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
        }
    }
}

pub fn init_logger(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let filter = EnvFilter::try_new(&cfg.level)
        .map_err(|_| LoggerError::InvalidLevel(cfg.level.clone()))?;

    match cfg.format {
        LoggerFormat::Text => {
            let layer = fmt::layer()
                .with_target(cfg.with_targets)
                .with_timer(timer());
            install(tracing_subscriber::registry().with(filter).with(layer))
        }
        LoggerFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(cfg.with_targets)
                .with_timer(timer());
            install(tracing_subscriber::registry().with(filter).with(layer))
        }
    }
}

fn timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

fn install<S>(subscriber: S) -> Result<(), LoggerError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(|e| {
        let s = e.to_string();
        if s.contains("SetGlobalDefaultError") {
            LoggerError::AlreadyInitialized
        } else {
            LoggerError::InitFailed(s)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_str() {
        assert_eq!("text".parse::<LoggerFormat>().unwrap(), LoggerFormat::Text);
        assert_eq!(" JSON ".parse::<LoggerFormat>().unwrap(), LoggerFormat::Json);
        assert!("journald".parse::<LoggerFormat>().is_err());
    }

    #[test]
    fn bad_level_is_rejected() {
        let cfg = LoggerConfig {
            level: "%%invalid%%".to_string(),
            ..Default::default()
        };
        assert!(matches!(init_logger(&cfg), Err(LoggerError::InvalidLevel(_))));
    }
}
