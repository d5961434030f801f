//! Log output for the relay binary
//!
//! The level is decided in [`relay_filter`]: an explicit level wins, then
//! `RUST_LOG`, then `info`.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{SignalingError, SignalingResult};

const DEFAULT_DIRECTIVE: &str = "info";

/// Shape of emitted log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line, for log shippers
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

pub fn relay_filter(level: Option<&str>) -> SignalingResult<EnvFilter> {
    match level {
        Some(level) => {
            let level = Level::from_str(level)
                .map_err(|_| SignalingError::config(format!("Invalid log level: {}", level)))?;
            Ok(EnvFilter::new(level.as_str().to_lowercase()))
        }
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(level: Option<&str>, format: LogFormat) -> SignalingResult<()> {
    let builder = fmt::Subscriber::builder().with_env_filter(relay_filter(level)?);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| SignalingError::config(format!("failed to install logger: {}", e)))
}
