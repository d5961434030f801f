//! Call session configuration
//!
//! Every timer and policy knob of a call lives here rather than in code.
//! Values come from [`CallConfig::default`], an optional config file, and
//! `CALLRELAY__*` environment variables, in that order of precedence.
//!
//! ```rust
//! use callrelay_session::config::CallConfig;
//! use std::time::Duration;
//!
//! let config = CallConfig::default()
//!     .with_offer_delay(Duration::from_millis(500))
//!     .with_reconnect(5, Duration::from_secs(1));
//!
//! assert_eq!(config.offer_delay(), Duration::from_millis(500));
//! assert_eq!(config.reconnect_policy().max_attempts(), 5);
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};
use crate::media::AudioConstraints;
use crate::reconnect::ReconnectPolicy;

const ENV_PREFIX: &str = "CALLRELAY";
const ENV_SEPARATOR: &str = "__";

/// Transport reconnection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    /// Attempt `n` waits `n × base_delay_ms`
    pub base_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
        }
    }
}

/// One STUN/TURN server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    [
        "stun:stun.l.google.com:19302",
        "stun:stun1.l.google.com:19302",
        "stun:stun2.l.google.com:19302",
        "stun:stun3.l.google.com:19302",
        "stun:stun4.l.google.com:19302",
    ]
    .into_iter()
    .map(IceServerConfig::stun)
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Delay before the caller sends its offer
    pub offer_delay_ms: u64,
    pub reconnect: ReconnectConfig,
    /// Upper bound on the end-of-call report to the Call Directory
    pub report_timeout_ms: u64,
    /// Pending invitations older than this are reported as missed
    pub invite_timeout_secs: u64,
    /// Display name used when the partner's profile cannot be fetched
    pub partner_placeholder_name: String,
    pub audio: AudioConstraints,
    pub ice_servers: Vec<IceServerConfig>,
    pub signaling_url: String,
    pub directory_url: String,
    /// Application-level ping interval; `None` disables it
    pub keepalive_interval_secs: Option<u64>,
    /// Upper bound on opening the signaling channel
    pub connect_timeout_ms: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            offer_delay_ms: 1000,
            reconnect: ReconnectConfig::default(),
            report_timeout_ms: 5000,
            invite_timeout_secs: 30,
            partner_placeholder_name: "Partner".to_string(),
            audio: AudioConstraints::default(),
            ice_servers: default_ice_servers(),
            signaling_url: "ws://localhost:8000".to_string(),
            directory_url: "http://localhost:8000".to_string(),
            keepalive_interval_secs: Some(25),
            connect_timeout_ms: 10_000,
        }
    }
}

impl CallConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from an optional file plus `CALLRELAY__*` environment variables
    pub fn load(path: Option<&str>) -> SessionResult<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`CallConfig::load`], reading variables from `env` instead of the process
    pub fn load_with_env(path: Option<&str>, env: Option<config::Map<String, String>>) -> SessionResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        let loaded: CallConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SessionError::config(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.reconnect.max_attempts > 0 && self.reconnect.base_delay_ms == 0 {
            return Err(SessionError::config("reconnect.base_delay_ms must be positive"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(SessionError::config("connect_timeout_ms must be positive"));
        }
        if let Some(server) = self.ice_servers.iter().find(|s| s.urls.iter().all(|u| u.is_empty())) {
            return Err(SessionError::config(format!("ICE server without URLs: {:?}", server)));
        }
        if !(self.signaling_url.starts_with("ws://") || self.signaling_url.starts_with("wss://")) {
            return Err(SessionError::config(format!(
                "signaling_url must be ws:// or wss://, got {}",
                self.signaling_url
            )));
        }
        if !(self.directory_url.starts_with("http://") || self.directory_url.starts_with("https://")) {
            return Err(SessionError::config(format!(
                "directory_url must be http:// or https://, got {}",
                self.directory_url
            )));
        }
        Ok(())
    }

    pub fn with_offer_delay(mut self, delay: Duration) -> Self {
        self.offer_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_reconnect(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.reconnect = ReconnectConfig {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
        };
        self
    }

    pub fn with_report_timeout(mut self, timeout: Duration) -> Self {
        self.report_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_invite_timeout(mut self, timeout: Duration) -> Self {
        self.invite_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_partner_placeholder(mut self, name: impl Into<String>) -> Self {
        self.partner_placeholder_name = name.into();
        self
    }

    pub fn with_ice_servers(mut self, servers: Vec<IceServerConfig>) -> Self {
        self.ice_servers = servers;
        self
    }

    pub fn with_signaling_url(mut self, url: impl Into<String>) -> Self {
        self.signaling_url = url.into();
        self
    }

    pub fn with_directory_url(mut self, url: impl Into<String>) -> Self {
        self.directory_url = url.into();
        self
    }

    pub fn with_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval_secs = interval.map(|d| d.as_secs());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn offer_delay(&self) -> Duration {
        Duration::from_millis(self.offer_delay_ms)
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.report_timeout_ms)
    }

    pub fn invite_timeout(&self) -> Duration {
        Duration::from_secs(self.invite_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive_interval_secs.map(Duration::from_secs)
    }

    /// A fresh policy for one call
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.reconnect.max_attempts,
            Duration::from_millis(self.reconnect.base_delay_ms),
        )
    }
}
