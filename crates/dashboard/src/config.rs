//! Dashboard configuration
//!
//! Layered: built-in defaults, then `dashboard.toml` in the working
//! directory, then `OBD_DASH__<SECTION>__<KEY>` environment variables,
//! then the port given on the command line.

use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, Environment, File};
use obd_protocol::{LinkConfig, ObdProtocol, DEFAULT_BAUD_RATE, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use telemetry_poller::PollerConfig;
use thiserror::Error;
use tracing::Level;

/// Optional configuration file (extension resolved by the `config` crate)
const CONFIG_FILE: &str = "dashboard";

/// Environment variable prefix
const ENV_PREFIX: &str = "OBD_DASH";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid protocol {0:?}, expected an ELM327 protocol number 0-9")]
    InvalidProtocol(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Serial link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Serial device, or `sim` for the built-in simulator
    pub port: String,
    pub baud_rate: u32,
    /// ELM327 protocol number
    pub protocol: String,
    pub connect_timeout_ms: u64,
    pub settle_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            protocol: "6".to_string(),
            connect_timeout_ms: 30_000,
            settle_ms: 2000,
            request_timeout_ms: 2000,
        }
    }
}

/// Poller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    pub poll_interval_ms: u64,
    pub max_consecutive_timeouts: u8,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            max_consecutive_timeouts: 3,
        }
    }
}

/// Render settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Frames per second
    pub refresh_hz: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self { refresh_hz: 30 }
    }
}

/// Complete dashboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub link: LinkSettings,
    pub poller: PollerSettings,
    pub render: RenderSettings,
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub log_level: String,
}

impl DashboardConfig {
    /// Load every layer. `port` overrides the configured serial port.
    pub fn load(port: Option<&str>) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );
        Self::from_builder(builder, port)
    }

    /// Apply the port override on top of `builder`, then deserialize and validate
    fn from_builder(
        mut builder: ConfigBuilder<DefaultState>,
        port: Option<&str>,
    ) -> Result<Self, ConfigError> {
        if let Some(port) = port {
            builder = builder.set_override("link.port", port)?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise fail at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol()?;
        self.log_level()?;
        let positive = [
            ("link.request_timeout_ms", self.link.request_timeout_ms),
            ("link.connect_timeout_ms", self.link.connect_timeout_ms),
            ("poller.poll_interval_ms", self.poller.poll_interval_ms),
            ("poller.max_consecutive_timeouts", self.poller.max_consecutive_timeouts as u64),
            ("render.refresh_hz", self.render.refresh_hz as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.link.port.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "link.port",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn protocol(&self) -> Result<ObdProtocol, ConfigError> {
        self.link
            .protocol
            .parse()
            .map_err(|_| ConfigError::InvalidProtocol(self.link.protocol.clone()))
    }

    pub fn log_level(&self) -> Result<Level, ConfigError> {
        self.log_level.parse().map_err(|_| ConfigError::InvalidValue {
            field: "log_level",
            reason: format!("unknown level {:?}", self.log_level),
        })
    }

    /// Settings for opening the link
    pub fn link_config(&self) -> Result<LinkConfig, ConfigError> {
        Ok(LinkConfig {
            port: self.link.port.clone(),
            baud_rate: self.link.baud_rate,
            protocol: self.protocol()?,
            connect_timeout: Duration::from_millis(self.link.connect_timeout_ms),
            settle: Duration::from_millis(self.link.settle_ms),
            request_timeout: Duration::from_millis(self.link.request_timeout_ms),
        })
    }

    /// Settings for the telemetry poller
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(self.poller.poll_interval_ms),
            max_consecutive_timeouts: self.poller.max_consecutive_timeouts,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            link: LinkSettings::default(),
            poller: PollerSettings::default(),
            render: RenderSettings::default(),
            log_level: "info".to_string(),
        }
    }
}
