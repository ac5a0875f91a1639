//! Runtime configuration.
//!
//! Configuration is an explicit value threaded through construction rather
//! than a hidden global -- `cot/src/main.rs`'s CLI flags follow the same
//! pattern. Values default to `INTERVAL=0.01`, `WEB_INTERVAL=0.1` and can be
//! overridden from an optional TOML file.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    general: Option<RawGeneral>,
    web: Option<RawWeb>,
}

#[derive(Debug, Deserialize, Default)]
struct RawGeneral {
    interval: Option<f64>,
    state_switch_timeout: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RawWeb {
    interval: Option<f64>,
    telemetry_ring_capacity: Option<usize>,
}

/// Explicit runtime configuration, threaded through `Being`/`Scheduler`
/// construction rather than read from a process-wide singleton.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeConfig {
    /// Seconds per block-network tick.
    pub interval: f64,
    /// Seconds per telemetry sample.
    pub web_interval: f64,
    /// Ticks a state-switch job may run without observing its target state.
    pub state_switch_timeout: u32,
    /// Bound of the telemetry broker's drop-oldest ring buffer.
    pub telemetry_ring_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            interval: 0.01,
            web_interval: 0.1,
            state_switch_timeout: 50,
            telemetry_ring_capacity: 64,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any key the file omits.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = RuntimeConfig::default();
        if let Some(general) = raw.general {
            if let Some(interval) = general.interval {
                config.interval = interval;
            }
            if let Some(timeout) = general.state_switch_timeout {
                config.state_switch_timeout = timeout;
            }
        }
        if let Some(web) = raw.web {
            if let Some(interval) = web.interval {
                config.web_interval = interval;
            }
            if let Some(capacity) = web.telemetry_ring_capacity {
                config.telemetry_ring_capacity = capacity;
            }
        }
        Ok(config)
    }

    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }

    pub fn web_interval_duration(&self) -> Duration {
        Duration::from_secs_f64(self.web_interval)
    }
}
