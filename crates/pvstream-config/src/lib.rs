//! Configuration for the pvstream gateway.
//!
//! A TOML file layered under `PVSTREAM_` environment variables, and its
//! translation to `pvstream_core::GatewayConfig`. Core never reads files;
//! binaries load a [`Config`] here and hand the validated result in.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pvstream_core::{ChannelProperties, DataAcquisitionMode, GatewayConfig, StreamProperties};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Buffers, release timing and worker pool.
    #[serde(default)]
    pub gateway: GatewaySection,

    /// Defaults for stream configurations that leave properties out.
    #[serde(default)]
    pub stream: StreamDefaults,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewaySection {
    pub monitored_buffer_capacity: usize,
    pub polled_buffer_capacity: usize,
    /// Seconds between interest reaching zero and upstream teardown.
    pub release_interval_secs: u64,
    pub release_sweep_period_ms: u64,
    pub notification_workers: usize,
    pub poll_timeout_ms: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            monitored_buffer_capacity: 3,
            polled_buffer_capacity: 3,
            release_interval_secs: 30,
            release_sweep_period_ms: 1000,
            notification_workers: 100,
            poll_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamDefaults {
    pub heartbeat_ms: u64,
    pub changed_value_ms: u64,
    pub polled_value_ms: u64,
    pub polling_interval_ms: u64,
    pub precision: u32,
    /// "monitor", "poll" or "poll-and-monitor".
    pub daq_mode: String,
}

impl Default for StreamDefaults {
    fn default() -> Self {
        Self {
            heartbeat_ms: 15_000,
            changed_value_ms: 100,
            polled_value_ms: 1000,
            polling_interval_ms: 1000,
            precision: 6,
            daq_mode: "monitor".into(),
        }
    }
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Validate and convert to the runtime configuration.
    pub fn to_gateway_config(&self) -> Result<GatewayConfig, ConfigError> {
        let g = &self.gateway;
        let s = &self.stream;

        let daq_mode = s.daq_mode.parse::<DataAcquisitionMode>().map_err(|_| {
            invalid(
                "stream.daq_mode",
                format!("expected 'monitor', 'poll', or 'poll-and-monitor', got '{}'", s.daq_mode),
            )
        })?;

        Ok(GatewayConfig {
            monitored_buffer_capacity: at_least_one("gateway.monitored_buffer_capacity", g.monitored_buffer_capacity)?,
            polled_buffer_capacity: at_least_one("gateway.polled_buffer_capacity", g.polled_buffer_capacity)?,
            release_interval: Duration::from_secs(nonzero("gateway.release_interval_secs", g.release_interval_secs)?),
            release_sweep_period: millis("gateway.release_sweep_period_ms", g.release_sweep_period_ms)?,
            notification_workers: at_least_one("gateway.notification_workers", g.notification_workers)?,
            poll_timeout: millis("gateway.poll_timeout_ms", g.poll_timeout_ms)?,
            stream_defaults: StreamProperties {
                heartbeat_interval: millis("stream.heartbeat_ms", s.heartbeat_ms)?,
                changed_value_interval: millis("stream.changed_value_ms", s.changed_value_ms)?,
                polled_value_interval: millis("stream.polled_value_ms", s.polled_value_ms)?,
            },
            channel_defaults: ChannelProperties {
                daq_mode,
                polling_interval: millis("stream.polling_interval_ms", s.polling_interval_ms)?,
                precision: s.precision,
                ..ChannelProperties::default()
            },
        })
    }
}

fn at_least_one(field: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(invalid(field, "must be at least 1"));
    }
    Ok(value)
}

fn nonzero(field: &str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(value)
}

fn millis(field: &str, value: u64) -> Result<Duration, ConfigError> {
    nonzero(field, value).map(Duration::from_millis)
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "pvstream", "pvstream").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("pvstream");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the file at `path`, then `PVSTREAM_` environment
/// variables (`PVSTREAM_GATEWAY__NOTIFICATION_WORKERS=8`).
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("PVSTREAM_").split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment. A missing file is not
/// an error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment(path).extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
