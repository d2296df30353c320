//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use pvstream_config::ConfigError;
use pvstream_core::{CoreError, ErrorKind};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UPSTREAM: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Streams ──────────────────────────────────────────────────────

    #[error("Invalid stream definition: {reason}")]
    #[diagnostic(
        code(pvstream::invalid_stream),
        help(
            "A stream definition is a JSON object with a non-empty channel list, e.g.\n\
             {{\"channels\": [{{\"name\": \"abc\"}}]}}"
        )
    )]
    InvalidStream { reason: String },

    #[error("Stream {id} not found")]
    #[diagnostic(code(pvstream::stream_not_found))]
    StreamNotFound { id: String },

    #[error("Control system error: {message}")]
    #[diagnostic(code(pvstream::upstream))]
    Upstream { message: String },

    #[error("Gateway error: {message}")]
    #[diagnostic(code(pvstream::gateway))]
    Gateway { message: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(
        code(pvstream::validation),
        help("Fix the value in your config file or the matching PVSTREAM_ environment variable.")
    )]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(pvstream::config))]
    Config(Box<figment::Error>),

    #[error("Failed to serialize configuration: {0}")]
    #[diagnostic(code(pvstream::serialize))]
    Serialization(#[from] toml::ser::Error),

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not encode event: {0}")]
    #[diagnostic(code(pvstream::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidStream { .. } => exit_code::USAGE,
            Self::Validation { .. } | Self::Config(_) | Self::Serialization(_) => exit_code::CONFIG,
            Self::StreamNotFound { .. } => exit_code::NOT_FOUND,
            Self::Upstream { .. } => exit_code::UPSTREAM,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match (err.kind(), err) {
            (_, CoreError::StreamNotFound { id }) => Self::StreamNotFound { id: id.to_string() },
            (ErrorKind::BadRequest, err) => Self::InvalidStream {
                reason: err.to_string(),
            },
            (ErrorKind::Upstream, err) => Self::Upstream {
                message: err.to_string(),
            },
            (_, err) => Self::Gateway {
                message: err.to_string(),
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Figment(e) => Self::Config(e),
            ConfigError::Serialization(e) => Self::Serialization(e),
            ConfigError::Io(e) => Self::Io(e),
        }
    }
}
