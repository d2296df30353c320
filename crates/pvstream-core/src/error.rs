// ── Core error types ──
//
// Errors surfaced by pvstream-core. Failures reported by the control
// system collaborator arrive as `ControlSystemError` and are wrapped in
// `CoreError::Upstream` before they reach a caller. `ErrorKind` gives the
// transport layer the bad-request / not-found split it needs.

use thiserror::Error;

use crate::model::{ChannelName, StorageKey, StreamId};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Invalid stream configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Stream configuration contains no channels")]
    NoChannels,

    // ── State errors ─────────────────────────────────────────────────
    #[error("Stream not found: {id}")]
    StreamNotFound { id: StreamId },

    #[error("Unbalanced interest release for {key}: no outstanding interest")]
    UnbalancedRelease { key: StorageKey },

    #[error("Stream publisher {id} is already shut down")]
    AlreadyShutdown { id: StreamId },

    #[error("Channel {channel} is not being polled")]
    NotPolling { channel: ChannelName },

    #[error("Gateway is already started")]
    AlreadyStarted,

    #[error("Gateway is shut down")]
    GatewayShutDown,

    // ── Upstream errors ──────────────────────────────────────────────
    #[error("Control system error: {0}")]
    Upstream(#[from] ControlSystemError),

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfiguration { .. } | Self::NoChannels => ErrorKind::BadRequest,
            Self::StreamNotFound { .. } => ErrorKind::NotFound,
            Self::UnbalancedRelease { .. }
            | Self::AlreadyShutdown { .. }
            | Self::NotPolling { .. }
            | Self::AlreadyStarted
            | Self::GatewayShutDown => ErrorKind::State,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Coarse classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The client sent a malformed or empty stream definition.
    BadRequest,
    /// The referenced stream does not exist.
    NotFound,
    /// Caller misuse: double release, double shutdown and the like.
    State,
    /// The control system reported a failure.
    Upstream,
    Internal,
}

// ── Control system errors ────────────────────────────────────────────

/// Failures reported by a [`ControlSystem`](crate::control::ControlSystem).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlSystemError {
    #[error("channel {channel} is not subscribed")]
    NotSubscribed { channel: ChannelName },

    #[error("channel {channel} is already subscribed")]
    AlreadySubscribed { channel: ChannelName },

    #[error("read of {channel} timed out after {timeout_ms}ms")]
    Timeout { channel: ChannelName, timeout_ms: u64 },

    #[error("channel {channel} unavailable: {reason}")]
    Unavailable { channel: ChannelName, reason: String },
}
