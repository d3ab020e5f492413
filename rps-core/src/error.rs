//! Domain-specific error types for the remote-play core.
//!
//! All fallible operations return `Result<T, RpsError>`.
//! Failures coming out of the external protocol engine are carried as
//! [`EngineError`] and wrapped by the variant that matches where they
//! happened (connect, start, discovery, ...).

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the remote-play core.
#[derive(Debug, Error)]
pub enum RpsError {
    // ── Precondition Errors ──────────────────────────────────────
    /// The operation cannot run with the current host state
    /// (unknown system version, missing secrets, bad PIN, ...).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A state machine was asked for a transition it does not allow.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    // ── Resource Errors ──────────────────────────────────────────
    /// The engine could not initialise a session or listener.
    #[error("connection error: {0}")]
    Connection(#[source] EngineError),

    /// The decoder or scaler could not be opened.
    #[error("video init failed: {0}")]
    VideoInit(String),

    /// The audio device could not be opened.
    #[error("audio device open failed: {0}")]
    AudioOpen(String),

    // ── Protocol Errors ──────────────────────────────────────────
    /// The engine reported a failure while starting the session.
    #[error("session start failed: {0}")]
    SessionStart(#[source] EngineError),

    /// Discovery, wake-up or registration traffic could not be sent.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// A single compressed packet could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    // ── Transient Errors ─────────────────────────────────────────
    /// A bounded wait elapsed without a terminal event.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The audio device refused a buffer.
    #[error("audio enqueue failed: {0}")]
    AudioEnqueue(String),

    // ── Persistence Errors ───────────────────────────────────────
    /// A line of the host settings file could not be applied.
    #[error("settings line {line}: {reason}")]
    Settings { line: usize, reason: String },

    /// Filesystem I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A base64 field did not decode.
    #[error("invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// A fixed-size wire record was malformed.
    #[error("encoding error: {0}")]
    Encoding(String),
}

// ── ErrorKind ─────────────────────────────────────────────────────

/// Coarse classification used by callers to decide whether to retry,
/// report, or tear down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retried or absorbed; never fatal.
    Transient,
    /// Aborted before any state change.
    Precondition,
    /// A device or engine resource was unavailable.
    Resource,
    /// The remote end or the codec misbehaved.
    Protocol,
    /// Local filesystem / persistence problem.
    Io,
}

impl RpsError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) | Self::AudioEnqueue(_) => ErrorKind::Transient,
            Self::Precondition(_) | Self::InvalidState(_) => ErrorKind::Precondition,
            Self::Connection(_) | Self::VideoInit(_) | Self::AudioOpen(_) => ErrorKind::Resource,
            Self::SessionStart(_) | Self::Engine(_) | Self::Decode(_) => ErrorKind::Protocol,
            Self::Settings { .. } | Self::Io(_) | Self::InvalidBase64(_) | Self::Encoding(_) => {
                ErrorKind::Io
            }
        }
    }

    /// Shorthand for a [`RpsError::Precondition`].
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }
}

// ── EngineError ───────────────────────────────────────────────────

/// Failure reported by the external protocol engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The engine object could not be created.
    #[error("engine init failed: {0}")]
    Init(String),

    /// A datagram or request could not be sent.
    #[error("send failed: {0}")]
    Send(String),

    /// Generic engine failure with a human-readable message.
    #[error("engine failed: {0}")]
    Failed(String),
}
