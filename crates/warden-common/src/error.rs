//! Common error types for Warden components.

use thiserror::Error;

/// Failures reported by the chat platform adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform refused the request (missing rights, user never started
    /// a conversation with the bot, message already gone, ...)
    #[error("Platform rejected request: {0}")]
    Rejected(String),

    /// Network or protocol failure talking to the platform
    #[error("Platform transport error: {0}")]
    Transport(String),
}

/// Failures reported by the persistent store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Backend connection/operation error
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A stored record could not be decoded
    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Outcomes of a gate operation that did not end in admission
#[derive(Debug, Error)]
pub enum GateError {
    /// No pending challenge for this member (already resolved or never pending)
    #[error("No pending challenge")]
    NotFound,

    /// The deadline passed before the answer arrived
    #[error("Challenge expired")]
    Expired,

    /// Wrong answer, the member may try again
    #[error("Wrong answer, {remaining} attempt(s) left")]
    Mismatch { remaining: u32 },

    /// Wrong answer and no attempts left, the member was removed
    #[error("Too many wrong answers")]
    Lockout,

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GateError {
    /// Returns true if this error is part of normal gate operation and
    /// should not be reported as a failure
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::Expired | Self::Mismatch { .. } | Self::Lockout
        )
    }
}

/// Failures of mute enforcement and moderator commands
#[derive(Debug, Error)]
pub enum ModerationError {
    /// Understood but not carried out, the text is shown to the caller
    #[error("{0}")]
    Refused(String),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Malformed inline-button callback data
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Unknown callback tag: {0}")]
    UnknownTag(String),

    #[error("Wrong field count for tag {tag}: expected {expected}, got {got}")]
    FieldCount {
        tag: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Invalid field {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Invalid challenge text
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChallengeParseError {
    #[error("Challenge contains reserved delimiter")]
    ReservedDelimiter,

    #[error("Malformed challenge: {0}")]
    Malformed(String),

    #[error("Operand out of range: {0}")]
    OutOfRange(u32),
}

/// Rejected runtime configuration change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown setting: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("Configuration owner is not running")]
    OwnerGone,

    #[error("Failed to persist configuration: {0}")]
    Persist(String),
}
