//! # Warden Common
//!
//! Shared types, errors, and constants used across Warden components.
//!
//! ## Modules
//! - `types` - Core data structures (PendingChallenge, MuteRecord, Challenge, etc.)
//! - `error` - Error taxonomy shared by the gate, the store, and the platform adapter
//! - `constants` - Defaults, Redis key layout, callback tags

pub mod constants;
pub mod error;
pub mod types;

pub use error::{
    ChallengeParseError, ConfigError, GateError, ModerationError, PayloadError, PlatformError,
    StoreError,
};
pub use types::*;
