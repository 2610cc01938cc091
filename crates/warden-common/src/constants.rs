//! Shared constants for Warden components.

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default health/status HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8899";

/// Default challenge validity (5 minutes)
pub const DEFAULT_CHALLENGE_TIMEOUT_SECS: u64 = 300;

/// Wrong answers allowed before lockout
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Largest operand of an addition challenge
pub const MAX_OPERAND: u8 = 20;

/// Extra lifetime of a pending record in Redis past its deadline, so that
/// records orphaned by a crash eventually vanish on their own.
pub const PENDING_GRACE_SECS: i64 = 3600;

/// Delay between a deadline and the timer that enforces it. Covers drift
/// between the monotonic timer and the wall clock.
pub const TIMER_GRACE_MILLIS: u64 = 500;

/// Upper bound for a single mute (7 days)
pub const MAX_MUTE_HOURS: u32 = 24 * 7;

/// Redis key prefixes
pub mod redis_keys {
    /// Pending challenge hash: warden:pending:{chat_id}:{user_id}
    pub const PENDING_PREFIX: &str = "warden:pending:";

    /// Set of "{chat_id}:{user_id}" members with a pending challenge
    pub const PENDING_INDEX: &str = "warden:pending";

    /// Mute deadline: warden:mute:{chat_id}:{user_id}
    pub const MUTE_PREFIX: &str = "warden:mute:";

    /// Set of "{chat_id}:{user_id}" members with a mute record
    pub const MUTE_INDEX: &str = "warden:mutes";
}

/// Callback payload tags
pub mod callback_tags {
    /// Expand the answer keyboard
    pub const REVEAL: &str = "r";

    /// Submit one of the offered answers
    pub const ANSWER: &str = "a";

    /// Field delimiter inside a payload
    pub const DELIMITER: char = ':';
}
