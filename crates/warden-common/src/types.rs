//! Core types shared across Warden components.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{callback_tags::DELIMITER, MAX_OPERAND};
use crate::error::ChallengeParseError;

/// Platform user identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Chat identifier of the private conversation between this user and the bot
    pub fn private_chat(self) -> ChatId {
        ChatId(self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Platform chat identifier (groups are negative on Telegram)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message the bot can later edit or delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i32,
}

impl MessageRef {
    pub fn new(chat_id: ChatId, message_id: i32) -> Self {
        Self { chat_id, message_id }
    }
}

/// The member an event is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: UserId,
    /// Full display name
    pub name: String,
    pub username: Option<String>,
    pub is_bot: bool,
}

impl Member {
    /// Plain-text mention: `@username` when available, else the display name
    pub fn mention(&self) -> String {
        match &self.username {
            Some(username) => format!("@{username}"),
            None => self.name.clone(),
        }
    }
}

/// Addition puzzle. The text form `"{lhs}+{rhs}"` is all that is needed to
/// recompute the answer, so verification never depends on generator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Challenge {
    lhs: u8,
    rhs: u8,
}

impl Challenge {
    /// Create a challenge, both operands must be in `1..=MAX_OPERAND`
    pub fn new(lhs: u8, rhs: u8) -> Result<Self, ChallengeParseError> {
        for operand in [lhs, rhs] {
            if operand == 0 || operand > MAX_OPERAND {
                return Err(ChallengeParseError::OutOfRange(operand as u32));
            }
        }
        Ok(Self { lhs, rhs })
    }

    /// Create a challenge, pulling out-of-range operands into `1..=MAX_OPERAND`
    pub fn clamped(lhs: u8, rhs: u8) -> Self {
        Self {
            lhs: lhs.clamp(1, MAX_OPERAND),
            rhs: rhs.clamp(1, MAX_OPERAND),
        }
    }

    /// The unique correct answer
    pub fn answer(&self) -> i64 {
        self.lhs as i64 + self.rhs as i64
    }

    /// Human-readable problem, e.g. `7 + 5 = ?`
    pub fn question(&self) -> String {
        format!("{} + {} = ?", self.lhs, self.rhs)
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.lhs, self.rhs)
    }
}

impl FromStr for Challenge {
    type Err = ChallengeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(DELIMITER) {
            return Err(ChallengeParseError::ReservedDelimiter);
        }

        let (lhs, rhs) = s
            .split_once('+')
            .ok_or_else(|| ChallengeParseError::Malformed(s.to_string()))?;

        let lhs = parse_operand(lhs)?;
        let rhs = parse_operand(rhs)?;
        Self::new(lhs, rhs)
    }
}

fn parse_operand(s: &str) -> Result<u8, ChallengeParseError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ChallengeParseError::Malformed(s.to_string()));
    }

    let value: u32 = s
        .parse()
        .map_err(|_| ChallengeParseError::Malformed(s.to_string()))?;

    if value == 0 || value > MAX_OPERAND as u32 {
        return Err(ChallengeParseError::OutOfRange(value));
    }

    Ok(value as u8)
}

impl TryFrom<String> for Challenge {
    type Error = ChallengeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Challenge> for String {
    fn from(value: Challenge) -> Self {
        value.to_string()
    }
}

/// A member mid-verification. At most one exists per (user, chat).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChallenge {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub challenge: Challenge,
    /// The challenge is invalid after this instant
    pub expires_at: DateTime<Utc>,
    /// Wrong answers submitted so far
    pub attempts: u32,
    /// Mode the challenge was issued under, which decides how answers arrive
    #[serde(default)]
    pub mode: DeliveryMode,
    /// Bot-sent prompt to clean up on resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<MessageRef>,
    /// Display name for notices posted without an inbound user object
    pub member_name: String,
}

impl PendingChallenge {
    pub fn new(
        chat_id: ChatId,
        member: &Member,
        challenge: Challenge,
        expires_at: DateTime<Utc>,
        mode: DeliveryMode,
    ) -> Self {
        Self {
            user_id: member.id,
            chat_id,
            challenge,
            expires_at,
            attempts: 0,
            mode,
            prompt: None,
            member_name: member.mention(),
        }
    }

    /// Strictly after the deadline
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn remaining_attempts(&self, max_attempts: u32) -> u32 {
        max_attempts.saturating_sub(self.attempts)
    }
}

/// Timed restriction preventing a member from posting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteRecord {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub until: DateTime<Utc>,
}

impl MuteRecord {
    /// Muted strictly before `until`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.until
    }
}

/// Send rights applied to a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionSet {
    /// Cannot send anything (muted, or waiting for a private challenge)
    Silenced,
    /// Plain text only (waiting for an in-chat challenge)
    TextOnly,
    /// Regular member rights
    Member,
}

/// Channel used to present the challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Private message with inline buttons
    #[default]
    Private,
    /// Plain-text answer in the group itself
    InChat,
}

impl DeliveryMode {
    /// Restriction applied while the challenge is pending
    pub fn pending_permissions(self) -> PermissionSet {
        match self {
            Self::Private => PermissionSet::Silenced,
            Self::InChat => PermissionSet::TextOnly,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::InChat => "in_chat",
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private" | "dm" => Ok(Self::Private),
            "in_chat" | "inchat" | "chat" => Ok(Self::InChat),
            other => Err(format!("expected private or in_chat, got {other}")),
        }
    }
}

/// Why a member was removed by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// No correct answer before the deadline
    Timeout,
    /// Attempts exhausted
    Lockout,
    /// The challenge could not be delivered privately
    Undeliverable,
}

impl RemovalReason {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Timeout => "did not solve the captcha in time",
            Self::Lockout => "gave too many wrong captcha answers",
            Self::Undeliverable => "could not be sent the captcha privately",
        }
    }
}

/// Gate result published to downstream listeners (audit log, stats)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub kind: OutcomeKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeKind {
    Challenged { mode: DeliveryMode },
    Admitted { wrong_attempts: u32 },
    Removed { reason: RemovalReason },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_text_form() {
        let challenge = Challenge::new(7, 5).unwrap();
        assert_eq!(challenge.to_string(), "7+5");
        assert_eq!(challenge.answer(), 12);
        assert_eq!("7+5".parse::<Challenge>().unwrap(), challenge);
        assert_eq!(challenge.question(), "7 + 5 = ?");
    }

    #[test]
    fn test_challenge_rejects_delimiter_and_garbage() {
        assert_eq!(
            "7:+5".parse::<Challenge>(),
            Err(ChallengeParseError::ReservedDelimiter)
        );
        assert!(matches!(
            "7+5+1".parse::<Challenge>(),
            Err(ChallengeParseError::Malformed(_))
        ));
        assert!(matches!(
            " 7+5".parse::<Challenge>(),
            Err(ChallengeParseError::Malformed(_))
        ));
        assert!(matches!(
            "-7+5".parse::<Challenge>(),
            Err(ChallengeParseError::Malformed(_))
        ));
        assert_eq!(
            "0+5".parse::<Challenge>(),
            Err(ChallengeParseError::OutOfRange(0))
        );
        assert_eq!(
            "21+5".parse::<Challenge>(),
            Err(ChallengeParseError::OutOfRange(21))
        );
    }

    #[test]
    fn test_challenge_serde_as_string() {
        let challenge = Challenge::new(3, 4).unwrap();
        let json = serde_json::to_string(&challenge).unwrap();
        assert_eq!(json, "\"3+4\"");
        let back: Challenge = serde_json::from_str(&json).unwrap();
        assert_eq!(back, challenge);
        assert!(serde_json::from_str::<Challenge>("\"3:4\"").is_err());
    }

    #[test]
    fn test_member_mention() {
        let mut member = Member {
            id: UserId(1),
            name: "Ada Lovelace".into(),
            username: Some("ada".into()),
            is_bot: false,
        };
        assert_eq!(member.mention(), "@ada");
        member.username = None;
        assert_eq!(member.mention(), "Ada Lovelace");
    }

    #[test]
    fn test_mute_window_is_half_open() {
        let until = Utc::now();
        let record = MuteRecord {
            user_id: UserId(1),
            chat_id: ChatId(-100),
            until,
        };
        assert!(record.is_active_at(until - chrono::Duration::seconds(1)));
        assert!(!record.is_active_at(until));
    }

    #[test]
    fn test_delivery_mode_parse() {
        assert_eq!("private".parse::<DeliveryMode>(), Ok(DeliveryMode::Private));
        assert_eq!("IN_CHAT".parse::<DeliveryMode>(), Ok(DeliveryMode::InChat));
        assert!("carrier-pigeon".parse::<DeliveryMode>().is_err());
    }
}
