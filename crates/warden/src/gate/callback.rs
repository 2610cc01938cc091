//! Inline button payloads.
//!
//! `r:{chat}:{challenge}` reveals the answer keyboard, and
//! `a:{chat}:{challenge}:{value}` submits one of the offered answers. The
//! chat id is carried because the buttons live in a private chat.

use std::fmt;
use std::str::FromStr;

use warden_common::constants::callback_tags::{ANSWER, DELIMITER, REVEAL};
use warden_common::{Challenge, ChatId, PayloadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPayload {
    Reveal {
        chat: ChatId,
        challenge: Challenge,
    },
    Answer {
        chat: ChatId,
        challenge: Challenge,
        value: i64,
    },
}

impl fmt::Display for CallbackPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reveal { chat, challenge } => {
                write!(f, "{REVEAL}{DELIMITER}{chat}{DELIMITER}{challenge}")
            }
            Self::Answer {
                chat,
                challenge,
                value,
            } => write!(
                f,
                "{ANSWER}{DELIMITER}{chat}{DELIMITER}{challenge}{DELIMITER}{value}"
            ),
        }
    }
}

fn expect_fields(tag: &'static str, fields: &[&str], expected: usize) -> Result<(), PayloadError> {
    if fields.len() != expected {
        return Err(PayloadError::FieldCount {
            tag,
            expected,
            got: fields.len(),
        });
    }
    Ok(())
}

fn parse_chat(value: &str) -> Result<ChatId, PayloadError> {
    value
        .parse()
        .map(ChatId)
        .map_err(|_| PayloadError::InvalidField {
            field: "chat",
            value: value.to_string(),
        })
}

fn parse_challenge(value: &str) -> Result<Challenge, PayloadError> {
    value.parse().map_err(|_| PayloadError::InvalidField {
        field: "challenge",
        value: value.to_string(),
    })
}

impl FromStr for CallbackPayload {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(DELIMITER);
        let tag = parts.next().unwrap_or_default();
        let fields: Vec<&str> = parts.collect();

        match tag {
            REVEAL => {
                expect_fields(REVEAL, &fields, 2)?;
                Ok(Self::Reveal {
                    chat: parse_chat(fields[0])?,
                    challenge: parse_challenge(fields[1])?,
                })
            }
            ANSWER => {
                expect_fields(ANSWER, &fields, 3)?;
                let value = fields[2]
                    .parse()
                    .map_err(|_| PayloadError::InvalidField {
                        field: "value",
                        value: fields[2].to_string(),
                    })?;
                Ok(Self::Answer {
                    chat: parse_chat(fields[0])?,
                    challenge: parse_challenge(fields[1])?,
                    value,
                })
            }
            other => Err(PayloadError::UnknownTag(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reveal() {
        let payload: CallbackPayload = "r:-1001:7+5".parse().unwrap();
        assert_eq!(
            payload,
            CallbackPayload::Reveal {
                chat: ChatId(-1001),
                challenge: Challenge::new(7, 5).unwrap(),
            }
        );
        assert_eq!(payload.to_string(), "r:-1001:7+5");
    }

    #[test]
    fn test_parse_answer() {
        let payload: CallbackPayload = "a:-1001:7+5:12".parse().unwrap();
        assert_eq!(
            payload,
            CallbackPayload::Answer {
                chat: ChatId(-1001),
                challenge: Challenge::new(7, 5).unwrap(),
                value: 12,
            }
        );
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        assert_eq!(
            "v:-1001:0".parse::<CallbackPayload>(),
            Err(PayloadError::UnknownTag("v".into()))
        );
        assert_eq!(
            "".parse::<CallbackPayload>(),
            Err(PayloadError::UnknownTag(String::new()))
        );
    }

    #[test]
    fn test_malformed_fields() {
        assert_eq!(
            "a:-1001:7+5".parse::<CallbackPayload>(),
            Err(PayloadError::FieldCount {
                tag: "a",
                expected: 3,
                got: 2
            })
        );
        assert!(matches!(
            "r:group:7+5".parse::<CallbackPayload>(),
            Err(PayloadError::InvalidField { field: "chat", .. })
        ));
        assert!(matches!(
            "a:-1001:7+5:twelve".parse::<CallbackPayload>(),
            Err(PayloadError::InvalidField { field: "value", .. })
        ));
        assert!(matches!(
            "r:-1001:7*5".parse::<CallbackPayload>(),
            Err(PayloadError::InvalidField {
                field: "challenge",
                ..
            })
        ));
    }

    #[test]
    fn test_fits_telegram_callback_limit() {
        let payload = CallbackPayload::Answer {
            chat: ChatId(i64::MIN),
            challenge: Challenge::new(20, 20).unwrap(),
            value: 42,
        };
        assert!(payload.to_string().len() <= 64);
    }
}
