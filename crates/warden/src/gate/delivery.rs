//! User-facing texts and keyboards of the join gate.

use warden_common::{Challenge, ChatId, Member, RemovalReason};

use super::callback::CallbackPayload;
use crate::captcha::answer_options;
use crate::platform::{InlineButton, InlineKeyboard};

pub const VERIFIED_STATUS: &str = "✅ Verified. Welcome to the group!";
pub const ENDED_TOAST: &str = "This verification has ended.";
pub const EXPIRED_TOAST: &str = "Time is up, verification failed.";
pub const LOCKOUT_TOAST: &str = "Too many wrong answers, verification failed.";
pub const VERIFIED_TOAST: &str = "Verified!";
pub const INVALID_BUTTON_TOAST: &str = "This button is no longer valid.";
pub const RETRY_TOAST: &str = "Something went wrong, please try again.";

/// Private message sent on join, the question is revealed by the button
pub fn private_prompt(timeout_secs: u64) -> String {
    format!(
        "To post in the group you just joined, please solve a short captcha.\n\
         Press the button below to see the question. You have {}.",
        human_duration(timeout_secs)
    )
}

pub fn reveal_keyboard(chat: ChatId, challenge: Challenge) -> InlineKeyboard {
    InlineKeyboard::single(InlineButton::new(
        "Show the question",
        CallbackPayload::Reveal { chat, challenge }.to_string(),
    ))
}

/// Question text shown once the member pressed the reveal button
pub fn revealed_question(challenge: &Challenge, remaining_attempts: u32) -> String {
    format!(
        "{}\nPick the correct answer ({} attempt(s) left).",
        challenge.question(),
        remaining_attempts
    )
}

pub fn answer_keyboard(chat: ChatId, challenge: Challenge) -> InlineKeyboard {
    InlineKeyboard::row(
        answer_options(&challenge)
            .into_iter()
            .map(|value| {
                InlineButton::new(
                    value.to_string(),
                    CallbackPayload::Answer {
                        chat,
                        challenge,
                        value,
                    }
                    .to_string(),
                )
            })
            .collect(),
    )
}

/// Prompt posted in the group in in-chat mode
pub fn in_chat_prompt(member: &Member, challenge: &Challenge, timeout_secs: u64) -> String {
    format!(
        "Welcome {}! Reply in this chat with the answer to {} within {} to be able to post.",
        member.mention(),
        challenge.question(),
        human_duration(timeout_secs)
    )
}

pub fn wrong_answer_warning(member: &Member, remaining: u32) -> String {
    format!(
        "{}, that is not correct. {} attempt(s) left.",
        member.mention(),
        remaining
    )
}

pub fn mismatch_toast(remaining: u32) -> String {
    format!("Wrong answer, {remaining} attempt(s) left.")
}

pub fn undeliverable_notice(member_name: &str, bot_username: &str) -> String {
    format!(
        "{member_name} could not be verified. Please start a conversation with @{bot_username} \
         first, then join the group again."
    )
}

pub fn removal_notice(member_name: &str, reason: RemovalReason) -> String {
    format!("{member_name} was removed: {}.", reason.describe())
}

pub fn removed_status(reason: RemovalReason) -> String {
    format!("❌ Verification failed, you {}.", reason.describe())
}

/// Fill `{name}` in the configured welcome template
pub fn welcome(template: &str, member_name: &str) -> String {
    template.replace("{name}", member_name)
}

fn human_duration(secs: u64) -> String {
    match secs {
        s if s >= 60 && s % 60 == 0 => format!("{} minute(s)", s / 60),
        s => format!("{s} second(s)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InlineKeyboard;

    fn payloads(keyboard: &InlineKeyboard) -> Vec<CallbackPayload> {
        keyboard
            .buttons()
            .map(|b| b.data.parse().unwrap())
            .collect()
    }

    #[test]
    fn test_answer_keyboard_offers_correct_answer_once() {
        let challenge = Challenge::new(7, 5).unwrap();
        let keyboard = answer_keyboard(ChatId(-1001), challenge);
        let values: Vec<i64> = payloads(&keyboard)
            .into_iter()
            .map(|p| match p {
                CallbackPayload::Answer { value, .. } => value,
                other => panic!("unexpected payload {other:?}"),
            })
            .collect();

        assert_eq!(values.len(), 4);
        assert_eq!(values.iter().filter(|v| **v == 12).count(), 1);
    }

    #[test]
    fn test_reveal_keyboard_payload() {
        let challenge = Challenge::new(3, 4).unwrap();
        let keyboard = reveal_keyboard(ChatId(-1001), challenge);
        assert_eq!(
            payloads(&keyboard),
            vec![CallbackPayload::Reveal {
                chat: ChatId(-1001),
                challenge
            }]
        );
    }

    #[test]
    fn test_welcome_template() {
        assert_eq!(welcome("Hi {name}, read the rules", "@ada"), "Hi @ada, read the rules");
        assert_eq!(welcome("Hello!", "@ada"), "Hello!");
    }

    #[test]
    fn test_human_duration() {
        assert_eq!(human_duration(300), "5 minute(s)");
        assert_eq!(human_duration(90), "90 second(s)");
    }
}
