//! Chat platform capability.
//!
//! The gate and the moderation services only talk to the platform through
//! [`Platform`], so they can be driven by a recording fake in tests.

mod telegram;

pub use telegram::TelegramPlatform;

use async_trait::async_trait;
use serde::Serialize;
use warden_common::{ChatId, Member, MessageRef, PermissionSet, PlatformError, UserId};

/// One inline button carrying callback data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

/// Inline keyboard attached to a message, row by row
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn single(button: InlineButton) -> Self {
        Self {
            rows: vec![vec![button]],
        }
    }

    pub fn row(buttons: Vec<InlineButton>) -> Self {
        Self {
            rows: vec![buttons],
        }
    }

    #[cfg(test)]
    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.rows.iter().flatten()
    }
}

/// Admin rights a member holds in a chat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatRights {
    /// Delete messages of others
    pub delete_messages: bool,
    /// Restrict, ban and unban members
    pub restrict_members: bool,
    pub pin_messages: bool,
    pub invite_users: bool,
}

impl ChatRights {
    /// Everything, as held by the chat owner
    pub fn all() -> Self {
        Self {
            delete_messages: true,
            restrict_members: true,
            pin_messages: true,
            invite_users: true,
        }
    }

    /// Rights the gate and the moderator commands need that are not held
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.delete_messages {
            missing.push("delete messages");
        }
        if !self.restrict_members {
            missing.push("ban users");
        }
        missing
    }

    /// Optional rights that are held
    pub fn extras(&self) -> Vec<&'static str> {
        let mut extras = Vec::new();
        if self.pin_messages {
            extras.push("pin messages");
        }
        if self.invite_users {
            extras.push("invite users");
        }
        extras
    }
}

/// Text message posted in a group
#[derive(Debug, Clone)]
pub struct TextMessage {
    pub member: Member,
    pub chat: ChatId,
    pub text: String,
    pub message: MessageRef,
}

/// Inline button press
#[derive(Debug, Clone)]
pub struct CallbackAction {
    pub member: Member,
    pub callback_id: String,
    /// Raw callback data, parsed by the gate
    pub payload: String,
    /// Message the button belongs to
    pub origin: Option<MessageRef>,
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// Apply a permission set to a chat member
    async fn restrict(
        &self,
        chat: ChatId,
        user: UserId,
        permissions: PermissionSet,
    ) -> Result<(), PlatformError>;

    /// Remove a member without a lasting ban, so they can rejoin
    async fn kick(&self, chat: ChatId, user: UserId) -> Result<(), PlatformError>;

    async fn ban(&self, chat: ChatId, user: UserId) -> Result<(), PlatformError>;

    async fn unban(&self, chat: ChatId, user: UserId) -> Result<(), PlatformError>;

    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef, PlatformError>;

    /// Replace the text of a message. `None` removes any keyboard.
    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<(), PlatformError>;

    async fn delete_message(&self, message: MessageRef) -> Result<(), PlatformError>;

    /// Acknowledge a button press, optionally with a toast
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), PlatformError>;

    /// Owner or administrator of the chat
    async fn is_chat_admin(&self, chat: ChatId, user: UserId) -> Result<bool, PlatformError>;

    /// Admin rights `user` holds in `chat`, none for regular members
    async fn member_rights(&self, chat: ChatId, user: UserId) -> Result<ChatRights, PlatformError>;
}
