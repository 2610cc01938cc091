//! Telegram Bot API adapter.

use async_trait::async_trait;
use teloxide::RequestError;
use teloxide::prelude::*;
use teloxide::requests::{HasPayload, Output, Request};
use teloxide::types::{
    ChatMemberKind, ChatPermissions, InlineKeyboardButton, InlineKeyboardMarkup, MessageId,
};
use tracing::warn;
use warden_common::{ChatId, MessageRef, PermissionSet, PlatformError, UserId};

use super::{ChatRights, InlineKeyboard, Platform};

#[derive(Clone)]
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn tg_chat(chat: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat.0)
}

fn tg_user(user: UserId) -> teloxide::types::UserId {
    teloxide::types::UserId(user.0 as u64)
}

fn permissions(set: PermissionSet) -> ChatPermissions {
    match set {
        PermissionSet::Silenced => ChatPermissions::empty(),
        PermissionSet::TextOnly => ChatPermissions::SEND_MESSAGES,
        PermissionSet::Member => {
            ChatPermissions::SEND_MESSAGES
                | ChatPermissions::SEND_MEDIA_MESSAGES
                | ChatPermissions::SEND_POLLS
                | ChatPermissions::SEND_OTHER_MESSAGES
                | ChatPermissions::ADD_WEB_PAGE_PREVIEWS
        }
    }
}

fn markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|b| InlineKeyboardButton::callback(b.text, b.data))
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

/// Hint logged next to a failed call, most failures are missing admin rights
fn permission_hint(ctx: &str) -> &'static str {
    match ctx {
        "restrict_chat_member" => "bot needs the 'ban users' admin right",
        "ban_chat_member" | "unban_chat_member" => "bot needs the 'ban users' admin right",
        "delete_message" => "bot needs the 'delete messages' admin right",
        "send_message" => "user may not have started a conversation with the bot",
        _ => "check the bot's admin rights in this chat",
    }
}

/// Send a request, logging and classifying failures
async fn call<R>(ctx: &'static str, req: R) -> Result<Output<R>, PlatformError>
where
    R: Request<Err = RequestError> + HasPayload,
{
    req.send().await.map_err(|e| {
        warn!(call = ctx, error = %e, hint = permission_hint(ctx), "Telegram API call failed");
        match e {
            RequestError::Api(api) => PlatformError::Rejected(api.to_string()),
            other => PlatformError::Transport(other.to_string()),
        }
    })
}

#[async_trait]
impl Platform for TelegramPlatform {
    async fn restrict(
        &self,
        chat: ChatId,
        user: UserId,
        set: PermissionSet,
    ) -> Result<(), PlatformError> {
        call(
            "restrict_chat_member",
            self.bot
                .restrict_chat_member(tg_chat(chat), tg_user(user), permissions(set)),
        )
        .await?;
        Ok(())
    }

    async fn kick(&self, chat: ChatId, user: UserId) -> Result<(), PlatformError> {
        self.ban(chat, user).await?;
        self.unban(chat, user).await
    }

    async fn ban(&self, chat: ChatId, user: UserId) -> Result<(), PlatformError> {
        call(
            "ban_chat_member",
            self.bot.ban_chat_member(tg_chat(chat), tg_user(user)),
        )
        .await?;
        Ok(())
    }

    async fn unban(&self, chat: ChatId, user: UserId) -> Result<(), PlatformError> {
        call(
            "unban_chat_member",
            self.bot
                .unban_chat_member(tg_chat(chat), tg_user(user))
                .only_if_banned(true),
        )
        .await?;
        Ok(())
    }

    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef, PlatformError> {
        let mut req = self.bot.send_message(tg_chat(chat), text);
        if let Some(keyboard) = keyboard {
            req = req.reply_markup(markup(keyboard));
        }

        let sent = call("send_message", req).await?;
        Ok(MessageRef::new(ChatId(sent.chat.id.0), sent.id.0))
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<(), PlatformError> {
        let req = self
            .bot
            .edit_message_text(tg_chat(message.chat_id), MessageId(message.message_id), text)
            .reply_markup(markup(keyboard.unwrap_or_default()));

        call("edit_message_text", req).await?;
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), PlatformError> {
        call(
            "delete_message",
            self.bot
                .delete_message(tg_chat(message.chat_id), MessageId(message.message_id)),
        )
        .await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), PlatformError> {
        let mut req = self.bot.answer_callback_query(callback_id.to_string());
        if let Some(text) = text {
            req = req.text(text);
        }

        call("answer_callback_query", req).await?;
        Ok(())
    }

    async fn is_chat_admin(&self, chat: ChatId, user: UserId) -> Result<bool, PlatformError> {
        let member = call(
            "get_chat_member",
            self.bot.get_chat_member(tg_chat(chat), tg_user(user)),
        )
        .await?;
        Ok(member.is_privileged())
    }

    async fn member_rights(&self, chat: ChatId, user: UserId) -> Result<ChatRights, PlatformError> {
        let member = call(
            "get_chat_member",
            self.bot.get_chat_member(tg_chat(chat), tg_user(user)),
        )
        .await?;

        Ok(match member.kind {
            ChatMemberKind::Owner(_) => ChatRights::all(),
            ChatMemberKind::Administrator(admin) => ChatRights {
                delete_messages: admin.can_delete_messages,
                restrict_members: admin.can_restrict_members,
                pin_messages: admin.can_pin_messages,
                invite_users: admin.can_invite_users,
            },
            _ => ChatRights::default(),
        })
    }
}
