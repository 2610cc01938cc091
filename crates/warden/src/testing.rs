//! Test doubles shared by the service tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use async_trait::async_trait;
use warden_common::{ChatId, Member, MessageRef, PermissionSet, PlatformError, UserId};

use crate::platform::{ChatRights, InlineKeyboard, Platform};

/// Platform call as seen by the fake
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Restrict {
        chat: ChatId,
        user: UserId,
        permissions: PermissionSet,
    },
    Kick {
        chat: ChatId,
        user: UserId,
    },
    Ban {
        chat: ChatId,
        user: UserId,
    },
    Unban {
        chat: ChatId,
        user: UserId,
    },
    Send {
        message: MessageRef,
        text: String,
        keyboard: Option<InlineKeyboard>,
    },
    Edit {
        message: MessageRef,
        text: String,
        keyboard: Option<InlineKeyboard>,
    },
    Delete {
        message: MessageRef,
    },
    AnswerCallback {
        id: String,
        text: Option<String>,
    },
}

/// Records every call and answers with canned results
#[derive(Default)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<Call>>,
    next_message_id: AtomicI32,
    /// Refuse messages to private chats (user never started the bot)
    pub reject_private: AtomicBool,
    /// Refuse restrictions (bot lacks admin rights)
    pub reject_restrict: AtomicBool,
    admins: Mutex<HashSet<(ChatId, UserId)>>,
    rights: Mutex<HashMap<(ChatId, UserId), ChatRights>>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI32::new(1000),
            ..Default::default()
        }
    }

    pub fn with_private_rejected(self) -> Self {
        self.reject_private.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_admin(self, chat: ChatId, user: UserId) -> Self {
        self.admins.lock().unwrap().insert((chat, user));
        self
    }

    pub fn with_rights(self, chat: ChatId, user: UserId, rights: ChatRights) -> Self {
        self.rights.lock().unwrap().insert((chat, user), rights);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn kicks(&self, chat: ChatId, user: UserId) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == Call::Kick { chat, user })
            .count()
    }

    pub fn restrictions(&self, chat: ChatId, user: UserId) -> Vec<PermissionSet> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Restrict {
                    chat: c_chat,
                    user: c_user,
                    permissions,
                } if c_chat == chat && c_user == user => Some(permissions),
                _ => None,
            })
            .collect()
    }

    /// Messages sent to a chat, in order
    pub fn sent(&self, chat: ChatId) -> Vec<(MessageRef, String, Option<InlineKeyboard>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send {
                    message,
                    text,
                    keyboard,
                } if message.chat_id == chat => Some((message, text, keyboard)),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self, message: MessageRef) -> Vec<(String, Option<InlineKeyboard>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Edit {
                    message: m,
                    text,
                    keyboard,
                } if m == message => Some((text, keyboard)),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn callback_answers(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AnswerCallback { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn restrict(
        &self,
        chat: ChatId,
        user: UserId,
        permissions: PermissionSet,
    ) -> Result<(), PlatformError> {
        if self.reject_restrict.load(Ordering::SeqCst) {
            return Err(PlatformError::Rejected("not enough rights".into()));
        }
        self.record(Call::Restrict {
            chat,
            user,
            permissions,
        });
        Ok(())
    }

    async fn kick(&self, chat: ChatId, user: UserId) -> Result<(), PlatformError> {
        self.record(Call::Kick { chat, user });
        Ok(())
    }

    async fn ban(&self, chat: ChatId, user: UserId) -> Result<(), PlatformError> {
        self.record(Call::Ban { chat, user });
        Ok(())
    }

    async fn unban(&self, chat: ChatId, user: UserId) -> Result<(), PlatformError> {
        self.record(Call::Unban { chat, user });
        Ok(())
    }

    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef, PlatformError> {
        if chat.0 > 0 && self.reject_private.load(Ordering::SeqCst) {
            return Err(PlatformError::Rejected(
                "Forbidden: bot can't initiate conversation with a user".into(),
            ));
        }
        let message = MessageRef::new(chat, self.next_message_id.fetch_add(1, Ordering::SeqCst));
        self.record(Call::Send {
            message,
            text: text.to_string(),
            keyboard,
        });
        Ok(message)
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<(), PlatformError> {
        self.record(Call::Edit {
            message,
            text: text.to_string(),
            keyboard,
        });
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), PlatformError> {
        self.record(Call::Delete { message });
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.record(Call::AnswerCallback {
            id: callback_id.to_string(),
            text: text.map(str::to_string),
        });
        Ok(())
    }

    async fn is_chat_admin(&self, chat: ChatId, user: UserId) -> Result<bool, PlatformError> {
        Ok(self.admins.lock().unwrap().contains(&(chat, user)))
    }

    async fn member_rights(&self, chat: ChatId, user: UserId) -> Result<ChatRights, PlatformError> {
        let rights = self.rights.lock().unwrap().get(&(chat, user)).copied();
        Ok(rights.unwrap_or_default())
    }
}

pub fn member(id: i64, name: &str) -> Member {
    Member {
        id: UserId(id),
        name: name.to_string(),
        username: None,
        is_bot: false,
    }
}
