//! In-process store backend, used by tests and `--memory-store` runs.

use async_trait::async_trait;
use dashmap::DashMap;
use warden_common::{ChatId, MessageRef, MuteRecord, PendingChallenge, StoreError, UserId};

use super::Store;

#[derive(Default)]
pub struct MemoryStore {
    pending: DashMap<(UserId, ChatId), PendingChallenge>,
    mutes: DashMap<(UserId, ChatId), MuteRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_pending(&self, record: &PendingChallenge) -> Result<(), StoreError> {
        self.pending
            .insert((record.user_id, record.chat_id), record.clone());
        Ok(())
    }

    async fn get_pending(
        &self,
        user: UserId,
        chat: ChatId,
    ) -> Result<Option<PendingChallenge>, StoreError> {
        Ok(self.pending.get(&(user, chat)).map(|r| r.value().clone()))
    }

    async fn delete_pending(&self, user: UserId, chat: ChatId) -> Result<bool, StoreError> {
        Ok(self.pending.remove(&(user, chat)).is_some())
    }

    async fn increment_attempts(
        &self,
        user: UserId,
        chat: ChatId,
    ) -> Result<Option<u32>, StoreError> {
        Ok(self.pending.get_mut(&(user, chat)).map(|mut r| {
            r.attempts += 1;
            r.attempts
        }))
    }

    async fn attach_prompt(
        &self,
        user: UserId,
        chat: ChatId,
        prompt: MessageRef,
    ) -> Result<bool, StoreError> {
        match self.pending.get_mut(&(user, chat)) {
            Some(mut r) => {
                r.prompt = Some(prompt);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_pending(&self) -> Result<Vec<PendingChallenge>, StoreError> {
        Ok(self.pending.iter().map(|r| r.value().clone()).collect())
    }

    async fn upsert_mute(&self, record: &MuteRecord) -> Result<(), StoreError> {
        self.mutes
            .insert((record.user_id, record.chat_id), record.clone());
        Ok(())
    }

    async fn get_mute(&self, user: UserId, chat: ChatId) -> Result<Option<MuteRecord>, StoreError> {
        Ok(self.mutes.get(&(user, chat)).map(|r| r.value().clone()))
    }

    async fn delete_mute(&self, user: UserId, chat: ChatId) -> Result<bool, StoreError> {
        Ok(self.mutes.remove(&(user, chat)).is_some())
    }

    async fn list_mutes(&self) -> Result<Vec<MuteRecord>, StoreError> {
        Ok(self.mutes.iter().map(|r| r.value().clone()).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
