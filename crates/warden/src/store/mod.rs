//! Persistent state for pending challenges and mutes.
//!
//! The store is the only source of truth: nothing about a pending member or a
//! mute is kept in process memory, so a restart loses nothing but timers, and
//! the recovery sweep re-arms those from [`Store::list_pending`] and
//! [`Store::list_mutes`].
//!
//! Deletes report whether the record existed. Callers racing to resolve the
//! same record use that as the arbitration signal: only the caller that
//! actually deleted proceeds.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use warden_common::{ChatId, MessageRef, MuteRecord, PendingChallenge, StoreError, UserId};

use crate::config::StoreBackend;

#[async_trait]
pub trait Store: Send + Sync {
    /// Create or replace the pending challenge for (user, chat)
    async fn upsert_pending(&self, record: &PendingChallenge) -> Result<(), StoreError>;

    async fn get_pending(
        &self,
        user: UserId,
        chat: ChatId,
    ) -> Result<Option<PendingChallenge>, StoreError>;

    /// Returns true if a record existed and this call removed it
    async fn delete_pending(&self, user: UserId, chat: ChatId) -> Result<bool, StoreError>;

    /// Add one wrong attempt. Returns the new count, or `None` if no record
    /// exists (the increment never creates one).
    async fn increment_attempts(
        &self,
        user: UserId,
        chat: ChatId,
    ) -> Result<Option<u32>, StoreError>;

    /// Remember the prompt message, only if the record still exists
    async fn attach_prompt(
        &self,
        user: UserId,
        chat: ChatId,
        prompt: MessageRef,
    ) -> Result<bool, StoreError>;

    async fn list_pending(&self) -> Result<Vec<PendingChallenge>, StoreError>;

    async fn upsert_mute(&self, record: &MuteRecord) -> Result<(), StoreError>;

    async fn get_mute(&self, user: UserId, chat: ChatId) -> Result<Option<MuteRecord>, StoreError>;

    /// Returns true if a record existed and this call removed it
    async fn delete_mute(&self, user: UserId, chat: ChatId) -> Result<bool, StoreError>;

    async fn list_mutes(&self) -> Result<Vec<MuteRecord>, StoreError>;

    /// Backend liveness check
    async fn ping(&self) -> Result<(), StoreError>;

    fn backend_name(&self) -> &'static str;
}

/// Open the configured backend
pub async fn connect(backend: StoreBackend, redis_url: &str) -> Result<Arc<dyn Store>> {
    match backend {
        StoreBackend::Redis => Ok(Arc::new(RedisStore::connect(redis_url).await?)),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, state will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
