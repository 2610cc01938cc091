//! Timed mutes.
//!
//! Whoever deletes a mute record restores the member's rights: the unmute
//! command, the expiry timer, or a lookup that finds the mute already over.
//! Restoring twice is harmless, restoring never is not.

use std::sync::Arc;

use tracing::{debug, info, warn};
use warden_common::{
    ChatId, MessageRef, ModerationError, MuteRecord, PermissionSet, StoreError, UserId,
};

use crate::clock::Clock;
use crate::platform::Platform;
use crate::scheduler::{Scheduler, SweepReport, TaskKey, delay_until};
use crate::store::Store;

#[derive(Clone)]
pub struct MuteService {
    store: Arc<dyn Store>,
    platform: Arc<dyn Platform>,
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
}

impl MuteService {
    pub fn new(
        store: Arc<dyn Store>,
        platform: Arc<dyn Platform>,
        scheduler: Arc<Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            platform,
            scheduler,
            clock,
        }
    }

    /// Silence a member for `duration`, replacing any running mute
    pub async fn mute(
        &self,
        chat: ChatId,
        user: UserId,
        duration: chrono::Duration,
    ) -> Result<MuteRecord, ModerationError> {
        let record = MuteRecord {
            user_id: user,
            chat_id: chat,
            until: self.clock.now() + duration,
        };

        self.platform
            .restrict(chat, user, PermissionSet::Silenced)
            .await?;
        self.store.upsert_mute(&record).await?;
        self.arm(&record);

        info!(chat_id = %chat, user_id = %user, until = %record.until, "Member muted");
        Ok(record)
    }

    /// Lift a mute early. Returns false if the member was not muted.
    pub async fn unmute(&self, chat: ChatId, user: UserId) -> Result<bool, ModerationError> {
        if !self.store.delete_mute(user, chat).await? {
            return Ok(false);
        }
        self.scheduler.cancel(TaskKey::mute(chat, user));

        self.platform
            .restrict(chat, user, PermissionSet::Member)
            .await?;

        info!(chat_id = %chat, user_id = %user, "Member unmuted");
        Ok(true)
    }

    /// Timer entry point
    pub async fn expire(&self, chat: ChatId, user: UserId) -> Result<(), StoreError> {
        let Some(record) = self.store.get_mute(user, chat).await? else {
            debug!(chat_id = %chat, user_id = %user, "Mute already lifted");
            return Ok(());
        };

        if record.is_active_at(self.clock.now()) {
            debug!(chat_id = %chat, user_id = %user, "Mute was extended");
            return Ok(());
        }

        self.release(&record).await?;
        Ok(())
    }

    /// True while a mute is running. A mute found past its end is purged
    /// and the member's rights are restored on the spot.
    pub async fn is_muted(&self, chat: ChatId, user: UserId) -> Result<bool, StoreError> {
        let Some(record) = self.store.get_mute(user, chat).await? else {
            return Ok(false);
        };

        if record.is_active_at(self.clock.now()) {
            return Ok(true);
        }

        self.release(&record).await?;
        Ok(false)
    }

    /// Delete a message from a muted member. Returns true if it was deleted.
    pub async fn filter_message(
        &self,
        user: UserId,
        message: MessageRef,
    ) -> Result<bool, StoreError> {
        if !self.is_muted(message.chat_id, user).await? {
            return Ok(false);
        }

        if let Err(e) = self.platform.delete_message(message).await {
            debug!(chat_id = %message.chat_id, user_id = %user, error = %e, "Failed to delete muted message");
        }
        Ok(true)
    }

    /// Lift overdue mutes and re-arm timers lost to a restart
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for record in self.store.list_mutes().await? {
            if !record.is_active_at(now) {
                match self.release(&record).await {
                    Ok(true) => report.expired += 1,
                    Ok(false) => {}
                    Err(e) => warn!(
                        chat_id = %record.chat_id,
                        user_id = %record.user_id,
                        error = %e,
                        "Failed to lift overdue mute"
                    ),
                }
            } else if !self
                .scheduler
                .is_armed(TaskKey::mute(record.chat_id, record.user_id))
            {
                self.arm(&record);
                report.rearmed += 1;
            }
        }

        Ok(report)
    }

    async fn release(&self, record: &MuteRecord) -> Result<bool, StoreError> {
        let (chat, user) = (record.chat_id, record.user_id);
        if !self.store.delete_mute(user, chat).await? {
            return Ok(false);
        }
        self.scheduler.cancel(TaskKey::mute(chat, user));

        if let Err(e) = self
            .platform
            .restrict(chat, user, PermissionSet::Member)
            .await
        {
            warn!(chat_id = %chat, user_id = %user, error = %e, "Failed to restore rights after mute");
        }

        info!(chat_id = %chat, user_id = %user, "Mute expired");
        Ok(true)
    }

    fn arm(&self, record: &MuteRecord) {
        let service = self.clone();
        let (chat, user) = (record.chat_id, record.user_id);
        let delay = delay_until(record.until, self.clock.now());

        self.scheduler.arm(TaskKey::mute(chat, user), delay, async move {
            if let Err(e) = service.expire(chat, user).await {
                warn!(chat_id = %chat, user_id = %user, error = %e, "Mute expiry failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::testing::RecordingPlatform;

    const CHAT: ChatId = ChatId(-1001);
    const USER: UserId = UserId(42);

    struct Harness {
        mutes: MuteService,
        store: Arc<MemoryStore>,
        platform: Arc<RecordingPlatform>,
        clock: Arc<ManualClock>,
        scheduler: Arc<Scheduler>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(RecordingPlatform::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler = Arc::new(Scheduler::new());
        let mutes = MuteService::new(
            store.clone(),
            platform.clone(),
            scheduler.clone(),
            clock.clone(),
        );
        Harness {
            mutes,
            store,
            platform,
            clock,
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_muted_strictly_inside_window() {
        let h = harness();
        assert!(!h.mutes.is_muted(CHAT, USER).await.unwrap());

        let record = h.mutes.mute(CHAT, USER, Duration::hours(1)).await.unwrap();
        assert_eq!(
            h.platform.restrictions(CHAT, USER),
            vec![PermissionSet::Silenced]
        );
        assert!(h.scheduler.is_armed(TaskKey::mute(CHAT, USER)));
        assert!(h.mutes.is_muted(CHAT, USER).await.unwrap());

        h.clock.set(record.until - Duration::seconds(1));
        assert!(h.mutes.is_muted(CHAT, USER).await.unwrap());

        // At `until` the mute is over; the lookup purges it and restores rights
        h.clock.set(record.until);
        assert!(!h.mutes.is_muted(CHAT, USER).await.unwrap());
        assert!(h.store.get_mute(USER, CHAT).await.unwrap().is_none());
        assert_eq!(
            h.platform.restrictions(CHAT, USER),
            vec![PermissionSet::Silenced, PermissionSet::Member]
        );
        assert!(!h.scheduler.is_armed(TaskKey::mute(CHAT, USER)));
    }

    #[tokio::test]
    async fn test_unmute_restores_once() {
        let h = harness();
        h.mutes.mute(CHAT, USER, Duration::hours(1)).await.unwrap();

        assert!(h.mutes.unmute(CHAT, USER).await.unwrap());
        assert!(!h.mutes.unmute(CHAT, USER).await.unwrap());
        assert!(!h.mutes.is_muted(CHAT, USER).await.unwrap());

        let restores = h
            .platform
            .restrictions(CHAT, USER)
            .into_iter()
            .filter(|p| *p == PermissionSet::Member)
            .count();
        assert_eq!(restores, 1);
    }

    #[tokio::test]
    async fn test_expiry_respects_extension() {
        let h = harness();
        let first = h.mutes.mute(CHAT, USER, Duration::hours(1)).await.unwrap();
        h.mutes.mute(CHAT, USER, Duration::hours(3)).await.unwrap();

        // The first timer's deadline passes, but the mute was extended
        h.clock.set(first.until + Duration::seconds(1));
        h.mutes.expire(CHAT, USER).await.unwrap();
        assert!(h.mutes.is_muted(CHAT, USER).await.unwrap());

        h.clock.advance(Duration::hours(3));
        h.mutes.expire(CHAT, USER).await.unwrap();
        assert!(h.store.get_mute(USER, CHAT).await.unwrap().is_none());
        assert!(h.platform.restrictions(CHAT, USER).contains(&PermissionSet::Member));
    }

    #[tokio::test]
    async fn test_filter_deletes_muted_messages_only() {
        let h = harness();
        let message = MessageRef::new(CHAT, 10);

        assert!(!h.mutes.filter_message(USER, message).await.unwrap());
        h.mutes.mute(CHAT, USER, Duration::hours(1)).await.unwrap();
        assert!(h.mutes.filter_message(USER, message).await.unwrap());
        assert_eq!(h.platform.deleted(), vec![message]);
    }

    #[tokio::test]
    async fn test_sweep_lifts_overdue_and_rearms() {
        let h = harness();
        let now = h.clock.now();
        h.store
            .upsert_mute(&MuteRecord {
                user_id: UserId(1),
                chat_id: CHAT,
                until: now - Duration::minutes(1),
            })
            .await
            .unwrap();
        h.store
            .upsert_mute(&MuteRecord {
                user_id: UserId(2),
                chat_id: CHAT,
                until: now + Duration::minutes(30),
            })
            .await
            .unwrap();

        let report = h.mutes.sweep().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                rearmed: 1,
                expired: 1
            }
        );
        assert_eq!(
            h.platform.restrictions(CHAT, UserId(1)),
            vec![PermissionSet::Member]
        );
        assert!(h.scheduler.is_armed(TaskKey::mute(CHAT, UserId(2))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_lifts_mute() {
        let h = harness();
        h.mutes.mute(CHAT, USER, Duration::seconds(30)).await.unwrap();

        // Wall clock and timer move together
        h.clock.advance(Duration::seconds(31));
        tokio::time::sleep(std::time::Duration::from_secs(31)).await;

        assert!(h.store.get_mute(USER, CHAT).await.unwrap().is_none());
        assert!(h.platform.restrictions(CHAT, USER).contains(&PermissionSet::Member));
    }
}
