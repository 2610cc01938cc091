//! Deferred actions: challenge expiry, mute expiry and message cleanup.
//!
//! Keyed timers live in a registry so a rejoin or a new mute replaces the
//! previous timer, and a resolution cancels it. A timer removes its own
//! registry entry the moment it wakes, before running its action, so abort
//! only ever hits a sleeping timer. Actions re-read the store when they run,
//! which makes a stale fire harmless.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use warden_common::constants::TIMER_GRACE_MILLIS;
use warden_common::{ChatId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Challenge,
    Mute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub kind: TaskKind,
    pub chat: ChatId,
    pub user: UserId,
}

impl TaskKey {
    pub fn challenge(chat: ChatId, user: UserId) -> Self {
        Self {
            kind: TaskKind::Challenge,
            chat,
            user,
        }
    }

    pub fn mute(chat: ChatId, user: UserId) -> Self {
        Self {
            kind: TaskKind::Mute,
            chat,
            user,
        }
    }
}

/// Result of a recovery sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Live records whose timer was missing
    pub rearmed: usize,
    /// Overdue records resolved by the sweep itself
    pub expired: usize,
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Arc<DashMap<TaskKey, (u64, AbortHandle)>>,
    generation: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`, replacing any timer armed under `key`
    pub fn arm<F>(&self, key: TaskKey, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let tasks = self.tasks.clone();

        // The task must not claim its entry before it has been registered
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            if registered_rx.await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;

            let claimed = tasks
                .remove_if(&key, |_, (g, _)| *g == generation)
                .is_some();
            if !claimed {
                return;
            }

            tracing::trace!(?key, "Timer fired");
            action.await;
        });

        if let Some((_, previous)) = self.tasks.insert(key, (generation, handle.abort_handle())) {
            tracing::debug!(?key, "Re-armed timer");
            previous.abort();
        }
        let _ = registered_tx.send(());
    }

    /// Drop the timer under `key`. Returns true if one was sleeping.
    pub fn cancel(&self, key: TaskKey) -> bool {
        match self.tasks.remove(&key) {
            Some((_, (_, handle))) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Fire-and-forget delayed action, not tracked by key
    pub fn after<F>(&self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
    }

    pub fn is_armed(&self, key: TaskKey) -> bool {
        self.tasks.contains_key(&key)
    }

    pub fn armed(&self, kind: TaskKind) -> usize {
        self.tasks.iter().filter(|e| e.key().kind == kind).count()
    }

    /// Abort every sleeping timer (shutdown)
    pub fn abort_all(&self) {
        self.tasks.retain(|_, (_, handle)| {
            handle.abort();
            false
        });
    }
}

/// Sleep needed to land just past `deadline`
pub fn delay_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
    remaining + Duration::from_millis(TIMER_GRACE_MILLIS)
}
