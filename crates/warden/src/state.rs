//! Application state and shared resources.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use warden_common::UserId;

use crate::audit::GateStats;
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigHandle;
use crate::gate::Gate;
use crate::moderation::{Moderator, MuteService};
use crate::platform::Platform;
use crate::scheduler::Scheduler;
use crate::store::Store;

/// Gate outcomes buffered for slow subscribers
const OUTCOME_CHANNEL_CAPACITY: usize = 256;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Pending challenges and mutes
    pub store: Arc<dyn Store>,

    /// Keyed timers
    pub scheduler: Arc<Scheduler>,

    /// Join gate
    pub gate: Gate,

    /// Timed mutes
    pub mutes: MuteService,

    /// Moderator commands
    pub moderator: Moderator,

    /// Gate outcome counters
    pub stats: Arc<GateStats>,

    /// Process start, for uptime
    pub started_at: Instant,
}

impl AppState {
    /// Wire the services together around one store, platform and scheduler
    pub fn new(
        config: ConfigHandle,
        store: Arc<dyn Store>,
        platform: Arc<dyn Platform>,
        bot_id: UserId,
        bot_username: &str,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);

        let gate = Gate::new(
            store.clone(),
            platform.clone(),
            scheduler.clone(),
            clock.clone(),
            config.clone(),
            outcomes,
            bot_username,
        );
        let mutes = MuteService::new(store.clone(), platform.clone(), scheduler.clone(), clock);
        let moderator = Moderator::new(
            platform,
            mutes.clone(),
            config,
            scheduler.clone(),
            bot_id,
        );

        Self {
            store,
            scheduler,
            gate,
            mutes,
            moderator,
            stats: Arc::new(GateStats::new()),
            started_at: Instant::now(),
        }
    }

    /// Recover timers for records left in the store
    pub async fn sweep(&self) {
        match self.gate.sweep().await {
            Ok(report) if report.rearmed + report.expired > 0 => tracing::info!(
                rearmed = report.rearmed,
                expired = report.expired,
                "Pending challenges swept"
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Pending challenge sweep failed"),
        }

        match self.mutes.sweep().await {
            Ok(report) if report.rearmed + report.expired > 0 => tracing::info!(
                rearmed = report.rearmed,
                expired = report.expired,
                "Mutes swept"
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Mute sweep failed"),
        }
    }
}
