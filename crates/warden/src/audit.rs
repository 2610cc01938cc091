//! Audit log and counters fed by gate outcomes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use warden_common::{GateOutcome, OutcomeKind, RemovalReason};

/// Outcome counters since startup
#[derive(Default)]
pub struct GateStats {
    pub challenged: AtomicU64,
    pub admitted: AtomicU64,
    pub removed_timeout: AtomicU64,
    pub removed_lockout: AtomicU64,
    pub removed_undeliverable: AtomicU64,
}

impl GateStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: &OutcomeKind) {
        let counter = match kind {
            OutcomeKind::Challenged { .. } => &self.challenged,
            OutcomeKind::Admitted { .. } => &self.admitted,
            OutcomeKind::Removed { reason } => match reason {
                RemovalReason::Timeout => &self.removed_timeout,
                RemovalReason::Lockout => &self.removed_lockout,
                RemovalReason::Undeliverable => &self.removed_undeliverable,
            },
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GateStatsSnapshot {
        GateStatsSnapshot {
            challenged: self.challenged.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            removed_timeout: self.removed_timeout.load(Ordering::Relaxed),
            removed_lockout: self.removed_lockout.load(Ordering::Relaxed),
            removed_undeliverable: self.removed_undeliverable.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStatsSnapshot {
    pub challenged: u64,
    pub admitted: u64,
    pub removed_timeout: u64,
    pub removed_lockout: u64,
    pub removed_undeliverable: u64,
}

/// Log every gate outcome and count it, until shutdown
pub async fn audit_worker(
    stats: Arc<GateStats>,
    mut outcomes: broadcast::Receiver<GateOutcome>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::debug!("Audit worker started");

    loop {
        tokio::select! {
            received = outcomes.recv() => match received {
                Ok(outcome) => {
                    stats.record(&outcome.kind);
                    log_outcome(&outcome);
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Audit worker fell behind, outcomes dropped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.recv() => break,
        }
    }

    tracing::debug!("Audit worker stopped");
}

fn log_outcome(outcome: &GateOutcome) {
    let chat_id = outcome.chat_id.0;
    let user_id = outcome.user_id.0;

    match outcome.kind {
        OutcomeKind::Challenged { mode } => tracing::info!(
            target: "warden::audit",
            chat_id, user_id, mode = mode.as_str(), at = %outcome.at,
            "challenged"
        ),
        OutcomeKind::Admitted { wrong_attempts } => tracing::info!(
            target: "warden::audit",
            chat_id, user_id, wrong_attempts, at = %outcome.at,
            "admitted"
        ),
        OutcomeKind::Removed { reason } => tracing::info!(
            target: "warden::audit",
            chat_id, user_id, reason = ?reason, at = %outcome.at,
            "removed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_common::{ChatId, DeliveryMode, UserId};

    fn outcome(kind: OutcomeKind) -> GateOutcome {
        GateOutcome {
            chat_id: ChatId(-100),
            user_id: UserId(1),
            kind,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_record_counts_by_kind() {
        let stats = GateStats::new();
        stats.record(&OutcomeKind::Challenged {
            mode: DeliveryMode::Private,
        });
        stats.record(&OutcomeKind::Admitted { wrong_attempts: 1 });
        stats.record(&OutcomeKind::Removed {
            reason: RemovalReason::Lockout,
        });
        stats.record(&OutcomeKind::Removed {
            reason: RemovalReason::Lockout,
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.challenged, 1);
        assert_eq!(snapshot.admitted, 1);
        assert_eq!(snapshot.removed_lockout, 2);
        assert_eq!(snapshot.removed_timeout, 0);
    }

    #[tokio::test]
    async fn test_worker_counts_until_shutdown() {
        let stats = Arc::new(GateStats::new());
        let (tx, rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let worker = tokio::spawn(audit_worker(stats.clone(), rx, shutdown_rx));

        tx.send(outcome(OutcomeKind::Admitted { wrong_attempts: 0 }))
            .unwrap();
        tx.send(outcome(OutcomeKind::Removed {
            reason: RemovalReason::Timeout,
        }))
        .unwrap();

        // Outcomes are drained before the worker sees the closed channel
        drop(tx);
        worker.await.unwrap();
        drop(shutdown_tx);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.admitted, 1);
        assert_eq!(snapshot.removed_timeout, 1);
    }
}
