//! Health check endpoints.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::audit::GateStatsSnapshot;
use crate::scheduler::TaskKind;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the process running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    store: &'static str,
}

/// Readiness check, 503 while the store is unreachable
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    match state.store.ping().await {
        Ok(()) => Ok(Json(ReadyResponse {
            status: "ready",
            store: state.store.backend_name(),
        })),
        Err(e) => {
            tracing::warn!(error = %e, "Store ping failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

#[derive(Serialize)]
pub struct StatsResponse {
    uptime_secs: u64,
    outcomes: GateStatsSnapshot,
    pending_timers: usize,
    mute_timers: usize,
}

/// Outcome counters since startup
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        outcomes: state.stats.snapshot(),
        pending_timers: state.scheduler.armed(TaskKind::Challenge),
        mute_timers: state.scheduler.armed(TaskKind::Mute),
    })
}
