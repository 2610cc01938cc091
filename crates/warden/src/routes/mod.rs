//! HTTP status surface for Warden.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod health;

/// Create the status router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/stats", get(health::stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use warden_common::{OutcomeKind, RemovalReason, UserId};

    use crate::config::{AppConfig, ConfigHandle};
    use crate::store::MemoryStore;
    use crate::testing::RecordingPlatform;

    fn state() -> AppState {
        AppState::new(
            ConfigHandle::spawn(AppConfig::default(), None),
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingPlatform::new()),
            UserId(999),
            "warden_bot",
        )
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(create_router(state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_ready_reports_backend() {
        let (status, body) = get_json(create_router(state()), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["store"], "memory");
    }

    #[tokio::test]
    async fn test_stats_reflect_counters() {
        let state = state();
        state.stats.record(&OutcomeKind::Removed {
            reason: RemovalReason::Timeout,
        });

        let (status, body) = get_json(create_router(state), "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcomes"]["removed_timeout"], 1);
        assert_eq!(body["outcomes"]["admitted"], 0);
        assert_eq!(body["pending_timers"], 0);
    }
}
