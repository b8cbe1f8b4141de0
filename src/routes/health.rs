use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    database: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// `GET /health` — reports database connectivity; 503 when the store is unreachable.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (status, database) = match state.flow.store().ping().await {
        Ok(()) => (StatusCode::OK, "connected"),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not reach the database");
            (StatusCode::SERVICE_UNAVAILABLE, "disconnected")
        }
    };

    let body = HealthResponse {
        status: if status.is_success() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
    };
    (status, Json(body))
}
