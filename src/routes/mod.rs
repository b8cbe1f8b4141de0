mod auth;
mod health;
mod home;

use axum::Router;

use crate::state::AppState;

/// Build the complete application router.
///
/// Structure:
/// - `GET /` — current account and pending notices
/// - `GET /health` — health check with database connectivity
/// - `/auth/...` — login, registration, activation and provider login
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(home::router())
        .merge(health::router())
        .nest("/auth", auth::router())
}
