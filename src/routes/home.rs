use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::auth::middleware::{BrowserSession, with_session};
use crate::error::AppError;
use crate::services::AccountSummary;
use crate::sessions::Notice;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HomePage {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AccountSummary>,
    pub notices: Vec<Notice>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(home))
}

/// `GET /` — who is logged in, plus the notices queued by the last redirect.
async fn home(
    State(state): State<AppState>,
    BrowserSession(session): BrowserSession,
) -> Result<Response, AppError> {
    let user = state.flow.current_account(&session).await?;
    let page = HomePage {
        authenticated: user.is_some(),
        user,
        notices: state.flow.sessions().take_notices(&session),
    };
    Ok(with_session(&state, &session, Json(page)))
}
