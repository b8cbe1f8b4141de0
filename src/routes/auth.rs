use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::http::header::REFERER;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::gateway::CallbackParams;
use crate::auth::middleware::{BrowserSession, ClientOrigin, with_session};
use crate::auth::validation::Registration;
use crate::error::AppError;
use crate::services::identity_flow::{FlowError, FlowOutcome, HOME};
use crate::sessions::{Notice, Session};
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Build the auth route group: `/auth/...`
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_form).post(login))
        .route("/logout", get(logout))
        .route("/register", get(register_form).post(register))
        .route("/activation", post(activate))
        .route("/activation/resend", post(resend_activation))
        .route("/activation/{token}", get(activation_form))
        .route("/{provider}/redirect", get(provider_redirect))
        .route("/{provider}/callback", get(provider_callback))
}

// ─────────────────────────────────────────────────────────────────────────────
// Forms & page data
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirmation: String,
}

#[derive(Deserialize)]
pub struct TokenForm {
    #[serde(default)]
    pub token: String,
}

#[derive(Deserialize)]
pub struct EmailForm {
    #[serde(default)]
    pub email: String,
}

#[derive(Serialize)]
pub struct LoginPage {
    pub providers: Vec<String>,
    pub notices: Vec<Notice>,
}

#[derive(Serialize)]
pub struct PendingProvider {
    pub provider: String,
    pub display_name: String,
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct RegisterPage {
    pub pending_provider: Option<PendingProvider>,
    pub notices: Vec<Notice>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn redirect(state: &AppState, session: &Session, outcome: &FlowOutcome) -> Response {
    with_session(state, session, Redirect::to(&outcome.redirect_to))
}

/// Turn a flow failure into a redirect carrying its notice.
fn fail(state: &AppState, session: &Session, err: &FlowError) -> Response {
    match err {
        FlowError::Store(_) | FlowError::Internal(_) => {
            tracing::error!(error = %err, "identity flow failed");
        }
        _ => tracing::debug!(error = %err, "identity flow rejected request"),
    }
    state.flow.sessions().push_notice(session, err.notice());
    with_session(state, session, Redirect::to(err.redirect_to()))
}

fn respond(
    state: &AppState,
    session: &Session,
    result: Result<FlowOutcome, FlowError>,
) -> Response {
    match result {
        Ok(outcome) => redirect(state, session, &outcome),
        Err(err) => fail(state, session, &err),
    }
}

/// Authenticated visitors have no business on guest pages.
fn authenticated_redirect(state: &AppState, session: &Session) -> Option<Response> {
    if state.flow.sessions().is_guest(session) {
        None
    } else {
        Some(with_session(state, session, Redirect::to(HOME)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Password login
// ─────────────────────────────────────────────────────────────────────────────

async fn login_form(State(state): State<AppState>, BrowserSession(session): BrowserSession) -> Response {
    if let Some(response) = authenticated_redirect(&state, &session) {
        return response;
    }

    let page = LoginPage {
        providers: state.config.providers.iter().map(|p| p.name.clone()).collect(),
        notices: state.flow.sessions().take_notices(&session),
    };
    with_session(&state, &session, Json(page))
}

async fn login(
    State(state): State<AppState>,
    BrowserSession(mut session): BrowserSession,
    ClientOrigin(origin): ClientOrigin,
    Form(form): Form<LoginForm>,
) -> Response {
    if let Some(response) = authenticated_redirect(&state, &session) {
        return response;
    }

    let result = state
        .flow
        .login(&mut session, origin, &form.username, &form.password)
        .await;
    respond(&state, &session, result)
}

async fn logout(
    State(state): State<AppState>,
    BrowserSession(mut session): BrowserSession,
    headers: HeaderMap,
) -> Response {
    let referer = headers.get(REFERER).and_then(|v| v.to_str().ok());
    let outcome = state.flow.logout(&mut session, referer);
    redirect(&state, &session, &outcome)
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration & activation
// ─────────────────────────────────────────────────────────────────────────────

async fn register_form(
    State(state): State<AppState>,
    BrowserSession(session): BrowserSession,
) -> Response {
    if let Some(response) = authenticated_redirect(&state, &session) {
        return response;
    }

    let page = RegisterPage {
        pending_provider: state.flow.pending_identity(&session).map(|p| PendingProvider {
            provider: p.provider,
            display_name: p.display_name,
            email: p.email,
        }),
        notices: state.flow.sessions().take_notices(&session),
    };
    with_session(&state, &session, Json(page))
}

async fn register(
    State(state): State<AppState>,
    BrowserSession(session): BrowserSession,
    Form(form): Form<RegisterForm>,
) -> Response {
    if let Some(response) = authenticated_redirect(&state, &session) {
        return response;
    }

    let registration = Registration::new(
        &form.name,
        &form.email,
        &form.password,
        &form.password_confirmation,
    );
    match state.flow.register(&session, registration).await {
        Ok(outcome) => redirect(&state, &session, &outcome),
        Err(FlowError::ValidationFailed(fields)) => {
            with_session(&state, &session, AppError::Validation(fields))
        }
        Err(err) => fail(&state, &session, &err),
    }
}

async fn activation_form(
    State(state): State<AppState>,
    BrowserSession(session): BrowserSession,
    Path(token): Path<String>,
) -> Response {
    if let Some(response) = authenticated_redirect(&state, &session) {
        return response;
    }

    match state.flow.activation_details(&token).await {
        Ok(details) => with_session(&state, &session, Json(details)),
        Err(err) => fail(&state, &session, &err),
    }
}

async fn activate(
    State(state): State<AppState>,
    BrowserSession(mut session): BrowserSession,
    Form(form): Form<TokenForm>,
) -> Response {
    if let Some(response) = authenticated_redirect(&state, &session) {
        return response;
    }

    let result = state.flow.activate(&mut session, form.token.trim()).await;
    respond(&state, &session, result)
}

async fn resend_activation(
    State(state): State<AppState>,
    BrowserSession(session): BrowserSession,
    Form(form): Form<EmailForm>,
) -> Response {
    if let Some(response) = authenticated_redirect(&state, &session) {
        return response;
    }

    let result = state.flow.resend_activation(&session, &form.email).await;
    respond(&state, &session, result)
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider login
// ─────────────────────────────────────────────────────────────────────────────

async fn provider_redirect(
    State(state): State<AppState>,
    BrowserSession(session): BrowserSession,
    Path(provider): Path<String>,
) -> Response {
    let result = state.flow.begin_provider_login(&session, &provider);
    respond(&state, &session, result)
}

async fn provider_callback(
    State(state): State<AppState>,
    BrowserSession(mut session): BrowserSession,
    Path(provider): Path<String>,
    ClientOrigin(origin): ClientOrigin,
    Query(params): Query<CallbackParams>,
) -> impl IntoResponse {
    let result = state
        .flow
        .complete_provider_login(&mut session, origin, &provider, &params)
        .await;
    respond(&state, &session, result)
}
