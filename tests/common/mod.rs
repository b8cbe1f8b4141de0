#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use migration::{Migrator, MigratorTrait};
use tokio::sync::Barrier;
use tower::ServiceExt;

use community_api::auth::gateway::{CallbackParams, GatewayError, ProviderGateway, RemoteIdentity};
use community_api::sessions::Session;
use community_api::config::{Config, Environment, MailSettings, ProviderCredentials};
use community_api::mail::{ActivationMail, MailError, MailSender};
use community_api::services::IdentityFlow;
use community_api::state::AppState;

pub const SESSION_COOKIE: &str = "community_session";
pub const APP_URL: &str = "https://community.test";

pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        server_host: std::net::IpAddr::from([127, 0, 0, 1]),
        server_port: 0,
        environment: Environment::Development,
        log_level: "warn".to_string(),
        app_url: APP_URL.to_string(),
        app_secret: "test-secret-key-for-testing-only-32chars".to_string(),
        session_cookie: SESSION_COOKIE.to_string(),
        session_ttl_secs: 7200,
        pending_link_ttl_secs: 600,
        default_role_id: 100,
        activation_token_ttl_hours: 72,
        login_max_attempts: 3,
        login_max_attempts_per_origin: 10,
        login_lockout_secs: 60,
        trust_proxy_headers: false,
        io_timeout_secs: 5,
        providers: vec![ProviderCredentials {
            name: "github".to_string(),
            client_id: "github-client".to_string(),
            client_secret: "github-secret".to_string(),
            redirect_uri: format!("{APP_URL}/auth/github/callback"),
        }],
        mail: MailSettings::default(),
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Collaborator doubles
// ──────────────────────────────────────────────────────────────────────────────

/// Gateway answering callbacks from a fixed `code -> identity` table.
#[derive(Clone, Default)]
pub struct FakeGateway {
    providers: Vec<String>,
    identities: Arc<Mutex<HashMap<String, RemoteIdentity>>>,
    delay: Option<Duration>,
    barrier: Option<Arc<Barrier>>,
}

impl FakeGateway {
    pub fn new(providers: &[&str]) -> Self {
        Self {
            providers: providers.iter().map(|p| (*p).to_string()).collect(),
            ..Self::default()
        }
    }

    /// Answer every exchange only after `delay`.
    #[must_use]
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold every exchange until `parties` of them are in flight together.
    #[must_use]
    pub fn in_lockstep(mut self, parties: usize) -> Self {
        self.barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    /// Make the callback with `code` resolve to `identity`.
    pub fn answer(&self, code: &str, identity: RemoteIdentity) {
        if let Ok(mut identities) = self.identities.lock() {
            identities.insert(code.to_string(), identity);
        }
    }
}

#[async_trait]
impl ProviderGateway for FakeGateway {
    fn is_configured(&self, provider: &str) -> bool {
        self.providers.iter().any(|p| p == provider)
    }

    fn authorization_redirect(&self, provider: &str, state: &str) -> Result<String, GatewayError> {
        Ok(format!("https://{provider}.example/authorize?state={state}"))
    }

    async fn exchange(&self, _provider: &str, code: &str) -> Result<RemoteIdentity, GatewayError> {
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.identities
            .lock()
            .ok()
            .and_then(|identities| identities.get(code).cloned())
            .ok_or_else(|| GatewayError::Exchange(format!("unknown code {code}")))
    }
}

/// Mailer that records every dispatch attempt and can be told to fail or stall.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<ActivationMail>>>,
    failing: bool,
    delay: Option<Duration>,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Record the mail, then take `delay` before answering.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<ActivationMail> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn last_token(&self) -> String {
        self.sent()
            .last()
            .map(|mail| mail.activation_token.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send(&self, mail: &ActivationMail) -> Result<(), MailError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(mail.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(MailError::Rejected(503));
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Application under test
// ──────────────────────────────────────────────────────────────────────────────

pub struct TestContext {
    pub app: Router,
    pub flow: IdentityFlow,
    pub gateway: FakeGateway,
    pub mailer: RecordingMailer,
}

pub async fn test_context() -> TestContext {
    test_context_with(RecordingMailer::default()).await
}

pub async fn test_context_with(mailer: RecordingMailer) -> TestContext {
    test_context_from(test_config(), FakeGateway::new(&["github"]), mailer).await
}

pub async fn test_context_from(
    config: Config,
    gateway: FakeGateway,
    mailer: RecordingMailer,
) -> TestContext {
    let db = sea_orm::Database::connect("sqlite::memory:")
        .await
        .unwrap_or_default();
    Migrator::up(&db, None).await.unwrap_or_default();

    let flow = IdentityFlow::from_config(
        &config,
        db,
        Arc::new(gateway.clone()),
        Arc::new(mailer.clone()),
    );

    let state = AppState {
        config,
        flow: flow.clone(),
    };

    TestContext {
        app: community_api::routes::router().with_state(state),
        flow,
        gateway,
        mailer,
    }
}

/// Open the consent screen for `provider` in `session` and return the state
/// the provider would send back.
pub fn issued_state(flow: &IdentityFlow, session: &Session, provider: &str) -> String {
    flow.begin_provider_login(session, provider)
        .ok()
        .and_then(|outcome| state_from_url(&outcome.redirect_to))
        .unwrap_or_default()
}

/// Value of the `state` query parameter of a consent-screen URL.
pub fn state_from_url(url: &str) -> Option<String> {
    url.split_once("state=").map(|(_, state)| state.to_string())
}

/// Callback parameters as the provider sends them after consent.
pub fn callback(code: &str, state: &str) -> CallbackParams {
    CallbackParams {
        code: Some(code.to_string()),
        state: Some(state.to_string()),
        ..CallbackParams::default()
    }
}

pub fn github_identity(remote_user_id: &str, name: &str) -> RemoteIdentity {
    RemoteIdentity {
        remote_user_id: remote_user_id.to_string(),
        display_name: name.to_string(),
        email: Some(format!("{name}@github.example")),
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Requests
// ──────────────────────────────────────────────────────────────────────────────

pub struct TestResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    /// Session id set by the response, if any.
    pub session: Option<String>,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or_default()
    }
}

async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap_or_default();

    let status = response.status();
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let session = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.strip_prefix(&format!("{SESSION_COOKIE}=")))
        .and_then(|v| v.split(';').next())
        .map(str::to_string);
    let body = response
        .into_body()
        .collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .unwrap_or_default();

    TestResponse {
        status,
        location,
        session,
        body: String::from_utf8(body.to_vec()).unwrap_or_default(),
    }
}

/// POST an url-encoded form over a connection from `peer`, with extra headers.
pub async fn post_form_from(
    app: &Router,
    uri: &str,
    peer: SocketAddr,
    headers: &[(&str, &str)],
    form: &[(&str, &str)],
) -> TestResponse {
    let body = form
        .iter()
        .map(|(k, v)| format!("{k}={}", encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let mut builder = builder("POST", uri, None)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .extension(ConnectInfo(peer));
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    send(app, builder.body(Body::from(body)).unwrap_or_default()).await
}

fn builder(method: &str, uri: &str, session: Option<&str>) -> axum::http::request::Builder {
    let builder = Request::builder().method(method).uri(uri);
    match session {
        Some(id) => builder.header(COOKIE, format!("{SESSION_COOKIE}={id}")),
        None => builder,
    }
}

/// Send a GET request, optionally inside an existing session.
pub async fn get(app: &Router, uri: &str, session: Option<&str>) -> TestResponse {
    let request = builder("GET", uri, session)
        .body(Body::empty())
        .unwrap_or_default();
    send(app, request).await
}

/// Send a GET request with extra headers.
pub async fn get_with_headers(
    app: &Router,
    uri: &str,
    session: Option<&str>,
    headers: &[(&str, &str)],
) -> TestResponse {
    let mut builder = builder("GET", uri, session);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    send(app, builder.body(Body::empty()).unwrap_or_default()).await
}

/// POST an url-encoded form, optionally inside an existing session.
pub async fn post_form(
    app: &Router,
    uri: &str,
    session: Option<&str>,
    form: &[(&str, &str)],
) -> TestResponse {
    let body = form
        .iter()
        .map(|(k, v)| format!("{k}={}", encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let request = builder("POST", uri, session)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap_or_default();
    send(app, request).await
}

fn encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}
