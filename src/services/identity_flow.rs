//! Login, registration, activation and provider linking.
//!
//! Each operation works on the caller's [`Session`] and ends in a redirect. Success
//! notices are queued here; failures come back as [`FlowError`], which knows its
//! own notice and redirect target.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::gateway::{CallbackParams, GatewayError, ProviderGateway};
use crate::auth::{jwt, password};
use crate::auth::validation::{FieldError, Registration, is_email};
use crate::config::Config;
use crate::entities::user;
use crate::mail::{ACTIVATION_TEMPLATE, ActivationMail, MailSender, MailUser};
use crate::sessions::{Notice, PendingLinks, PendingProviderIdentity, Session, SessionStore};
use crate::store::{IdentityStore, NewUser, StoreError};
use crate::throttle::LoginThrottle;
use crate::tokens::TokenService;

pub const HOME: &str = "/";
pub const LOGIN_PAGE: &str = "/auth/login";
pub const REGISTER_PAGE: &str = "/auth/register";
pub const ACCOUNT_SETTINGS: &str = "/account/settings";

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("registration form is invalid")]
    ValidationFailed(Vec<FieldError>),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is not activated")]
    AccountNotActivated,
    #[error("too many login attempts, retry in {retry_after_secs}s")]
    TooManyAttempts { retry_after_secs: u64 },
    #[error("invalid or spent activation token")]
    InvalidToken,
    #[error("unknown login provider {0}")]
    UnknownProvider(String),
    #[error("provider login was declined")]
    ProviderDenied,
    #[error("provider exchange failed")]
    ProviderExchangeFailed,
    #[error("record already exists")]
    StoreConflict,
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for FlowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => Self::StoreConflict,
            other => Self::Store(other),
        }
    }
}

impl FlowError {
    /// Message shown to the visitor after the redirect.
    #[must_use]
    pub fn notice(&self) -> Notice {
        match self {
            Self::ValidationFailed(_) => Notice::error("Please correct the highlighted fields."),
            Self::InvalidCredentials => Notice::error("These credentials do not match our records."),
            Self::AccountNotActivated => Notice::warning(
                "Your account is not activated yet. Follow the link in your activation e-mail.",
            ),
            Self::TooManyAttempts { retry_after_secs } => Notice::error(format!(
                "Too many login attempts. Please try again in {retry_after_secs} seconds."
            )),
            Self::InvalidToken => Notice::info("Invalid token. Maybe the link you followed is old?"),
            Self::UnknownProvider(_) | Self::ProviderExchangeFailed => {
                Notice::warning("We could not sign you in with that provider. Please try again.")
            }
            Self::ProviderDenied => Notice::info("Sign in with the provider was cancelled."),
            Self::StoreConflict => Notice::info("That account is already linked."),
            Self::Store(_) | Self::Internal(_) => {
                Notice::error("Something went wrong on our side. Please try again.")
            }
        }
    }

    /// Page the visitor is sent back to.
    #[must_use]
    pub const fn redirect_to(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => REGISTER_PAGE,
            Self::InvalidCredentials
            | Self::AccountNotActivated
            | Self::TooManyAttempts { .. }
            | Self::UnknownProvider(_)
            | Self::ProviderDenied
            | Self::ProviderExchangeFailed => LOGIN_PAGE,
            Self::InvalidToken | Self::StoreConflict | Self::Store(_) | Self::Internal(_) => HOME,
        }
    }
}

/// Where to send the visitor after a successful operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOutcome {
    pub redirect_to: String,
}

impl FlowOutcome {
    fn to(target: impl Into<String>) -> Self {
        Self {
            redirect_to: target.into(),
        }
    }
}

/// Data for the activation confirmation page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationDetails {
    pub name: String,
    pub email: String,
    pub token: String,
}

/// The logged-in account as shown on the home page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub activated: bool,
    pub roles: Vec<i32>,
    pub providers: Vec<String>,
}

/// Tunables of the flow taken from [`Config`].
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub app_url: String,
    pub default_role_id: i32,
    pub io_timeout: Duration,
}

impl FlowSettings {
    /// Absolute URL of the activation page for a token.
    #[must_use]
    pub fn activation_url(&self, token: &str) -> String {
        format!("{}/auth/activation/{token}", self.app_url)
    }
}

impl From<&Config> for FlowSettings {
    fn from(config: &Config) -> Self {
        Self {
            app_url: config.app_url.clone(),
            default_role_id: config.default_role_id,
            io_timeout: config.io_timeout(),
        }
    }
}

/// Collaborators of the identity flow.
#[derive(Clone)]
pub struct IdentityFlow {
    store: IdentityStore,
    tokens: TokenService,
    sessions: SessionStore,
    pending: PendingLinks,
    throttle: LoginThrottle,
    gateway: Arc<dyn ProviderGateway>,
    mailer: Arc<dyn MailSender>,
    /// Signs OAuth `state` values.
    state_secret: String,
    settings: FlowSettings,
}

impl std::fmt::Debug for IdentityFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityFlow")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl IdentityFlow {
    /// Wire the flow against `db` with the tunables from `config`.
    #[must_use]
    pub fn from_config(
        config: &Config,
        db: DatabaseConnection,
        gateway: Arc<dyn ProviderGateway>,
        mailer: Arc<dyn MailSender>,
    ) -> Self {
        let io_timeout = config.io_timeout();
        Self {
            store: IdentityStore::new(db.clone(), io_timeout),
            tokens: TokenService::new(
                db,
                chrono::Duration::hours(config.activation_token_ttl_hours),
                io_timeout,
            ),
            sessions: SessionStore::new(Duration::from_secs(config.session_ttl_secs)),
            pending: PendingLinks::new(Duration::from_secs(config.pending_link_ttl_secs)),
            throttle: LoginThrottle::new(
                config.login_max_attempts,
                config.login_max_attempts_per_origin,
                Duration::from_secs(config.login_lockout_secs),
            ),
            gateway,
            mailer,
            state_secret: config.app_secret.clone(),
            settings: FlowSettings::from(config),
        }
    }

    /// Drop expired sessions, pending identities and throttle entries.
    pub fn purge_expired(&self) {
        let sessions = self.sessions.purge_expired();
        let pending = self.pending.purge_expired();
        let throttled = self.throttle.purge_expired();
        if sessions + pending + throttled > 0 {
            tracing::debug!(sessions, pending, throttled, "purged expired entries");
        }
    }

    #[must_use]
    pub const fn store(&self) -> &IdentityStore {
        &self.store
    }

    #[must_use]
    pub const fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub const fn throttle(&self) -> &LoginThrottle {
        &self.throttle
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Provider login
    // ─────────────────────────────────────────────────────────────────────────

    /// Send the visitor to the provider's consent screen. The `state` handed to
    /// the provider is signed and bound to this session and provider.
    ///
    /// # Errors
    ///
    /// `UnknownProvider` if the provider is not configured.
    pub fn begin_provider_login(
        &self,
        session: &Session,
        provider: &str,
    ) -> Result<FlowOutcome, FlowError> {
        if !self.gateway.is_configured(provider) {
            return Err(FlowError::UnknownProvider(provider.to_string()));
        }

        let state = jwt::generate_oauth_state(&self.state_secret, provider, session.id())?;
        let url = self
            .gateway
            .authorization_redirect(provider, &state)
            .map_err(|e| {
                tracing::warn!(provider, error = %e, "could not build provider redirect");
                FlowError::ProviderExchangeFailed
            })?;
        Ok(FlowOutcome::to(url))
    }

    /// Handle the provider callback: log in the linked user, connect the identity
    /// to the logged-in user, or park it until the visitor registers.
    ///
    /// The callback must carry the `state` issued to this same session by
    /// [`Self::begin_provider_login`]; anything else is refused before the code
    /// is exchanged.
    ///
    /// # Errors
    ///
    /// `ProviderDenied`, `UnknownProvider`, `ProviderExchangeFailed`, or store failures.
    pub async fn complete_provider_login(
        &self,
        session: &mut Session,
        origin: Option<String>,
        provider: &str,
        params: &CallbackParams,
    ) -> Result<FlowOutcome, FlowError> {
        if params.is_denied() {
            return Err(FlowError::ProviderDenied);
        }
        if !self.gateway.is_configured(provider) {
            return Err(FlowError::UnknownProvider(provider.to_string()));
        }

        let state = params.state.as_deref().unwrap_or_default();
        if let Err(e) = jwt::validate_oauth_state(state, &self.state_secret, provider, session.id())
        {
            tracing::warn!(provider, error = %e, "provider callback with foreign state");
            return Err(FlowError::ProviderExchangeFailed);
        }
        let code = params.code.as_deref().unwrap_or_default();

        let identity = tokio::time::timeout(
            self.settings.io_timeout,
            self.gateway.exchange(provider, code),
        )
        .await
        .unwrap_or(Err(GatewayError::Timeout))
        .map_err(|e| {
            tracing::warn!(provider, error = %e, "provider exchange failed");
            FlowError::ProviderExchangeFailed
        })?;

        let identity = PendingProviderIdentity {
            provider: provider.to_string(),
            remote_user_id: identity.remote_user_id,
            display_name: identity.display_name,
            email: identity.email,
        };

        if let Some(link) = self
            .store
            .find_auth(provider, &identity.remote_user_id)
            .await?
        {
            let user_model = self.store.find_user(link.user_id).await?.ok_or_else(|| {
                anyhow::anyhow!("user {} behind {provider} link is missing", link.user_id)
            })?;
            let user_model = self.store.record_login(user_model, origin).await?;
            self.sessions.authenticate(session, user_model.id);
            self.sessions.push_notice(
                session,
                Notice::success(format!("Welcome back, {}!", user_model.name)),
            );
            tracing::info!(user_id = %user_model.id, provider, "provider login");
            return Ok(FlowOutcome::to(HOME));
        }

        let Some(user_id) = self.sessions.user_id(session) else {
            self.pending.stash(session.id(), identity);
            self.sessions.push_notice(
                session,
                Notice::info(format!(
                    "Create an account to finish signing in with {provider}."
                )),
            );
            return Ok(FlowOutcome::to(REGISTER_PAGE));
        };

        match self.store.link_auth(user_id, &identity).await {
            Ok(_) => self.sessions.push_notice(
                session,
                Notice::success(format!(
                    "Your {provider} account is now connected and you can log in with it from now on."
                )),
            ),
            Err(StoreError::Conflict(detail)) => {
                tracing::info!(%user_id, provider, %detail, "provider identity linked concurrently");
                self.sessions.push_notice(
                    session,
                    Notice::info(format!("That {provider} account is already connected.")),
                );
            }
            Err(e) => return Err(e.into()),
        }
        Ok(FlowOutcome::to(ACCOUNT_SETTINGS))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration & activation
    // ─────────────────────────────────────────────────────────────────────────

    /// Provider identity waiting for the visitor to register, without consuming it.
    #[must_use]
    pub fn pending_identity(&self, session: &Session) -> Option<PendingProviderIdentity> {
        self.pending.peek(session.id())
    }

    /// Create an account, send its activation mail and link any pending provider identity.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` with every violated rule, or store failures.
    pub async fn register(
        &self,
        session: &Session,
        form: Registration,
    ) -> Result<FlowOutcome, FlowError> {
        let mut errors = form.validate();

        if !errors.iter().any(|e| e.field == "name") && self.store.name_taken(&form.name).await? {
            errors.push(FieldError::new("name", "The name has already been taken."));
        }
        if !errors.iter().any(|e| e.field == "email") && self.store.email_taken(&form.email).await?
        {
            errors.push(FieldError::new("email", "The email has already been taken."));
        }
        if !errors.is_empty() {
            return Err(FlowError::ValidationFailed(errors));
        }

        let password_hash = password::hash_password(&form.password)?;
        let new_user = NewUser {
            name: form.name,
            email: form.email,
            password_hash,
            role_id: self.settings.default_role_id,
        };

        let (user_model, token) = match self.store.create_user(new_user, &self.tokens).await {
            Ok(created) => created,
            Err(StoreError::Conflict(detail)) => {
                let field = if detail.contains("email") { "email" } else { "name" };
                return Err(FlowError::ValidationFailed(vec![FieldError::new(
                    field,
                    format!("The {field} has already been taken."),
                )]));
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(user_id = %user_model.id, "user registered");

        self.dispatch_activation(session, &user_model, token).await;

        self.sessions.push_notice(
            session,
            Notice::success(format!(
                "Thanks for registering, {}! An account activation link has been sent to {}.",
                user_model.name, user_model.email
            )),
        );

        if let Some(identity) = self.pending.take(session.id()) {
            self.link_pending(session, &user_model, &identity).await;
        }

        Ok(FlowOutcome::to(HOME))
    }

    async fn link_pending(
        &self,
        session: &Session,
        user_model: &user::Model,
        identity: &PendingProviderIdentity,
    ) {
        let provider = &identity.provider;
        match self.store.link_auth(user_model.id, identity).await {
            Ok(_) => self.sessions.push_notice(
                session,
                Notice::success(format!("Your account has been linked to {provider}.")),
            ),
            Err(StoreError::Conflict(detail)) => {
                tracing::info!(user_id = %user_model.id, %provider, %detail, "pending identity was linked elsewhere first");
                self.sessions.push_notice(
                    session,
                    Notice::info(format!(
                        "That {provider} account is already linked to another user."
                    )),
                );
            }
            Err(e) => {
                tracing::error!(user_id = %user_model.id, %provider, error = %e, "could not link pending identity");
                self.sessions.push_notice(
                    session,
                    Notice::warning(format!(
                        "Your account was created, but linking {provider} failed. Connect it again after logging in."
                    )),
                );
            }
        }
    }

    /// Send the activation mail. Failures never undo the registration; they are
    /// logged and reported as a warning notice.
    async fn dispatch_activation(&self, session: &Session, user_model: &user::Model, token: String) {
        let mail = ActivationMail {
            to_address: user_model.email.clone(),
            to_name: user_model.name.clone(),
            template: ACTIVATION_TEMPLATE,
            subject: "Account activation".to_string(),
            user: MailUser {
                id: user_model.id,
                name: user_model.name.clone(),
                email: user_model.email.clone(),
            },
            activation_url: self.settings.activation_url(&token),
            activation_token: token,
        };

        let failure = match tokio::time::timeout(self.settings.io_timeout, self.mailer.send(&mail))
            .await
        {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "mail sender timed out".to_string(),
        };

        tracing::warn!(user_id = %user_model.id, error = %failure, "activation mail not sent");
        self.sessions.push_notice(
            session,
            Notice::warning(
                "We could not send the activation e-mail right now. You can request a new one from the login page.",
            ),
        );
    }

    /// Look up the account behind an activation token for the confirmation page.
    ///
    /// # Errors
    ///
    /// `InvalidToken` for unknown, spent or expired tokens.
    pub async fn activation_details(&self, token: &str) -> Result<ActivationDetails, FlowError> {
        let user_id = self
            .tokens
            .resolve(token)
            .await?
            .ok_or(FlowError::InvalidToken)?;
        let user_model = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(FlowError::InvalidToken)?;

        Ok(ActivationDetails {
            name: user_model.name,
            email: user_model.email,
            token: token.to_string(),
        })
    }

    /// Spend an activation token and log its owner in.
    ///
    /// # Errors
    ///
    /// `InvalidToken` for unknown, spent or expired tokens; state is left untouched.
    pub async fn activate(&self, session: &mut Session, token: &str) -> Result<FlowOutcome, FlowError> {
        let user_id = self
            .tokens
            .consume(token)
            .await?
            .ok_or(FlowError::InvalidToken)?;
        let user_model = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(FlowError::InvalidToken)?;

        self.sessions.authenticate(session, user_model.id);
        self.sessions.push_notice(
            session,
            Notice::success(format!(
                "Account {}/{} successfully activated. You are now logged in.",
                user_model.name, user_model.email
            )),
        );
        tracing::info!(user_id = %user_model.id, "account activated");
        Ok(FlowOutcome::to(HOME))
    }

    /// Issue a new activation token and mail it, if `email` belongs to an
    /// account that still needs activating. The visible outcome is the same
    /// either way.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub async fn resend_activation(&self, session: &Session, email: &str) -> Result<FlowOutcome, FlowError> {
        let email = email.trim();
        if is_email(email)
            && let Some(user_model) = self.store.find_user_by_email(email).await?
            && !self.tokens.is_activated(user_model.id).await?
        {
            let token = self.tokens.issue(user_model.id).await?;
            self.dispatch_activation(session, &user_model, token).await;
        }

        self.sessions.push_notice(
            session,
            Notice::info(
                "If that address belongs to an account awaiting activation, a new link is on its way.",
            ),
        );
        Ok(FlowOutcome::to(LOGIN_PAGE))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Password login
    // ─────────────────────────────────────────────────────────────────────────

    /// Log in by e-mail (when the input looks like one) or by name.
    ///
    /// # Errors
    ///
    /// `TooManyAttempts`, `InvalidCredentials`, `AccountNotActivated`, or store failures.
    pub async fn login(
        &self,
        session: &mut Session,
        origin: Option<String>,
        username: &str,
        password: &str,
    ) -> Result<FlowOutcome, FlowError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(FlowError::InvalidCredentials);
        }

        self.throttle
            .check_login(username, origin.as_deref())
            .map_err(|retry_after| FlowError::TooManyAttempts {
                retry_after_secs: retry_after.as_secs().max(1),
            })?;

        let candidate = if is_email(username) {
            self.store.find_user_by_email(username).await?
        } else {
            self.store.find_user_by_name(username).await?
        };

        let Some(user_model) = candidate.filter(|u| self.password_matches(u, password)) else {
            self.throttle.record_login_failure(username, origin.as_deref());
            let key = LoginThrottle::key(username, origin.as_deref());
            tracing::info!(attempts = self.throttle.attempts(&key), "failed login");
            return Err(FlowError::InvalidCredentials);
        };
        self.throttle
            .clear(&LoginThrottle::key(username, origin.as_deref()));

        if !self.tokens.is_activated(user_model.id).await? {
            // The session never carries an unactivated user.
            if self.sessions.user_id(session).is_some() {
                self.sessions.logout(session);
            }
            return Err(FlowError::AccountNotActivated);
        }

        let user_model = self.store.record_login(user_model, origin).await?;
        self.sessions.authenticate(session, user_model.id);
        self.sessions.push_notice(
            session,
            Notice::success(format!("Welcome, {}!", user_model.name)),
        );
        tracing::info!(user_id = %user_model.id, "password login");
        Ok(FlowOutcome::to(HOME))
    }

    fn password_matches(&self, user_model: &user::Model, password: &str) -> bool {
        password::verify_password(password, &user_model.password_hash).unwrap_or_else(|e| {
            tracing::error!(user_id = %user_model.id, error = %e, "stored password hash is unreadable");
            false
        })
    }

    /// End the session's login and send the visitor back where they came from,
    /// unless that was an `auth/` page or another site.
    pub fn logout(&self, session: &mut Session, referer: Option<&str>) -> FlowOutcome {
        if let Some(user_id) = self.sessions.user_id(session) {
            tracing::info!(%user_id, "logout");
        }
        self.sessions.logout(session);
        self.sessions
            .push_notice(session, Notice::success("You are now logged out."));

        let target = referer
            .and_then(|r| self.same_site_path(r))
            .unwrap_or_else(|| HOME.to_string());
        FlowOutcome::to(target)
    }

    /// Path and query of `referer` when it resolves to a page of this site
    /// outside `auth/`.
    fn same_site_path(&self, referer: &str) -> Option<String> {
        if referer.contains('\\') || referer.chars().any(char::is_control) || referer.contains("auth/")
        {
            return None;
        }

        let base = Url::parse(&self.settings.app_url).ok()?;
        let target = base.join(referer).ok()?;
        if target.origin() != base.origin() {
            return None;
        }

        let path = target.path();
        if !path.starts_with('/') || path.starts_with("//") {
            return None;
        }
        Some(match target.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Account view
    // ─────────────────────────────────────────────────────────────────────────

    /// Summary of the logged-in account, if any.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub async fn current_account(&self, session: &Session) -> Result<Option<AccountSummary>, FlowError> {
        let Some(user_id) = self.sessions.user_id(session) else {
            return Ok(None);
        };
        let Some(user_model) = self.store.find_user(user_id).await? else {
            return Ok(None);
        };

        let providers = self
            .store
            .auths_for_user(user_id)
            .await?
            .into_iter()
            .map(|a| a.provider)
            .collect();

        Ok(Some(AccountSummary {
            id: user_model.id,
            activated: self.tokens.is_activated(user_id).await?,
            roles: self.store.roles(user_id).await?,
            name: user_model.name,
            email: user_model.email,
            providers,
        }))
    }
}
