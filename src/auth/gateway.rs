//! Boundary to external login providers.
//!
//! The identity flow only sees [`ProviderGateway`]; provider wire formats stay
//! inside [`OAuthGateway`].

use std::time::Duration;

use async_trait::async_trait;
use oauth2::{AuthorizationCode, CsrfToken, Scope, TokenResponse};
use serde::Deserialize;

use crate::auth::oauth;
use crate::auth::oauth::GoogleUserInfo;
use crate::config::ProviderCredentials;

/// Query parameters a provider sends back to the callback endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Sent by some providers when the user declines the consent screen.
    pub denied: Option<String>,
    /// Standard OAuth2 error parameter (`access_denied`, ...).
    pub error: Option<String>,
}

impl CallbackParams {
    /// Whether the user declined, or the provider sent no authorization code.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.denied.is_some()
            || self.error.is_some()
            || self.code.as_deref().is_none_or(str::is_empty)
    }
}

/// Identity of a user at an external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub remote_user_id: String,
    pub display_name: String,
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("login provider {0} is not configured")]
    UnknownProvider(String),
    #[error("provider exchange failed: {0}")]
    Exchange(String),
    #[error("provider did not answer in time")]
    Timeout,
}

#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Whether `provider` is in the configured provider set.
    fn is_configured(&self, provider: &str) -> bool;

    /// URL of the provider's consent screen, carrying `state` back to the callback.
    fn authorization_redirect(&self, provider: &str, state: &str) -> Result<String, GatewayError>;

    /// Trade an authorization code for the remote identity.
    async fn exchange(&self, provider: &str, code: &str) -> Result<RemoteIdentity, GatewayError>;
}

/// Gateway backed by real `OAuth2` providers.
#[derive(Debug, Clone)]
pub struct OAuthGateway {
    providers: Vec<ProviderCredentials>,
    http: reqwest::Client,
}

impl OAuthGateway {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(providers: Vec<ProviderCredentials>, timeout: Duration) -> anyhow::Result<Self> {
        // Token endpoints must not be followed through redirects.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;

        Ok(Self { providers, http })
    }

    fn credentials(&self, provider: &str) -> Result<&ProviderCredentials, GatewayError> {
        self.providers
            .iter()
            .find(|p| p.name == provider)
            .ok_or_else(|| GatewayError::UnknownProvider(provider.to_string()))
    }

    async fn access_token(
        &self,
        credentials: &ProviderCredentials,
        code: &str,
    ) -> Result<String, GatewayError> {
        let client =
            oauth::client(credentials).map_err(|e| GatewayError::Exchange(e.to_string()))?;
        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| GatewayError::Exchange(format!("code exchange rejected: {e}")))?;
        Ok(token.access_token().secret().clone())
    }

    async fn github_identity(&self, access_token: &str) -> anyhow::Result<RemoteIdentity> {
        let info = oauth::fetch_github_userinfo(&self.http, access_token).await?;
        let email = match info.email {
            Some(email) => Some(email),
            None => oauth::fetch_github_primary_email(&self.http, access_token)
                .await
                .ok(),
        };

        Ok(RemoteIdentity {
            remote_user_id: info.id.to_string(),
            display_name: info.name.unwrap_or(info.login),
            email,
        })
    }

    async fn google_identity(&self, access_token: &str) -> anyhow::Result<RemoteIdentity> {
        let info = oauth::fetch_google_userinfo(&self.http, access_token).await?;
        Ok(google_identity_from(info))
    }
}

/// Map Google's userinfo to a remote identity. The address is only kept when
/// Google says it is verified.
fn google_identity_from(info: GoogleUserInfo) -> RemoteIdentity {
    let email = info.email.filter(|_| info.email_verified == Some(true));
    let display_name = info
        .name
        .or_else(|| email.clone())
        .unwrap_or_else(|| info.sub.clone());

    RemoteIdentity {
        remote_user_id: info.sub,
        display_name,
        email,
    }
}

#[async_trait]
impl ProviderGateway for OAuthGateway {
    fn is_configured(&self, provider: &str) -> bool {
        self.credentials(provider).is_ok()
    }

    fn authorization_redirect(&self, provider: &str, state: &str) -> Result<String, GatewayError> {
        let credentials = self.credentials(provider)?;
        let endpoints = oauth::endpoints(provider)
            .ok_or_else(|| GatewayError::UnknownProvider(provider.to_string()))?;
        let client =
            oauth::client(credentials).map_err(|e| GatewayError::Exchange(e.to_string()))?;

        let (url, _csrf) = client
            .authorize_url(|| CsrfToken::new(state.to_string()))
            .add_scopes(
                endpoints
                    .scopes
                    .iter()
                    .map(|scope| Scope::new((*scope).to_string())),
            )
            .url();

        Ok(url.to_string())
    }

    async fn exchange(&self, provider: &str, code: &str) -> Result<RemoteIdentity, GatewayError> {
        let credentials = self.credentials(provider)?;
        if code.is_empty() {
            return Err(GatewayError::Exchange("empty authorization code".to_string()));
        }
        let access_token = self.access_token(credentials, code).await?;

        let identity = match provider {
            "github" => self.github_identity(&access_token).await,
            "google" => self.google_identity(&access_token).await,
            other => return Err(GatewayError::UnknownProvider(other.to_string())),
        };
        identity.map_err(|e| GatewayError::Exchange(e.to_string()))
    }
}
