use oauth2::basic::{BasicErrorResponseType, BasicTokenType};
use oauth2::{
    AuthUrl, Client, ClientId, ClientSecret, EmptyExtraTokenFields, EndpointNotSet, EndpointSet,
    RedirectUrl, RevocationErrorResponseType, StandardErrorResponse, StandardRevocableToken,
    StandardTokenIntrospectionResponse, StandardTokenResponse, TokenUrl,
};
use serde::Deserialize;

use crate::config::ProviderCredentials;

/// Fully configured `OAuth2` client type (auth URI, token URI, and redirect URI all set).
pub type ConfiguredClient = Client<
    StandardErrorResponse<BasicErrorResponseType>,
    StandardTokenResponse<EmptyExtraTokenFields, BasicTokenType>,
    StandardTokenIntrospectionResponse<EmptyExtraTokenFields, BasicTokenType>,
    StandardRevocableToken,
    StandardErrorResponse<RevocationErrorResponseType>,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Static endpoints and scopes of a supported login provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderEndpoints {
    pub auth_url: &'static str,
    pub token_url: &'static str,
    pub scopes: &'static [&'static str],
}

const GITHUB: ProviderEndpoints = ProviderEndpoints {
    auth_url: "https://github.com/login/oauth/authorize",
    token_url: "https://github.com/login/oauth/access_token",
    scopes: &["read:user", "user:email"],
};

const GOOGLE: ProviderEndpoints = ProviderEndpoints {
    auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    scopes: &["openid", "email", "profile"],
};

/// Endpoints for a provider name, if the site supports it.
#[must_use]
pub fn endpoints(provider: &str) -> Option<ProviderEndpoints> {
    match provider {
        "github" => Some(GITHUB),
        "google" => Some(GOOGLE),
        _ => None,
    }
}

/// Build an `OAuth2` client for a provider from its credentials.
///
/// # Errors
///
/// Returns an error if the provider is unsupported or a URL is malformed.
pub fn client(credentials: &ProviderCredentials) -> anyhow::Result<ConfiguredClient> {
    let endpoints = endpoints(&credentials.name)
        .ok_or_else(|| anyhow::anyhow!("Unsupported provider: {}", credentials.name))?;

    let client = Client::new(ClientId::new(credentials.client_id.clone()))
        .set_client_secret(ClientSecret::new(credentials.client_secret.clone()))
        .set_auth_uri(AuthUrl::new(endpoints.auth_url.to_string())?)
        .set_token_uri(TokenUrl::new(endpoints.token_url.to_string())?)
        .set_redirect_uri(RedirectUrl::new(credentials.redirect_uri.clone())?);
    Ok(client)
}

/// Google user info returned from the userinfo endpoint.
#[derive(Debug, Deserialize)]
pub struct GoogleUserInfo {
    pub sub: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub name: Option<String>,
}

/// Fetch user info from Google's userinfo endpoint.
///
/// # Errors
///
/// Returns an error if the HTTP request fails or the response is malformed.
pub async fn fetch_google_userinfo(
    http: &reqwest::Client,
    access_token: &str,
) -> anyhow::Result<GoogleUserInfo> {
    let resp = http
        .get("https://www.googleapis.com/oauth2/v3/userinfo")
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to fetch Google userinfo: {e}"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!(
            "Google userinfo request failed ({status}): {body}"
        ));
    }

    resp.json::<GoogleUserInfo>()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse Google userinfo: {e}"))
}

/// `GitHub` user info returned from the `GitHub` API.
#[derive(Debug, Deserialize)]
pub struct GitHubUserInfo {
    pub id: i64,
    pub login: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// `GitHub` email info from the `/user/emails` endpoint.
#[derive(Debug, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    pub primary: bool,
    pub verified: bool,
}

/// Fetch user info from `GitHub`'s API.
///
/// # Errors
///
/// Returns an error if the HTTP request fails or the response is malformed.
pub async fn fetch_github_userinfo(
    http: &reqwest::Client,
    access_token: &str,
) -> anyhow::Result<GitHubUserInfo> {
    let resp = http
        .get("https://api.github.com/user")
        .bearer_auth(access_token)
        .header("User-Agent", "community-api")
        .header("Accept", "application/vnd.github+json")
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to fetch GitHub userinfo: {e}"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!(
            "GitHub userinfo request failed ({status}): {body}"
        ));
    }

    resp.json::<GitHubUserInfo>()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse GitHub userinfo: {e}"))
}

/// Fetch the primary verified email from `GitHub`'s `/user/emails` endpoint.
///
/// # Errors
///
/// Returns an error if the HTTP request fails or no primary email is found.
pub async fn fetch_github_primary_email(
    http: &reqwest::Client,
    access_token: &str,
) -> anyhow::Result<String> {
    let resp = http
        .get("https://api.github.com/user/emails")
        .bearer_auth(access_token)
        .header("User-Agent", "community-api")
        .header("Accept", "application/vnd.github+json")
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to fetch GitHub emails: {e}"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!(
            "GitHub emails request failed ({status}): {body}"
        ));
    }

    let emails: Vec<GitHubEmail> = resp
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse GitHub emails: {e}"))?;

    emails
        .into_iter()
        .find(|e| e.primary && e.verified)
        .map(|e| e.email)
        .ok_or_else(|| anyhow::anyhow!("No primary verified email found on GitHub account"))
}
