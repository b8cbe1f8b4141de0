use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};

use crate::auth::client_origin;
use crate::config::Environment;
use crate::sessions::Session;
use crate::state::AppState;

/// The caller's browser session, resumed from the session cookie or started anew.
///
/// Handlers that change the session must hand it back through [`with_session`]
/// so a new id reaches the browser.
#[derive(Debug, Clone)]
pub struct BrowserSession(pub Session);

impl FromRequestParts<AppState> for BrowserSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookie = cookie_value(&parts.headers, &state.config.session_cookie);
        Ok(Self(state.flow.sessions().open(cookie)))
    }
}

/// Client address of the request, see [`client_origin`].
#[derive(Debug, Clone)]
pub struct ClientOrigin(pub Option<String>);

impl FromRequestParts<AppState> for ClientOrigin {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(client_origin(
            peer,
            &parts.headers,
            state.config.trust_proxy_headers,
        )))
    }
}

/// Value of cookie `name` in the request's `Cookie` headers.
#[must_use]
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Attach `Set-Cookie` to `response` when the session id is new to the browser.
pub fn with_session(state: &AppState, session: &Session, response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    if session.is_fresh() {
        let secure = state.config.environment == Environment::Production;
        match HeaderValue::from_str(&session.cookie(&state.config.session_cookie, secure)) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::error!(error = %e, "session cookie is not a valid header value"),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_named_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; community_session=abc; x=1"));
        assert_eq!(cookie_value(&headers, "community_session"), Some("abc"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn reads_every_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1"));
        headers.append(COOKIE, HeaderValue::from_static("community_session=def"));
        assert_eq!(cookie_value(&headers, "community_session"), Some("def"));
    }
}
