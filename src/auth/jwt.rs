use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Lifetime of an OAuth `state` value in seconds.
const OAUTH_STATE_TTL_SECS: i64 = 1800;

/// Claims for OAuth CSRF state tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthStateClaims {
    pub csrf: String,
    /// Provider the consent screen was opened for.
    pub provider: String,
    /// SHA-256 of the session id that opened the consent screen.
    pub session: String,
    pub exp: i64,
    pub iat: i64,
}

/// Digest of a session id as carried in the state. The raw id never leaves
/// the cookie.
fn session_binding(session_id: &str) -> String {
    format!("{:x}", Sha256::digest(session_id.as_bytes()))
}

/// Generate a short-lived JWT for OAuth CSRF state (30 minutes), bound to the
/// provider and to the browser session that requested it.
///
/// # Errors
///
/// Returns an error if JWT encoding fails.
pub fn generate_oauth_state(
    secret: &str,
    provider: &str,
    session_id: &str,
) -> anyhow::Result<String> {
    let now = Utc::now();

    let claims = OAuthStateClaims {
        csrf: Uuid::new_v4().to_string(),
        provider: provider.to_string(),
        session: session_binding(session_id),
        exp: now.timestamp() + OAUTH_STATE_TTL_SECS,
        iat: now.timestamp(),
    };

    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), &claims, &key)
        .map_err(|e| anyhow::anyhow!("Failed to encode OAuth state: {e}"))
}

/// Validate an OAuth CSRF state token issued for `provider` to `session_id`.
///
/// # Errors
///
/// Returns an error if the state token is invalid, expired, or was issued for
/// a different provider or session.
pub fn validate_oauth_state(
    state: &str,
    secret: &str,
    provider: &str,
    session_id: &str,
) -> anyhow::Result<OAuthStateClaims> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::default();

    let token_data = decode::<OAuthStateClaims>(state, &key, &validation)
        .map_err(|e| anyhow::anyhow!("Invalid OAuth state: {e}"))?;

    if token_data.claims.provider != provider {
        return Err(anyhow::anyhow!(
            "OAuth state was issued for {}, not {provider}",
            token_data.claims.provider
        ));
    }
    if token_data.claims.session != session_binding(session_id) {
        return Err(anyhow::anyhow!("OAuth state was issued to another session"));
    }

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-for-testing-only-32chars";
    const SESSION: &str = "5f2b9c0e";

    #[test]
    fn state_round_trips_for_same_provider() {
        let state = generate_oauth_state(SECRET, "github", SESSION).unwrap_or_default();
        let claims = validate_oauth_state(&state, SECRET, "github", SESSION);
        assert!(claims.is_ok_and(|c| c.provider == "github"));
    }

    #[test]
    fn state_is_bound_to_provider() {
        let state = generate_oauth_state(SECRET, "github", SESSION).unwrap_or_default();
        assert!(validate_oauth_state(&state, SECRET, "google", SESSION).is_err());
    }

    #[test]
    fn state_is_bound_to_session() {
        let state = generate_oauth_state(SECRET, "github", SESSION).unwrap_or_default();
        assert!(validate_oauth_state(&state, SECRET, "github", "a-different-session").is_err());
    }

    #[test]
    fn state_does_not_carry_the_session_id() {
        let state = generate_oauth_state(SECRET, "github", SESSION).unwrap_or_default();
        let claims = validate_oauth_state(&state, SECRET, "github", SESSION);
        assert!(claims.is_ok_and(|c| c.session.len() == 64 && c.session != SESSION));
    }

    #[test]
    fn state_signed_with_other_secret_is_rejected() {
        let state = generate_oauth_state(SECRET, "github", SESSION).unwrap_or_default();
        assert!(
            validate_oauth_state(&state, "another-secret-another-secret-00", "github", SESSION)
                .is_err()
        );
    }
}
