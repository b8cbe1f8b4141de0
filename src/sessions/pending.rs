//! Provider identities waiting for a local account.
//!
//! When a provider callback finds no linked user and nobody is logged in, the
//! remote identity is parked here under the session id while the visitor fills in
//! the registration form. An entry is written once and consumed at most once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Remote identity captured by a provider callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingProviderIdentity {
    pub provider: String,
    pub remote_user_id: String,
    pub display_name: String,
    pub email: Option<String>,
}

#[derive(Debug)]
struct Entry {
    identity: PendingProviderIdentity,
    expires_at: Instant,
}

/// Keyed holder for pending provider identities.
#[derive(Debug, Clone)]
pub struct PendingLinks {
    entries: Arc<DashMap<String, Entry>>,
    ttl: Duration,
}

impl PendingLinks {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Park `identity` for `session_id`, replacing anything parked before.
    pub fn stash(&self, session_id: &str, identity: PendingProviderIdentity) {
        tracing::debug!(provider = %identity.provider, "pending provider identity stashed");
        self.entries.insert(
            session_id.to_string(),
            Entry {
                identity,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Look at the parked identity without consuming it.
    #[must_use]
    pub fn peek(&self, session_id: &str) -> Option<PendingProviderIdentity> {
        let entry = self.entries.get(session_id)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(session_id);
            return None;
        }
        Some(entry.identity.clone())
    }

    /// Consume the parked identity. A second call returns `None`.
    #[must_use]
    pub fn take(&self, session_id: &str) -> Option<PendingProviderIdentity> {
        let (_, entry) = self.entries.remove(session_id)?;
        (entry.expires_at > Instant::now()).then_some(entry.identity)
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> PendingProviderIdentity {
        PendingProviderIdentity {
            provider: "github".to_string(),
            remote_user_id: "42".to_string(),
            display_name: "Alice".to_string(),
            email: Some("alice@example.com".to_string()),
        }
    }

    #[test]
    fn take_consumes_exactly_once() {
        let links = PendingLinks::new(Duration::from_secs(60));
        links.stash("s1", identity());
        assert_eq!(links.take("s1"), Some(identity()));
        assert_eq!(links.take("s1"), None);
    }

    #[test]
    fn peek_does_not_consume() {
        let links = PendingLinks::new(Duration::from_secs(60));
        links.stash("s1", identity());
        assert_eq!(links.peek("s1"), Some(identity()));
        assert_eq!(links.take("s1"), Some(identity()));
    }

    #[test]
    fn entries_are_scoped_to_session() {
        let links = PendingLinks::new(Duration::from_secs(60));
        links.stash("s1", identity());
        assert_eq!(links.take("s2"), None);
        assert!(links.peek("s1").is_some());
    }

    #[test]
    fn expired_entries_are_discarded() {
        let links = PendingLinks::new(Duration::ZERO);
        links.stash("s1", identity());
        links.stash("s2", identity());
        assert_eq!(links.peek("s1"), None);
        assert_eq!(links.take("s2"), None);
        links.stash("s3", identity());
        assert_eq!(links.purge_expired(), 1);
    }
}
