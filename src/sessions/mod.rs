//! Server-side browser sessions.
//!
//! A session is an opaque id carried in a cookie. The store keeps, per id, the
//! authenticated user (if any) and the flash notices waiting to be shown. The id
//! is replaced whenever the authentication state changes.

pub mod pending;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::utils::{generate_secret, is_well_formed_secret};

pub use pending::{PendingLinks, PendingProviderIdentity};

/// Severity of a flash notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// Human-readable message shown once on the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    #[must_use]
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }

    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }
}

/// Handle to the caller's session for the duration of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
    /// The id is not yet known to the browser and must be sent as a cookie.
    fresh: bool,
}

impl Session {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// `Set-Cookie` value carrying this session's id.
    #[must_use]
    pub fn cookie(&self, name: &str, secure: bool) -> String {
        let secure = if secure { "; Secure" } else { "" };
        format!("{name}={}; Path=/; HttpOnly; SameSite=Lax{secure}", self.id)
    }
}

#[derive(Debug)]
struct SessionData {
    user_id: Option<Uuid>,
    notices: Vec<Notice>,
    last_seen: Instant,
}

impl SessionData {
    fn new() -> Self {
        Self {
            user_id: None,
            notices: Vec::new(),
            last_seen: Instant::now(),
        }
    }
}

/// In-memory session store shared by all requests.
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, SessionData>>,
    ttl: Duration,
}

impl SessionStore {
    /// Create an empty store whose sessions expire after `ttl` without activity.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Resume the session named by the cookie value, or start a new one.
    #[must_use]
    pub fn open(&self, cookie: Option<&str>) -> Session {
        if let Some(id) = cookie.filter(|id| is_well_formed_secret(id))
            && let Some(mut data) = self.sessions.get_mut(id)
        {
            if data.last_seen.elapsed() <= self.ttl {
                data.last_seen = Instant::now();
                return Session {
                    id: id.to_string(),
                    fresh: false,
                };
            }
            drop(data);
            self.sessions.remove(id);
        }
        self.start()
    }

    /// Start a new anonymous session.
    #[must_use]
    pub fn start(&self) -> Session {
        let id = generate_secret();
        self.sessions.insert(id.clone(), SessionData::new());
        Session { id, fresh: true }
    }

    /// The authenticated user of the session, if any.
    #[must_use]
    pub fn user_id(&self, session: &Session) -> Option<Uuid> {
        self.sessions.get(&session.id).and_then(|data| data.user_id)
    }

    #[must_use]
    pub fn is_guest(&self, session: &Session) -> bool {
        self.user_id(session).is_none()
    }

    /// Log `user_id` in, moving the session to a new id.
    pub fn authenticate(&self, session: &mut Session, user_id: Uuid) {
        self.rotate(session, Some(user_id));
        tracing::debug!(%user_id, "session authenticated");
    }

    /// Drop the session's user, moving the session to a new id.
    pub fn logout(&self, session: &mut Session) {
        self.rotate(session, None);
    }

    /// Queue a notice for the next page rendered in this session.
    pub fn push_notice(&self, session: &Session, notice: Notice) {
        self.sessions
            .entry(session.id.clone())
            .or_insert_with(SessionData::new)
            .notices
            .push(notice);
    }

    /// Take every queued notice, oldest first.
    #[must_use]
    pub fn take_notices(&self, session: &Session) -> Vec<Notice> {
        self.sessions
            .get_mut(&session.id)
            .map(|mut data| std::mem::take(&mut data.notices))
            .unwrap_or_default()
    }

    /// Remove sessions idle for longer than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, data| data.last_seen.elapsed() <= self.ttl);
        before.saturating_sub(self.sessions.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn rotate(&self, session: &mut Session, user_id: Option<Uuid>) {
        let notices = self
            .sessions
            .remove(&session.id)
            .map(|(_, data)| data.notices)
            .unwrap_or_default();

        let id = generate_secret();
        self.sessions.insert(
            id.clone(),
            SessionData {
                user_id,
                notices,
                last_seen: Instant::now(),
            },
        );
        session.id = id;
        session.fresh = true;
    }
}
