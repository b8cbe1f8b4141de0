//! Failed-login throttling.
//!
//! Attempts are counted twice: per login identifier plus client address, and per
//! client address alone. Once a counter reaches its limit inside one lockout
//! window, it stays locked until the window ends. A successful login clears the
//! identifier counter only, so an address cycling through names still runs into
//! its own limit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone, Copy)]
struct Attempts {
    failures: u32,
    window_started: Instant,
    locked_until: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct LoginThrottle {
    attempts: Arc<DashMap<String, Attempts>>,
    max_attempts: u32,
    max_origin_attempts: u32,
    lockout: Duration,
}

impl LoginThrottle {
    #[must_use]
    pub fn new(max_attempts: u32, max_origin_attempts: u32, lockout: Duration) -> Self {
        Self {
            attempts: Arc::new(DashMap::new()),
            max_attempts: max_attempts.max(1),
            max_origin_attempts: max_origin_attempts.max(1),
            lockout,
        }
    }

    /// Throttle key for a login identifier coming from `origin`.
    #[must_use]
    pub fn key(identifier: &str, origin: Option<&str>) -> String {
        format!(
            "{}|{}",
            identifier.trim().to_lowercase(),
            origin.unwrap_or("unknown")
        )
    }

    /// Throttle key counting every failure from `origin`, whatever the identifier.
    #[must_use]
    pub fn origin_key(origin: Option<&str>) -> String {
        format!("*|{}", origin.unwrap_or("unknown"))
    }

    /// `Err(retry_after)` while either the identifier or the origin is locked out.
    ///
    /// # Errors
    ///
    /// Returns the longer remaining lockout of the two counters.
    pub fn check_login(&self, identifier: &str, origin: Option<&str>) -> Result<(), Duration> {
        let by_identifier = self.check(&Self::key(identifier, origin));
        let by_origin = self.check(&Self::origin_key(origin));
        match (by_identifier, by_origin) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(a), Err(b)) => Err(a.max(b)),
            (Err(a), Ok(())) | (Ok(()), Err(a)) => Err(a),
        }
    }

    /// Count a failed login against both the identifier and the origin.
    pub fn record_login_failure(&self, identifier: &str, origin: Option<&str>) {
        self.record(&Self::key(identifier, origin), self.max_attempts);
        self.record(&Self::origin_key(origin), self.max_origin_attempts);
    }

    /// `Err(retry_after)` while `key` is locked out.
    ///
    /// # Errors
    ///
    /// Returns the remaining lockout time if the key is locked.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let Some(entry) = self.attempts.get(key) else {
            return Ok(());
        };
        match entry.locked_until {
            Some(until) if until > Instant::now() => {
                Err(until.saturating_duration_since(Instant::now()))
            }
            _ => Ok(()),
        }
    }

    /// Count a failed attempt, locking the key once the limit is reached.
    pub fn record_failure(&self, key: &str) {
        self.record(key, self.max_attempts);
    }

    fn record(&self, key: &str, limit: u32) {
        let now = Instant::now();
        let mut entry = self.attempts.entry(key.to_string()).or_insert(Attempts {
            failures: 0,
            window_started: now,
            locked_until: None,
        });

        let lock_expired = entry.locked_until.is_some_and(|until| until <= now);
        if lock_expired || now.duration_since(entry.window_started) > self.lockout {
            *entry = Attempts {
                failures: 0,
                window_started: now,
                locked_until: None,
            };
        }

        entry.failures += 1;
        if entry.failures >= limit {
            entry.locked_until = Some(now + self.lockout);
            tracing::warn!(failures = entry.failures, "login locked out after repeated failures");
        }
    }

    /// Forget every failure recorded for `key`.
    pub fn clear(&self, key: &str) {
        self.attempts.remove(key);
    }

    /// Failures currently counted for `key`.
    #[must_use]
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.get(key).map_or(0, |entry| entry.failures)
    }

    /// Drop keys whose window and lockout are both over.
    pub fn purge_expired(&self) -> usize {
        let before = self.attempts.len();
        let now = Instant::now();
        self.attempts.retain(|_, entry| {
            entry.locked_until.is_some_and(|until| until > now)
                || now.duration_since(entry.window_started) <= self.lockout
        });
        before.saturating_sub(self.attempts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_normalizes_identifier() {
        assert_eq!(
            LoginThrottle::key(" Alice@Example.com ", Some("10.0.0.1")),
            "alice@example.com|10.0.0.1"
        );
        assert_eq!(LoginThrottle::key("bob", None), "bob|unknown");
    }

    #[test]
    fn locks_after_max_attempts() {
        let throttle = LoginThrottle::new(3, 10, Duration::from_secs(60));
        let key = "alice|1.2.3.4";
        for _ in 0..2 {
            throttle.record_failure(key);
            assert!(throttle.check(key).is_ok());
        }
        throttle.record_failure(key);
        assert_eq!(throttle.attempts(key), 3);
        let retry_after = throttle.check(key).err().unwrap_or_default();
        assert!(retry_after > Duration::from_secs(50));
    }

    #[test]
    fn clear_resets_counter() {
        let throttle = LoginThrottle::new(3, 10, Duration::from_secs(60));
        throttle.record_failure("k");
        throttle.record_failure("k");
        throttle.clear("k");
        assert_eq!(throttle.attempts("k"), 0);
        assert!(throttle.check("k").is_ok());
    }

    #[test]
    fn keys_are_independent() {
        let throttle = LoginThrottle::new(1, 10, Duration::from_secs(60));
        throttle.record_failure("a");
        assert!(throttle.check("a").is_err());
        assert!(throttle.check("b").is_ok());
    }

    #[test]
    fn lockout_ends_after_window() {
        let throttle = LoginThrottle::new(1, 10, Duration::from_millis(10));
        throttle.record_failure("k");
        assert!(throttle.check("k").is_err());
        std::thread::sleep(Duration::from_millis(20));
        assert!(throttle.check("k").is_ok());
        assert_eq!(throttle.purge_expired(), 1);
    }

    #[test]
    fn origin_is_locked_across_identifiers() {
        let throttle = LoginThrottle::new(3, 5, Duration::from_secs(60));
        let origin = Some("203.0.113.9");
        for n in 0..4 {
            let name = format!("user{n}");
            throttle.record_login_failure(&name, origin);
            assert!(throttle.check_login(&name, origin).is_ok());
        }
        throttle.record_login_failure("user4", origin);
        assert!(throttle.check_login("someone-new", origin).is_err());
        assert!(throttle.check_login("someone-new", Some("198.51.100.1")).is_ok());
    }

    #[test]
    fn clearing_identifier_keeps_origin_count() {
        let throttle = LoginThrottle::new(3, 5, Duration::from_secs(60));
        throttle.record_login_failure("alice", Some("10.0.0.1"));
        throttle.clear(&LoginThrottle::key("alice", Some("10.0.0.1")));
        assert_eq!(throttle.attempts(&LoginThrottle::key("alice", Some("10.0.0.1"))), 0);
        assert_eq!(throttle.attempts(&LoginThrottle::origin_key(Some("10.0.0.1"))), 1);
    }
}
