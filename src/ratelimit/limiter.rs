//! Core rate limiter implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::config::RateLimitingConfig;

use super::ledger::{ClientRecord, Ledger};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is within the client's limit and may proceed.
    Allow,
    /// The request exceeded the limit and must be rejected.
    Deny,
}

impl Decision {
    /// Whether this decision admits the request.
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// The core rate limiter: fixed-window admission per client identifier plus
/// a request-volume-driven TTL eviction sweep over the ledger.
///
/// This struct is thread-safe and can be shared across multiple tasks. The
/// whole fetch/reset/increment/compare sequence for one identifier runs under
/// a single write-lock section, so concurrent requests from the same
/// identifier can never both be admitted on the last remaining slot.
pub struct RateLimiter {
    /// Client rate state, indexed by identifier
    ledger: RwLock<Ledger>,
    /// Maximum requests admitted per identifier per window
    limit: u32,
    /// Fixed window length in seconds
    window_secs: u64,
    /// Inactivity TTL in seconds before a record is evicted
    cleanup_ttl_secs: u64,
    /// Number of requests between eviction sweeps
    cleanup_interval: u64,
    /// Hard cap on tracked identifiers; 0 disables the cap
    max_tracked_clients: usize,
    /// Process-wide request counter, incremented once per connection
    request_counter: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter from configuration.
    pub fn new(config: &RateLimitingConfig) -> Self {
        Self {
            ledger: RwLock::new(Ledger::new()),
            limit: config.limit,
            window_secs: config.window_secs,
            cleanup_ttl_secs: config.cleanup_ttl_secs,
            cleanup_interval: config.cleanup_interval.max(1),
            max_tracked_clients: config.max_tracked_clients,
            request_counter: AtomicU64::new(0),
        }
    }

    /// Process one request from an identifier: run the admission check,
    /// increment the global request counter, and run an eviction sweep when
    /// the counter lands on an exact multiple of the cleanup interval.
    ///
    /// The sweep runs synchronously, before the caller produces a response.
    pub fn admit(&self, identifier: &str) -> Decision {
        self.admit_at(identifier, unix_now())
    }

    /// Like [`admit`](Self::admit) with an explicit timestamp.
    pub fn admit_at(&self, identifier: &str, now: u64) -> Decision {
        let decision = self.check_at(identifier, now);

        let requests = self.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if requests % self.cleanup_interval == 0 {
            self.sweep_at(now);
        }

        decision
    }

    /// Fixed-window admission check for one identifier.
    ///
    /// Mutates the identifier's record: refreshes `last_seen`, opens a fresh
    /// window if none is open or the current one has expired, and counts the
    /// request whether or not it is admitted.
    pub fn check_at(&self, identifier: &str, now: u64) -> Decision {
        let mut ledger = self.ledger.write();

        // Reject unknown identifiers outright once the ledger is full, so an
        // identifier flood cannot grow memory between sweeps.
        if self.max_tracked_clients > 0
            && ledger.len() >= self.max_tracked_clients
            && ledger.get(identifier).is_none()
        {
            warn!(
                identifier = %identifier,
                tracked = ledger.len(),
                "Ledger at capacity, denying untracked client"
            );
            return Decision::Deny;
        }

        let record = ledger.get_or_create(identifier);
        record.last_seen = now;

        let window_expired = match record.window_start {
            Some(start) => now.saturating_sub(start) > self.window_secs,
            None => true,
        };
        if window_expired {
            trace!(identifier = %identifier, "Opening fresh window");
            record.count = 0;
            record.window_start = Some(now);
        }

        record.count = record.count.saturating_add(1);

        if record.count > self.limit {
            debug!(
                identifier = %identifier,
                count = record.count,
                limit = self.limit,
                "Rate limit exceeded"
            );
            Decision::Deny
        } else {
            Decision::Allow
        }
    }

    /// Evict every record whose inactivity exceeds the cleanup TTL.
    ///
    /// Surviving records keep their `count` and `window_start` untouched.
    pub fn sweep_at(&self, now: u64) {
        let mut ledger = self.ledger.write();
        let ttl = self.cleanup_ttl_secs;
        let evicted = ledger.retain(|_, record| now.saturating_sub(record.last_seen) <= ttl);

        for identifier in &evicted {
            info!(identifier = %identifier, "Evicted inactive client");
        }
        debug!(
            evicted = evicted.len(),
            tracked = ledger.len(),
            "Eviction sweep complete"
        );
    }

    /// Get a snapshot of an identifier's record, if one exists.
    pub fn record(&self, identifier: &str) -> Option<ClientRecord> {
        self.ledger.read().get(identifier).copied()
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.ledger.read().len()
    }

    /// Total requests processed so far.
    pub fn request_count(&self) -> u64 {
        self.request_counter.load(Ordering::SeqCst)
    }

    /// Drop all client records.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.ledger.write().clear();
    }
}

/// Current unix time in whole seconds.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_config() -> RateLimitingConfig {
        RateLimitingConfig {
            limit: 5,
            window_secs: 60,
            cleanup_ttl_secs: 300,
            cleanup_interval: 30,
            max_tracked_clients: 0,
        }
    }

    #[test]
    fn test_window_admission() {
        let limiter = RateLimiter::new(&test_config());

        for _ in 0..5 {
            assert_eq!(limiter.check_at("10.0.0.1", 0), Decision::Allow);
        }
        assert_eq!(limiter.check_at("10.0.0.1", 10), Decision::Deny);
    }

    #[test]
    fn test_window_reset() {
        let limiter = RateLimiter::new(&test_config());

        for _ in 0..6 {
            limiter.check_at("10.0.0.1", 0);
        }
        assert_eq!(limiter.check_at("10.0.0.1", 61), Decision::Allow);

        let record = limiter.record("10.0.0.1").unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, Some(61));
    }

    #[test]
    fn test_window_opened_at_time_zero_is_not_reopened() {
        let limiter = RateLimiter::new(&test_config());

        for _ in 0..3 {
            limiter.check_at("10.0.0.1", 0);
        }

        // The window opened at unix time 0 must persist; each request at t=0
        // accumulates instead of opening a fresh window.
        let record = limiter.record("10.0.0.1").unwrap();
        assert_eq!(record.count, 3);
        assert_eq!(record.window_start, Some(0));
    }

    #[test]
    fn test_count_saturates_instead_of_overflowing() {
        let limiter = RateLimiter::new(&test_config());

        limiter.check_at("10.0.0.1", 0);
        limiter.ledger.write().get_or_create("10.0.0.1").count = u32::MAX;

        assert_eq!(limiter.check_at("10.0.0.1", 1), Decision::Deny);
        assert_eq!(limiter.record("10.0.0.1").unwrap().count, u32::MAX);
    }

    #[test]
    fn test_strict_boundary() {
        let limiter = RateLimiter::new(&test_config());

        for i in 1..=5 {
            assert_eq!(
                limiter.check_at("10.0.0.1", 0),
                Decision::Allow,
                "request {} should be admitted",
                i
            );
        }
        assert_eq!(limiter.check_at("10.0.0.1", 0), Decision::Deny);
    }

    #[test]
    fn test_denied_request_still_counts_and_touches_last_seen() {
        let limiter = RateLimiter::new(&test_config());

        for _ in 0..5 {
            limiter.check_at("10.0.0.1", 0);
        }
        limiter.check_at("10.0.0.1", 42);

        let record = limiter.record("10.0.0.1").unwrap();
        assert_eq!(record.count, 6);
        assert_eq!(record.last_seen, 42);
    }

    #[test]
    fn test_eviction_correctness() {
        let limiter = RateLimiter::new(&test_config());
        let now = 1000;

        // Stale: inactive for TTL + 1 seconds.
        limiter.check_at("10.0.0.1", now - 301);
        // Fresh: inactive for TTL - 1 seconds.
        limiter.check_at("10.0.0.2", now - 299);
        let fresh_before = limiter.record("10.0.0.2").unwrap();

        limiter.sweep_at(now);

        assert!(limiter.record("10.0.0.1").is_none());
        assert_eq!(limiter.record("10.0.0.2"), Some(fresh_before));
    }

    #[test]
    fn test_exact_ttl_is_retained() {
        let limiter = RateLimiter::new(&test_config());
        let now = 1000;

        limiter.check_at("10.0.0.1", now - 300);
        limiter.sweep_at(now);

        assert!(limiter.record("10.0.0.1").is_some());
    }

    #[test]
    fn test_sweep_cadence() {
        let config = RateLimitingConfig {
            cleanup_interval: 4,
            ..test_config()
        };
        let limiter = RateLimiter::new(&config);

        // A record that will be stale by the time requests arrive at t=1000.
        limiter.admit_at("10.0.0.9", 0);
        assert_eq!(limiter.request_count(), 1);

        // Requests 2 and 3 must not sweep.
        limiter.admit_at("10.0.0.1", 1000);
        limiter.admit_at("10.0.0.1", 1000);
        assert!(limiter.record("10.0.0.9").is_some());

        // Request 4 lands on the interval and sweeps.
        limiter.admit_at("10.0.0.1", 1000);
        assert_eq!(limiter.request_count(), 4);
        assert!(limiter.record("10.0.0.9").is_none());
        assert!(limiter.record("10.0.0.1").is_some());
    }

    #[test]
    fn test_post_eviction_identity() {
        let limiter = RateLimiter::new(&test_config());

        for _ in 0..6 {
            limiter.check_at("10.0.0.1", 0);
        }
        limiter.sweep_at(1000);
        assert!(limiter.record("10.0.0.1").is_none());

        // Next request is treated as a brand-new client.
        assert_eq!(limiter.check_at("10.0.0.1", 1000), Decision::Allow);
        let record = limiter.record("10.0.0.1").unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, Some(1000));
    }

    #[test]
    fn test_ledger_size_cap() {
        let config = RateLimitingConfig {
            max_tracked_clients: 2,
            ..test_config()
        };
        let limiter = RateLimiter::new(&config);

        assert_eq!(limiter.check_at("10.0.0.1", 0), Decision::Allow);
        assert_eq!(limiter.check_at("10.0.0.2", 0), Decision::Allow);

        // Unknown identifier is denied without creating a record.
        assert_eq!(limiter.check_at("10.0.0.3", 0), Decision::Deny);
        assert!(limiter.record("10.0.0.3").is_none());
        assert_eq!(limiter.tracked_clients(), 2);

        // Known identifiers are unaffected by the cap.
        assert_eq!(limiter.check_at("10.0.0.1", 0), Decision::Allow);
    }

    #[tokio::test]
    async fn test_concurrent_requests_single_slot() {
        let limiter = Arc::new(RateLimiter::new(&test_config()));

        // Bring the count to limit - 1.
        for _ in 0..4 {
            limiter.check_at("10.0.0.1", 0);
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.check_at("10.0.0.1", 0)
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().is_allow() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 1, "exactly one of the racing requests may win the last slot");
    }
}
