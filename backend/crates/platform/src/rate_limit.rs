//! Rate Limiting Infrastructure
//!
//! Fixed-window failure counting. Each subject owns one counter: the number
//! of failures and the start of the current window. A failure after the
//! window elapsed starts a fresh window with a count of one, so a burst that
//! straddles a boundary can exceed `max_attempts` across the two windows.
//! That is accepted in exchange for O(1) state per subject.
//!
//! Counters are keyed by a SHA-256 of the normalized subject, so phone
//! numbers and codes are never held in the clear.

use crate::clock::{Clock, SystemClock};
use crate::crypto::sha256;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_WINDOW_MINUTES: u32 = 15;

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Failed attempts allowed per window
    pub max_attempts: u32,
    /// Window length
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window: Duration::from_secs(DEFAULT_WINDOW_MINUTES as u64 * 60),
        }
    }
}

/// Configuration rejected at startup
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitConfigError {
    #[error("{key} must be a positive integer, got {value:?}")]
    NotPositive { key: String, value: String },
}

impl RateLimitConfig {
    pub fn new(max_attempts: u32, window_minutes: u32) -> Result<Self, RateLimitConfigError> {
        if max_attempts == 0 {
            return Err(RateLimitConfigError::NotPositive {
                key: "max_attempts".into(),
                value: max_attempts.to_string(),
            });
        }
        if window_minutes == 0 {
            return Err(RateLimitConfigError::NotPositive {
                key: "window_minutes".into(),
                value: window_minutes.to_string(),
            });
        }
        Ok(Self {
            max_attempts,
            window: Duration::from_secs(window_minutes as u64 * 60),
        })
    }

    /// Read `{SECTION}_MAX_ATTEMPTS` and `{SECTION}_WINDOW_MINUTES` through
    /// `lookup`. Missing keys fall back to the defaults.
    pub fn from_section<F>(section: &str, lookup: F) -> Result<Self, RateLimitConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_attempts = positive_or(
            &lookup,
            &format!("{section}_MAX_ATTEMPTS"),
            DEFAULT_MAX_ATTEMPTS,
        )?;
        let window_minutes = positive_or(
            &lookup,
            &format!("{section}_WINDOW_MINUTES"),
            DEFAULT_WINDOW_MINUTES,
        )?;
        Self::new(max_attempts, window_minutes)
    }

    pub fn window_ms(&self) -> i64 {
        self.window.as_millis() as i64
    }
}

fn positive_or<F>(lookup: &F, key: &str, default: u32) -> Result<u32, RateLimitConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(RateLimitConfigError::NotPositive {
                key: key.to_string(),
                value: raw,
            }),
        },
    }
}

/// Counter state for one subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureWindow {
    pub count: u32,
    pub window_start_ms: i64,
}

impl FailureWindow {
    pub fn fresh(now_ms: i64) -> Self {
        Self {
            count: 1,
            window_start_ms: now_ms,
        }
    }

    pub fn resets_at_ms(&self, window_ms: i64) -> i64 {
        self.window_start_ms + window_ms
    }

    pub fn has_elapsed(&self, now_ms: i64, window_ms: i64) -> bool {
        now_ms >= self.resets_at_ms(window_ms)
    }

    /// State after one more failure at `now_ms`. Count and window start
    /// change together.
    pub fn after_failure(self, now_ms: i64, window_ms: i64) -> Self {
        if self.has_elapsed(now_ms, window_ms) {
            Self::fresh(now_ms)
        } else {
            Self {
                count: self.count.saturating_add(1),
                window_start_ms: self.window_start_ms,
            }
        }
    }

    pub fn blocks(&self, now_ms: i64, window_ms: i64, max_attempts: u32) -> bool {
        self.count >= max_attempts && !self.has_elapsed(now_ms, window_ms)
    }
}

/// Hashed, normalized subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubjectKey([u8; 32]);

impl SubjectKey {
    /// NFKC, trimmed, lower-cased, then SHA-256
    pub fn from_subject(subject: &str) -> Self {
        let normalized: String = subject.nfkc().collect::<String>().trim().to_lowercase();
        Self(sha256(normalized.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Storage backend failure
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit store failure: {0}")]
    Store(#[source] Box<dyn Error + Send + Sync>),
}

impl RateLimitError {
    pub fn store<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Store(Box::new(err))
    }
}

/// Trait for failure counter storage backends
///
/// `increment` must be atomic per subject: the window reset and the count
/// update are one step. A read followed by a separate write is not an
/// acceptable implementation.
#[trait_variant::make(FailureCounterStore: Send)]
pub trait LocalFailureCounterStore {
    /// Count one failure, starting a fresh window if none exists or the
    /// current one has elapsed. Returns the state after the update.
    async fn increment(
        &self,
        key: &SubjectKey,
        now_ms: i64,
        window_ms: i64,
    ) -> Result<FailureWindow, RateLimitError>;

    async fn get(&self, key: &SubjectKey) -> Result<Option<FailureWindow>, RateLimitError>;

    async fn clear(&self, key: &SubjectKey) -> Result<(), RateLimitError>;

    /// Drop counters whose window has elapsed. Returns how many were removed.
    async fn purge_expired(&self, now_ms: i64, window_ms: i64) -> Result<u64, RateLimitError>;
}

/// Process-local store
///
/// The DashMap entry guard serializes updates to one subject while other
/// subjects proceed on other shards. Clones share the same map. Deployments
/// with several service instances need a shared store instead.
#[derive(Debug, Clone, Default)]
pub struct MemoryFailureCounterStore {
    counters: Arc<DashMap<SubjectKey, FailureWindow>>,
}

impl MemoryFailureCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl FailureCounterStore for MemoryFailureCounterStore {
    async fn increment(
        &self,
        key: &SubjectKey,
        now_ms: i64,
        window_ms: i64,
    ) -> Result<FailureWindow, RateLimitError> {
        let window = match self.counters.entry(*key) {
            Entry::Occupied(mut entry) => {
                let next = entry.get().after_failure(now_ms, window_ms);
                *entry.get_mut() = next;
                next
            }
            Entry::Vacant(entry) => *entry.insert(FailureWindow::fresh(now_ms)),
        };
        Ok(window)
    }

    async fn get(&self, key: &SubjectKey) -> Result<Option<FailureWindow>, RateLimitError> {
        Ok(self.counters.get(key).map(|w| *w))
    }

    async fn clear(&self, key: &SubjectKey) -> Result<(), RateLimitError> {
        self.counters.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now_ms: i64, window_ms: i64) -> Result<u64, RateLimitError> {
        let before = self.counters.len();
        self.counters
            .retain(|_, window| !window.has_elapsed(now_ms, window_ms));
        Ok(before.saturating_sub(self.counters.len()) as u64)
    }
}

/// Rate limit check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32 },
    Blocked { retry_after_ms: i64 },
}

/// Result of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    pub window: FailureWindow,
    /// The subject is blocked after this failure
    pub blocked: bool,
    /// This failure is the one that reached the limit
    pub tripped: bool,
    pub remaining: u32,
}

/// Fixed-window limiter over a [`FailureCounterStore`]
#[derive(Debug, Clone)]
pub struct FailureLimiter<S, C = SystemClock> {
    store: S,
    config: RateLimitConfig,
    clock: C,
}

impl<S: FailureCounterStore + Sync> FailureLimiter<S, SystemClock> {
    pub fn with_system_clock(store: S, config: RateLimitConfig) -> Self {
        Self::new(store, config, SystemClock)
    }
}

impl<S, C> FailureLimiter<S, C>
where
    S: FailureCounterStore + Sync,
    C: Clock,
{
    pub fn new(store: S, config: RateLimitConfig, clock: C) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn check(&self, subject: &str) -> Result<Admission, RateLimitError> {
        let key = SubjectKey::from_subject(subject);
        let now_ms = self.clock.now_ms();
        let window_ms = self.config.window_ms();
        let max = self.config.max_attempts;

        let admission = match self.store.get(&key).await? {
            Some(window) if window.blocks(now_ms, window_ms, max) => Admission::Blocked {
                retry_after_ms: window.resets_at_ms(window_ms) - now_ms,
            },
            Some(window) if !window.has_elapsed(now_ms, window_ms) => Admission::Allowed {
                remaining: max.saturating_sub(window.count),
            },
            _ => Admission::Allowed { remaining: max },
        };
        Ok(admission)
    }

    /// `true` while the subject has `max_attempts` failures in an unexpired window
    pub async fn is_blocked(&self, subject: &str) -> Result<bool, RateLimitError> {
        Ok(matches!(self.check(subject).await?, Admission::Blocked { .. }))
    }

    /// Milliseconds until a blocked subject is admitted again
    pub async fn retry_after(&self, subject: &str) -> Result<Option<i64>, RateLimitError> {
        Ok(match self.check(subject).await? {
            Admission::Blocked { retry_after_ms } => Some(retry_after_ms),
            Admission::Allowed { .. } => None,
        })
    }

    pub async fn record_failure(&self, subject: &str) -> Result<FailureRecord, RateLimitError> {
        let key = SubjectKey::from_subject(subject);
        let now_ms = self.clock.now_ms();
        let max = self.config.max_attempts;

        let window = self
            .store
            .increment(&key, now_ms, self.config.window_ms())
            .await?;

        let tripped = window.count == max;
        if tripped {
            tracing::warn!(
                failures = window.count,
                window_start_ms = window.window_start_ms,
                "Failure limit reached"
            );
        } else {
            tracing::debug!(failures = window.count, max = max, "Failure recorded");
        }

        Ok(FailureRecord {
            window,
            blocked: window.count >= max,
            tripped,
            remaining: max.saturating_sub(window.count),
        })
    }

    /// Successful verification forgives earlier failures
    pub async fn record_success(&self, subject: &str) -> Result<(), RateLimitError> {
        self.store.clear(&SubjectKey::from_subject(subject)).await
    }

    pub async fn purge_expired(&self) -> Result<u64, RateLimitError> {
        self.store
            .purge_expired(self.clock.now_ms(), self.config.window_ms())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    const MINUTE: Duration = Duration::from_secs(60);

    fn limiter() -> (FailureLimiter<MemoryFailureCounterStore, ManualClock>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 5, 9, 0, 0).unwrap());
        let limiter = FailureLimiter::new(
            MemoryFailureCounterStore::new(),
            RateLimitConfig::default(),
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.window, Duration::from_secs(15 * 60));
        assert_eq!(config.window_ms(), 900_000);
    }

    #[test]
    fn test_config_rejects_zero() {
        assert!(RateLimitConfig::new(0, 15).is_err());
        assert!(RateLimitConfig::new(5, 0).is_err());
        assert!(RateLimitConfig::new(1, 1).is_ok());
    }

    #[test]
    fn test_config_from_section() {
        let config = RateLimitConfig::from_section("PICKUP", |key| match key {
            "PICKUP_MAX_ATTEMPTS" => Some("3".into()),
            "PICKUP_WINDOW_MINUTES" => Some(" 10 ".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.window, Duration::from_secs(600));

        let defaults = RateLimitConfig::from_section("PICKUP", |_| None).unwrap();
        assert_eq!(defaults, RateLimitConfig::default());
    }

    #[test]
    fn test_config_from_section_rejects_garbage() {
        let err = RateLimitConfig::from_section("PICKUP", |key| {
            (key == "PICKUP_WINDOW_MINUTES").then(|| "-4".to_string())
        })
        .unwrap_err();
        assert_eq!(
            err,
            RateLimitConfigError::NotPositive {
                key: "PICKUP_WINDOW_MINUTES".into(),
                value: "-4".into(),
            }
        );

        assert!(
            RateLimitConfig::from_section("PICKUP", |key| {
                (key == "PICKUP_MAX_ATTEMPTS").then(|| "0".to_string())
            })
            .is_err()
        );
    }

    #[test]
    fn test_window_transitions() {
        let w = FailureWindow::fresh(1_000);
        assert_eq!(w.count, 1);

        let w = w.after_failure(1_500, 1_000);
        assert_eq!(w, FailureWindow { count: 2, window_start_ms: 1_000 });

        // Exactly at the boundary the window has elapsed
        let w = w.after_failure(2_000, 1_000);
        assert_eq!(w, FailureWindow { count: 1, window_start_ms: 2_000 });
    }

    #[test]
    fn test_subject_key_normalizes() {
        assert_eq!(
            SubjectKey::from_subject("  +1 555 0100 "),
            SubjectKey::from_subject("+1 555 0100")
        );
        assert_eq!(
            SubjectKey::from_subject("Parent@Example.org"),
            SubjectKey::from_subject("parent@example.org")
        );
        // Fullwidth digits fold under NFKC
        assert_eq!(
            SubjectKey::from_subject("\u{FF15}\u{FF15}\u{FF15}"),
            SubjectKey::from_subject("555")
        );
        assert_ne!(SubjectKey::from_subject("a"), SubjectKey::from_subject("b"));
    }

    #[tokio::test]
    async fn test_blocks_at_max_attempts() {
        let (limiter, _clock) = limiter();

        for _ in 0..4 {
            limiter.record_failure("kiosk-3").await.unwrap();
        }
        assert!(!limiter.is_blocked("kiosk-3").await.unwrap());

        let record = limiter.record_failure("kiosk-3").await.unwrap();
        assert!(record.blocked);
        assert!(record.tripped);
        assert_eq!(record.remaining, 0);
        assert!(limiter.is_blocked("kiosk-3").await.unwrap());
    }

    #[tokio::test]
    async fn test_one_below_max_is_not_blocked() {
        let (limiter, _clock) = limiter();
        for _ in 0..4 {
            limiter.record_failure("555-0100").await.unwrap();
        }
        assert_eq!(
            limiter.check("555-0100").await.unwrap(),
            Admission::Allowed { remaining: 1 }
        );
    }

    #[tokio::test]
    async fn test_failures_one_minute_apart_block_on_fifth() {
        let (limiter, clock) = limiter();

        for minute in 0..5 {
            if minute > 0 {
                clock.advance(MINUTE);
            }
            let record = limiter.record_failure("555-0100").await.unwrap();
            assert_eq!(record.window.count, minute + 1);
        }
        assert!(limiter.is_blocked("555-0100").await.unwrap());

        // Window opened at t=0, so it unblocks at t=15
        match limiter.check("555-0100").await.unwrap() {
            Admission::Blocked { retry_after_ms } => assert_eq!(retry_after_ms, 11 * 60_000),
            other => panic!("expected block, got {other:?}"),
        }
        assert_eq!(
            limiter.retry_after("555-0100").await.unwrap(),
            Some(11 * 60_000)
        );
        assert_eq!(limiter.retry_after("555-0199").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_elapsed_window_starts_fresh() {
        let (limiter, clock) = limiter();
        for _ in 0..5 {
            limiter.record_failure("555-0100").await.unwrap();
        }
        assert!(limiter.is_blocked("555-0100").await.unwrap());

        clock.advance(15 * MINUTE);
        assert!(!limiter.is_blocked("555-0100").await.unwrap());

        let record = limiter.record_failure("555-0100").await.unwrap();
        assert_eq!(record.window.count, 1);
        assert!(!record.blocked);
    }

    #[tokio::test]
    async fn test_success_clears_counter() {
        let (limiter, _clock) = limiter();
        limiter.record_failure("555-0100").await.unwrap();
        limiter.record_failure("555-0100").await.unwrap();

        limiter.record_success("555-0100").await.unwrap();
        assert!(limiter.store().is_empty());

        let record = limiter.record_failure("555-0100").await.unwrap();
        assert_eq!(record.window.count, 1);
    }

    #[tokio::test]
    async fn test_subjects_are_independent() {
        let (limiter, _clock) = limiter();
        for _ in 0..5 {
            limiter.record_failure("kiosk-1").await.unwrap();
        }
        assert!(limiter.is_blocked("kiosk-1").await.unwrap());
        assert!(!limiter.is_blocked("kiosk-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_system_clock_limiter() {
        let limiter = FailureLimiter::with_system_clock(
            MemoryFailureCounterStore::new(),
            RateLimitConfig::new(2, 15).unwrap(),
        );
        limiter.record_failure("kiosk").await.unwrap();
        assert!(!limiter.is_blocked("kiosk").await.unwrap());

        let record = limiter.record_failure("kiosk").await.unwrap();
        assert!(record.blocked);
        assert!(limiter.is_blocked("kiosk").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (limiter, clock) = limiter();
        limiter.record_failure("old").await.unwrap();
        clock.advance(10 * MINUTE);
        limiter.record_failure("recent").await.unwrap();
        clock.advance(6 * MINUTE);

        assert_eq!(limiter.purge_expired().await.unwrap(), 1);
        assert_eq!(limiter.store().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_all_counted() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 5, 9, 0, 0).unwrap());
        let limiter = Arc::new(FailureLimiter::new(
            MemoryFailureCounterStore::new(),
            RateLimitConfig::new(1_000, 15).unwrap(),
            clock,
        ));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.record_failure("shared").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let key = SubjectKey::from_subject("shared");
        let window = FailureCounterStore::get(limiter.store(), &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(window.count, 100);
    }
}
