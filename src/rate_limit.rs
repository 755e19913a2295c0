//! In-memory admission limiting for suggestion requests.
//!
//! DESIGN
//! ======
//! Continuous token buckets keyed by caller identity, backed by a
//! `HashMap<String, Bucket>` behind one mutex. A bucket starts at
//! `max_per_min` tokens and refills at `max_per_min / 60` tokens per
//! second; each allowed request spends one token. Refill and decision
//! happen atomically per call, and no I/O ever runs under the lock.
//!
//! TRADE-OFFS
//! ==========
//! Buckets live in process memory only, so a restart resets all quotas.
//! A background sweep evicts buckets idle past a configurable threshold,
//! bounding memory under churn of many distinct identities.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const DEFAULT_MAX_PER_MIN: u32 = 60;
const DEFAULT_IDLE_EVICT_SECS: u64 = 600;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Retry hint attached to every denial, in seconds.
pub const RETRY_AFTER_SECS: u64 = 5;

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Clone, Copy)]
pub struct RateLimitConfig {
    /// Bucket capacity; also the sustained requests-per-minute budget.
    pub max_per_min: u32,
    /// Buckets untouched for longer than this are eligible for eviction.
    pub idle_evict: Duration,
    /// How often the background sweep scans for idle buckets.
    pub sweep_interval: Duration,
}

impl RateLimitConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let max_per_min: u32 = env_parse("RATE_LIMIT_PER_MIN", DEFAULT_MAX_PER_MIN);
        Self {
            max_per_min: if max_per_min == 0 { DEFAULT_MAX_PER_MIN } else { max_per_min },
            idle_evict: Duration::from_secs(env_parse("RATE_LIMIT_IDLE_EVICT_SECS", DEFAULT_IDLE_EVICT_SECS)),
            sweep_interval: Duration::from_secs(env_parse(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_min: DEFAULT_MAX_PER_MIN,
            idle_evict: Duration::from_secs(DEFAULT_IDLE_EVICT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// =============================================================================
// RATE LIMITER
// =============================================================================

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-identity token-bucket limiter. Cheap to clone; clones share the
/// same bucket map. Constructed explicitly so tests can run independent
/// instances with their own configs and clocks.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self { buckets: Arc::new(Mutex::new(HashMap::new())), config }
    }

    /// Refill the identity's bucket, then try to spend one token.
    /// Returns false when the request must be throttled.
    pub fn allow(&self, identity: &str) -> bool {
        self.allow_at(identity, Instant::now())
    }

    /// Internal: allow with an explicit clock (for testing).
    fn allow_at(&self, identity: &str, now: Instant) -> bool {
        let capacity = f64::from(self.config.max_per_min);
        let rate = capacity / 60.0;

        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let bucket = buckets
            .entry(identity.to_owned())
            .or_insert(Bucket { tokens: capacity, last_refill: now });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets idle longer than the eviction threshold.
    pub fn sweep_idle(&self) {
        self.sweep_idle_at(Instant::now());
    }

    fn sweep_idle_at(&self, now: Instant) {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        buckets.retain(|_, b| now.saturating_duration_since(b.last_refill) <= self.config.idle_evict);
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

/// Spawn the periodic idle-bucket sweep. Returns a handle for shutdown.
pub fn spawn_sweep_task(limiter: RateLimiter) -> JoinHandle<()> {
    let interval = limiter.config.sweep_interval;
    tracing::info!(sweep_interval_secs = interval.as_secs(), "rate-limit sweep configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            limiter.sweep_idle();
        }
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
