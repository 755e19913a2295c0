use super::*;

fn quick_config(max_per_min: u32) -> RateLimitConfig {
    RateLimitConfig {
        max_per_min,
        idle_evict: Duration::from_secs(600),
        sweep_interval: Duration::from_secs(300),
    }
}

#[test]
fn full_budget_then_throttled_within_same_second() {
    let rl = RateLimiter::new(quick_config(60));
    let now = Instant::now();

    for i in 0..60 {
        assert!(rl.allow_at("alice", now), "request {i} should pass");
    }
    assert!(!rl.allow_at("alice", now), "61st request should be throttled");
}

#[test]
fn one_token_refills_after_a_second() {
    let rl = RateLimiter::new(quick_config(60));
    let start = Instant::now();

    for _ in 0..60 {
        assert!(rl.allow_at("alice", start));
    }
    assert!(!rl.allow_at("alice", start));

    // 60/min refills one token per second; exactly one request fits.
    let later = start + Duration::from_millis(1050);
    assert!(rl.allow_at("alice", later));
    assert!(!rl.allow_at("alice", later));
}

#[test]
fn distinct_identities_have_independent_budgets() {
    let rl = RateLimiter::new(quick_config(2));
    let now = Instant::now();

    assert!(rl.allow_at("alice", now));
    assert!(rl.allow_at("alice", now));
    assert!(!rl.allow_at("alice", now));

    assert!(rl.allow_at("bob", now));
}

#[test]
fn refill_is_continuous_not_stepped() {
    let rl = RateLimiter::new(quick_config(60));
    let start = Instant::now();

    for _ in 0..60 {
        rl.allow_at("alice", start);
    }

    // Half a second buys half a token; still short of one.
    assert!(!rl.allow_at("alice", start + Duration::from_millis(500)));
}

#[test]
fn refill_caps_at_capacity() {
    let rl = RateLimiter::new(quick_config(2));
    let start = Instant::now();

    assert!(rl.allow_at("alice", start));

    // A long idle gap must not bank more than the capacity.
    let much_later = start + Duration::from_secs(3600);
    assert!(rl.allow_at("alice", much_later));
    assert!(rl.allow_at("alice", much_later));
    assert!(!rl.allow_at("alice", much_later));
}

#[test]
fn sweep_evicts_only_idle_buckets() {
    let config = RateLimitConfig {
        max_per_min: 60,
        idle_evict: Duration::from_secs(600),
        sweep_interval: Duration::from_secs(300),
    };
    let rl = RateLimiter::new(config);
    let start = Instant::now();

    rl.allow_at("stale", start);
    rl.allow_at("fresh", start + Duration::from_secs(595));
    assert_eq!(rl.bucket_count(), 2);

    rl.sweep_idle_at(start + Duration::from_secs(601));
    assert_eq!(rl.bucket_count(), 1);
    assert!(rl.allow_at("fresh", start + Duration::from_secs(601)));
}

#[test]
fn clones_share_the_bucket_map() {
    let rl = RateLimiter::new(quick_config(1));
    let clone = rl.clone();
    let now = Instant::now();

    assert!(rl.allow_at("alice", now));
    assert!(!clone.allow_at("alice", now));
}

#[test]
fn config_defaults_match_constants() {
    unsafe {
        std::env::remove_var("RATE_LIMIT_PER_MIN");
        std::env::remove_var("RATE_LIMIT_IDLE_EVICT_SECS");
        std::env::remove_var("RATE_LIMIT_SWEEP_INTERVAL_SECS");
    }
    let config = RateLimitConfig::from_env();
    assert_eq!(config.max_per_min, DEFAULT_MAX_PER_MIN);
    assert_eq!(config.idle_evict, Duration::from_secs(DEFAULT_IDLE_EVICT_SECS));
    assert_eq!(config.sweep_interval, Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS));
}

#[test]
fn zero_limit_falls_back_to_default() {
    unsafe { std::env::set_var("RATE_LIMIT_PER_MIN", "0") };
    let config = RateLimitConfig::from_env();
    assert_eq!(config.max_per_min, DEFAULT_MAX_PER_MIN);
    unsafe { std::env::remove_var("RATE_LIMIT_PER_MIN") };
}
