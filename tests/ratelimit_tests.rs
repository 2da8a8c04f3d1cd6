mod common;

use std::time::Duration;

use common::*;
use ghblock::ratelimit::{BrowserLimiter, BrowserLimits, TokenBucket};
use ghblock::util::clock::Clock;

#[test]
fn test_bucket_starts_full_and_drains() {
    let clock = manual_clock();
    let bucket = TokenBucket::new(3, secs(10), as_clock(&clock));

    assert!(bucket.allow());
    assert!(bucket.allow());
    assert!(bucket.allow());
    assert!(!bucket.allow());
}

#[test]
fn test_bucket_refills_with_elapsed_time() {
    let clock = manual_clock();
    let bucket = TokenBucket::new(3, secs(10), as_clock(&clock));
    for _ in 0..3 {
        bucket.allow();
    }

    clock.advance(secs(9));
    assert!(!bucket.allow());

    clock.advance(secs(1));
    assert!(bucket.allow());
    assert!(!bucket.allow());
}

#[test]
fn test_bucket_refill_is_capped() {
    let clock = manual_clock();
    let bucket = TokenBucket::new(2, secs(1), as_clock(&clock));
    bucket.allow();

    clock.advance(secs(3600));
    assert_eq!(bucket.tokens(), 2);
}

fn limiter(max_per_minute: usize, max_per_day: usize) -> (std::sync::Arc<ghblock::util::clock::ManualClock>, BrowserLimiter) {
    let clock = manual_clock();
    let limiter = BrowserLimiter::new(
        BrowserLimits {
            max_per_minute,
            max_per_day,
            startup_delay: secs(60),
        },
        as_clock(&clock),
    );
    (clock, limiter)
}

#[test]
fn test_no_opens_during_startup_delay() {
    let (clock, limiter) = limiter(2, 10);
    let start = clock.now();

    clock.advance(secs(30));
    assert!(!limiter.can_open(start, &pr_url("acme/api", 1)));

    clock.advance(secs(30));
    assert!(limiter.can_open(start, &pr_url("acme/api", 1)));
}

#[test]
fn test_per_minute_limit() {
    let (clock, limiter) = limiter(2, 10);
    let start = clock.now();
    clock.advance(secs(120));

    limiter.record_open(&pr_url("acme/api", 1));
    clock.advance(secs(10));
    limiter.record_open(&pr_url("acme/api", 2));

    let third = pr_url("acme/api", 3);
    assert!(!limiter.can_open(start, &third));

    clock.advance(secs(49));
    assert!(!limiter.can_open(start, &third));

    // 60 s after the first open
    clock.advance(secs(1));
    assert!(limiter.can_open(start, &third));
}

#[test]
fn test_daily_limit() {
    let (clock, limiter) = limiter(100, 3);
    let start = clock.now();
    clock.advance(secs(120));

    for n in 1..=3 {
        limiter.record_open(&pr_url("acme/api", n));
        clock.advance(secs(120));
    }
    assert!(!limiter.can_open(start, &pr_url("acme/api", 4)));

    clock.advance(Duration::from_secs(24 * 3600));
    assert!(limiter.can_open(start, &pr_url("acme/api", 4)));
}

#[test]
fn test_same_url_never_opens_twice_until_reset() {
    let (clock, limiter) = limiter(2, 10);
    let start = clock.now();
    clock.advance(secs(120));
    let url = pr_url("acme/api", 1);

    assert!(limiter.can_open(start, &url));
    limiter.record_open(&url);

    clock.advance(Duration::from_secs(2 * 24 * 3600));
    assert!(!limiter.can_open(start, &url));

    limiter.reset();
    assert_eq!(limiter.opened_count(), 0);
    assert!(limiter.can_open(start, &url));
}

#[test]
fn test_reset_keeps_rolling_windows() {
    let (clock, limiter) = limiter(2, 10);
    let start = clock.now();
    clock.advance(secs(120));

    limiter.record_open(&pr_url("acme/api", 1));
    limiter.record_open(&pr_url("acme/api", 2));
    limiter.reset();

    assert!(!limiter.can_open(start, &pr_url("acme/api", 1)));
}

#[test]
fn test_can_open_does_not_record() {
    let (clock, limiter) = limiter(1, 10);
    let start = clock.now();
    clock.advance(secs(120));

    assert!(limiter.can_open(start, &pr_url("acme/api", 1)));
    assert!(limiter.can_open(start, &pr_url("acme/api", 2)));
    assert_eq!(limiter.opened_count(), 0);
}
