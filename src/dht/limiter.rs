use parking_lot::Mutex;
use std::time::Instant;

/// Token-bucket limiter gating newly discovered nodes into the crawl.
///
/// Capacity and refill rate are both the configured friends-per-second
/// value. [`allow`](FriendsLimiter::allow) never blocks: a node that finds
/// the bucket empty is dropped, not queued or retried. This bounds the
/// outbound `find_node` rate and with it the growth of the crawl frontier.
pub struct FriendsLimiter {
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    burst: f64,
    per_sec: f64,
    last_refill: Instant,
}

impl FriendsLimiter {
    pub fn new(per_sec: usize) -> Self {
        let per_sec = per_sec.max(1) as f64;
        Self {
            bucket: Mutex::new(Bucket {
                tokens: per_sec,
                burst: per_sec,
                per_sec,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes one token if available.
    pub fn allow(&self) -> bool {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * bucket.per_sec).min(bucket.burst);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
