use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Buckets idle for longer than this are removed by the eviction sweep.
const IDLE_EVICT_THRESHOLD: Duration = Duration::from_secs(600);

/// Concurrent token-bucket registry keyed by arbitrary strings.
///
/// Lookups hit existing buckets under the map's read path only; a miss goes
/// through the entry API, which re-checks under the shard write lock so two
/// racing callers for a new key observe exactly one bucket.
pub struct RateLimiter {
    buckets: DashMap<String, Arc<Bucket>>,
    default_rps: f64,
    default_burst: u64,
}

struct Bucket {
    inner: Mutex<BucketInner>,
}

struct BucketInner {
    tokens: f64,
    capacity: f64,
    /// Refill rate in tokens per second.
    rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rps: f64, burst: u64) -> Self {
        let capacity = burst as f64;
        Self {
            inner: Mutex::new(BucketInner {
                tokens: capacity,
                capacity,
                rate: rps,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Lazy refill, then consume one token if available. Non-suspending:
    /// the critical section is a handful of float ops.
    fn try_acquire(&self) -> bool {
        let mut b = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(b.last_refill).as_secs_f64();
        b.tokens = (b.tokens + elapsed * b.rate).min(b.capacity);
        b.last_refill = now;

        if b.tokens >= 1.0 {
            b.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn idle_since(&self) -> Instant {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last_refill
    }
}

impl RateLimiter {
    pub fn new(default_rps: f64, default_burst: u64) -> Self {
        Self {
            buckets: DashMap::new(),
            default_rps,
            default_burst,
        }
    }

    /// Returns `true` if the request for `key` is admitted under the
    /// registry defaults.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_with(key, self.default_rps, self.default_burst)
    }

    /// Admission with explicit limits — only applied when the bucket does
    /// not exist yet; an existing bucket keeps its configured shape.
    pub fn allow_with(&self, key: &str, rps: f64, burst: u64) -> bool {
        let bucket = if let Some(entry) = self.buckets.get(key) {
            entry.value().clone()
        } else {
            self.buckets
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Bucket::new(rps, burst)))
                .clone()
        };

        bucket.try_acquire()
    }

    /// Install (or replace) a bucket for `key` at full capacity. Used for
    /// recognised API clients at configuration time.
    pub fn set_limits(&self, key: &str, rps: f64, burst: u64) {
        self.buckets
            .insert(key.to_string(), Arc::new(Bucket::new(rps, burst)));
    }

    /// Remove every bucket whose last refill is older than the idle
    /// threshold. `try_acquire` refreshes the timestamp on every admission
    /// query, so this is equivalent to last-access age.
    pub fn evict_idle(&self) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.idle_since()) < IDLE_EVICT_THRESHOLD);
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Spawn the background eviction sweeper. The task exits promptly when
    /// `shutdown` is notified; the returned handle lets the caller wait for
    /// that acknowledgement. A sweep never runs partially — `evict_idle`
    /// completes before the shutdown branch can be taken.
    pub fn start_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: Arc<Notify>,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => limiter.evict_idle(),
                    _ = shutdown.notified() => return,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_admitted_then_rejected() {
        let limiter = RateLimiter::new(10.0, 10);
        let mut allowed = 0;
        for _ in 0..11 {
            if limiter.allow("ip:10.0.0.1") {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[test]
    fn test_zero_rate_never_refills() {
        let limiter = RateLimiter::new(0.0, 1);
        assert!(limiter.allow("k"));
        for _ in 0..50 {
            assert!(!limiter.allow("k"));
        }
    }

    #[test]
    fn test_zero_burst_rejects_everything() {
        let limiter = RateLimiter::new(10.0, 0);
        assert!(!limiter.allow("k"));
    }

    #[test]
    fn test_refill_restores_tokens() {
        let limiter = RateLimiter::new(1000.0, 1);
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.allow("k"));
    }

    #[test]
    fn test_tokens_clamped_to_capacity() {
        let limiter = RateLimiter::new(1000.0, 2);
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        std::thread::sleep(Duration::from_millis(50));
        // Refill far exceeds capacity; only two tokens may be stored.
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
    }

    #[test]
    fn test_distinct_keys_independent() {
        let limiter = RateLimiter::new(10.0, 1);
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
    }

    #[test]
    fn test_custom_limits_on_first_query() {
        let limiter = RateLimiter::new(10.0, 10);
        let mut allowed = 0;
        for _ in 0..10 {
            if limiter.allow_with("apikey:gold", 0.0, 3) {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
    }

    #[test]
    fn test_set_limits_replaces_bucket() {
        let limiter = RateLimiter::new(0.0, 1);
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        limiter.set_limits("k", 0.0, 5);
        let mut allowed = 0;
        for _ in 0..10 {
            if limiter.allow("k") {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[test]
    fn test_concurrent_single_key_admissions() {
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(std::thread::spawn(move || {
                let mut allowed = 0u32;
                for _ in 0..250 {
                    if limiter.allow("shared") {
                        allowed += 1;
                    }
                }
                allowed
            }));
        }
        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // 2000 attempts against burst 1000; refill during the test adds a
        // small drift on top of the burst.
        assert!(total >= 1000, "admitted {total}");
        assert!(total <= 1100, "admitted {total}");
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let limiter = Arc::new(RateLimiter::new(10.0, 10));
        let shutdown = Arc::new(Notify::new());
        let handle = limiter.start_sweeper(Duration::from_secs(3600), shutdown.clone());
        // notify_one stores a permit, so the signal is not lost if the
        // sweeper has not reached its select yet.
        shutdown.notify_one();
        handle.await.unwrap();
    }

    #[test]
    fn test_evict_idle_keeps_fresh_buckets() {
        let limiter = RateLimiter::new(10.0, 10);
        limiter.allow("fresh");
        limiter.evict_idle();
        assert_eq!(limiter.bucket_count(), 1);
    }
}
