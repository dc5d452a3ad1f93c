use dashmap::DashMap;
use serde::Serialize;
use std::sync::Mutex;

/// Ring capacity per key. When the ring is full the oldest quarter is
/// discarded in one move, so the copy cost stays amortised-constant.
const RING_CAPACITY: usize = 1000;

/// Per-key rolling latency window with request/error counters.
///
/// Separate from the scrape registry: quantiles are recomputed on demand
/// from the raw window rather than approximated from histogram buckets.
pub struct UsageTracker {
    entries: DashMap<String, Mutex<UsageEntry>>,
}

#[derive(Default)]
struct UsageEntry {
    samples: Vec<f64>,
    requests: u64,
    errors: u64,
}

/// One `/stats` row.
#[derive(Debug, Clone, Serialize)]
pub struct UsageStat {
    pub key: String,
    pub requests: u64,
    pub errors: u64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: &str, latency_ms: f64, is_error: bool) {
        let entry = if let Some(entry) = self.entries.get(key) {
            entry
        } else {
            self.entries
                .entry(key.to_string())
                .or_insert_with(|| Mutex::new(UsageEntry::default()))
                .downgrade()
        };

        let mut inner = entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.requests += 1;
        if is_error {
            inner.errors += 1;
        }
        if inner.samples.len() >= RING_CAPACITY {
            inner.samples.drain(0..RING_CAPACITY / 4);
        }
        inner.samples.push(latency_ms);
    }

    /// Snapshot of every tracked key, sorted by key for stable output.
    pub fn snapshot(&self) -> Vec<UsageStat> {
        let mut stats: Vec<UsageStat> = self
            .entries
            .iter()
            .map(|entry| {
                let inner = entry
                    .value()
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let mut sorted = inner.samples.clone();
                sorted.sort_unstable_by(|a, b| a.total_cmp(b));
                UsageStat {
                    key: entry.key().clone(),
                    requests: inner.requests,
                    errors: inner.errors,
                    p50_ms: percentile(&sorted, 0.50),
                    p90_ms: percentile(&sorted, 0.90),
                    p99_ms: percentile(&sorted, 0.99),
                }
            })
            .collect();
        stats.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        stats
    }
}

/// Sorted-index selection on `floor((n-1)·p)`.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).floor() as usize;
    sorted[idx]
}
