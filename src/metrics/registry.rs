use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Histogram bucket boundaries for latency metrics (seconds).
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Monotonic 64-bit counter.
#[derive(Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Signed 64-bit gauge.
#[derive(Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Fixed-bound histogram. Observations are seconds; the running sum is kept
/// as integer microseconds so concurrent observers only touch atomics.
pub struct Histogram {
    bounds: Arc<[f64]>,
    /// One counter per bound plus the overflow bucket.
    buckets: Vec<AtomicU64>,
    sum_us: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn new(bounds: Arc<[f64]>) -> Self {
        let buckets = (0..bounds.len() + 1).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            buckets,
            sum_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, seconds: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|b| seconds <= *b)
            .unwrap_or(self.bounds.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_us
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_seconds(&self) -> f64 {
        self.sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Cumulative counts per bound, ending with the `+Inf` total.
    pub fn cumulative(&self) -> Vec<u64> {
        let mut total = 0;
        self.buckets
            .iter()
            .map(|b| {
                total += b.load(Ordering::Relaxed);
                total
            })
            .collect()
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }
}

/// One metric family: a HELP string plus one primitive per label set.
/// Series creation follows the lookup-or-create pattern of the rate-limit
/// registry — a read hit never serialises, a miss is double-checked.
struct Family<T> {
    help: &'static str,
    series: DashMap<String, Arc<T>>,
}

impl<T> Family<T> {
    fn new(help: &'static str) -> Self {
        Self {
            help,
            series: DashMap::new(),
        }
    }

    fn get_or_create(&self, key: &str, make: impl FnOnce() -> T) -> Arc<T> {
        if let Some(entry) = self.series.get(key) {
            return entry.value().clone();
        }
        self.series
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(make()))
            .clone()
    }
}

/// Concurrent counter/gauge/histogram registry with Prometheus text and JSON
/// exposition. Families must be described before use; asking for an
/// undescribed family is a programming error caught in tests.
pub struct Registry {
    counters: DashMap<&'static str, Family<Counter>>,
    gauges: DashMap<&'static str, Family<Gauge>>,
    histograms: DashMap<&'static str, Family<Histogram>>,
    latency_bounds: Arc<[f64]>,
}

impl Registry {
    pub fn new(latency_bounds: Option<Vec<f64>>) -> Self {
        Self {
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
            latency_bounds: latency_bounds
                .map(Arc::from)
                .unwrap_or_else(|| Arc::from(LATENCY_BUCKETS)),
        }
    }

    pub fn describe_counter(&self, name: &'static str, help: &'static str) {
        self.counters.entry(name).or_insert_with(|| Family::new(help));
    }

    pub fn describe_gauge(&self, name: &'static str, help: &'static str) {
        self.gauges.entry(name).or_insert_with(|| Family::new(help));
    }

    pub fn describe_histogram(&self, name: &'static str, help: &'static str) {
        self.histograms.entry(name).or_insert_with(|| Family::new(help));
    }

    /// Fetch (or create) the counter series `name{key}`.
    pub fn counter(&self, name: &str, key: &str) -> Arc<Counter> {
        let family = self.counters.get(name).unwrap_or_else(|| {
            panic!("counter family {name} was never described")
        });
        family.get_or_create(key, Counter::default)
    }

    pub fn gauge(&self, name: &str, key: &str) -> Arc<Gauge> {
        let family = self.gauges.get(name).unwrap_or_else(|| {
            panic!("gauge family {name} was never described")
        });
        family.get_or_create(key, Gauge::default)
    }

    pub fn histogram(&self, name: &str, key: &str) -> Arc<Histogram> {
        let family = self.histograms.get(name).unwrap_or_else(|| {
            panic!("histogram family {name} was never described")
        });
        let bounds = self.latency_bounds.clone();
        family.get_or_create(key, || Histogram::new(bounds))
    }

    /// Render every family in Prometheus text exposition format.
    pub fn render_text(&self) -> String {
        let mut out = String::with_capacity(4096);
        let mut buf = itoa::Buffer::new();

        // Sorted family iteration keeps scrapes diff-friendly.
        let mut names: Vec<&'static str> = self.counters.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        for name in names {
            let family = match self.counters.get(name) {
                Some(f) => f,
                None => continue,
            };
            out.push_str("# HELP ");
            out.push_str(name);
            out.push(' ');
            out.push_str(family.help);
            out.push_str("\n# TYPE ");
            out.push_str(name);
            out.push_str(" counter\n");
            for (key, value) in sorted_series(&family.series, |c| c.get()) {
                write_sample(&mut out, name, &key, buf.format(value));
            }
        }

        let mut names: Vec<&'static str> = self.gauges.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        for name in names {
            let family = match self.gauges.get(name) {
                Some(f) => f,
                None => continue,
            };
            out.push_str("# HELP ");
            out.push_str(name);
            out.push(' ');
            out.push_str(family.help);
            out.push_str("\n# TYPE ");
            out.push_str(name);
            out.push_str(" gauge\n");
            for (key, value) in sorted_series(&family.series, |g| g.get()) {
                write_sample(&mut out, name, &key, buf.format(value));
            }
        }

        let mut names: Vec<&'static str> = self.histograms.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        for name in names {
            let family = match self.histograms.get(name) {
                Some(f) => f,
                None => continue,
            };
            out.push_str("# HELP ");
            out.push_str(name);
            out.push(' ');
            out.push_str(family.help);
            out.push_str("\n# TYPE ");
            out.push_str(name);
            out.push_str(" histogram\n");

            let mut keys: Vec<String> = family.series.iter().map(|e| e.key().clone()).collect();
            keys.sort_unstable();
            for key in keys {
                let Some(hist) = family.series.get(&key) else {
                    continue;
                };
                let hist = hist.value();
                let cumulative = hist.cumulative();
                for (bound, cum) in hist.bounds().iter().zip(&cumulative) {
                    out.push_str(name);
                    out.push_str("_bucket{");
                    if !key.is_empty() {
                        out.push_str("key=\"");
                        out.push_str(&key);
                        out.push_str("\",");
                    }
                    out.push_str("le=\"");
                    out.push_str(&format_bound(*bound));
                    out.push_str("\"} ");
                    out.push_str(buf.format(*cum));
                    out.push('\n');
                }
                let total = cumulative.last().copied().unwrap_or(0);
                out.push_str(name);
                out.push_str("_bucket{");
                if !key.is_empty() {
                    out.push_str("key=\"");
                    out.push_str(&key);
                    out.push_str("\",");
                }
                out.push_str("le=\"+Inf\"} ");
                out.push_str(buf.format(total));
                out.push('\n');

                out.push_str(name);
                out.push_str("_sum");
                write_key_suffix(&mut out, &key);
                out.push(' ');
                out.push_str(&format!("{}", hist.sum_seconds()));
                out.push('\n');

                out.push_str(name);
                out.push_str("_count");
                write_key_suffix(&mut out, &key);
                out.push(' ');
                out.push_str(buf.format(hist.count()));
                out.push('\n');
            }
        }

        out
    }

    /// JSON snapshot of counters and gauges: `{family: {label: value}}`.
    /// Histograms are served only through the text endpoint.
    pub fn snapshot_json(&self) -> serde_json::Value {
        let mut root = serde_json::Map::new();

        for entry in self.counters.iter() {
            let mut series = serde_json::Map::new();
            for s in entry.value().series.iter() {
                series.insert(s.key().clone(), serde_json::json!(s.value().get()));
            }
            root.insert((*entry.key()).to_string(), serde_json::Value::Object(series));
        }

        for entry in self.gauges.iter() {
            let mut series = serde_json::Map::new();
            for s in entry.value().series.iter() {
                series.insert(s.key().clone(), serde_json::json!(s.value().get()));
            }
            root.insert((*entry.key()).to_string(), serde_json::Value::Object(series));
        }

        serde_json::Value::Object(root)
    }
}

fn sorted_series<T, V: Copy>(
    series: &DashMap<String, Arc<T>>,
    read: impl Fn(&T) -> V,
) -> Vec<(String, V)> {
    let mut rows: Vec<(String, V)> = series
        .iter()
        .map(|e| (e.key().clone(), read(e.value())))
        .collect();
    rows.sort_unstable_by(|a, b| a.0.cmp(&b.0));
    rows
}

fn write_sample(out: &mut String, name: &str, key: &str, value: &str) {
    out.push_str(name);
    write_key_suffix(out, key);
    out.push(' ');
    out.push_str(value);
    out.push('\n');
}

fn write_key_suffix(out: &mut String, key: &str) {
    if !key.is_empty() {
        out.push_str("{key=\"");
        out.push_str(key);
        out.push_str("\"}");
    }
}

fn format_bound(bound: f64) -> String {
    if bound == bound.trunc() {
        format!("{:.1}", bound)
    } else {
        format!("{}", bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        let r = Registry::new(None);
        r.describe_counter("test_requests_total", "Total requests");
        r.describe_gauge("test_in_flight", "In-flight requests");
        r.describe_histogram("test_duration_seconds", "Request duration");
        r
    }

    #[test]
    fn test_counter_same_series_shared() {
        let r = registry();
        r.counter("test_requests_total", "route=a").inc();
        r.counter("test_requests_total", "route=a").inc();
        r.counter("test_requests_total", "route=b").inc();
        assert_eq!(r.counter("test_requests_total", "route=a").get(), 2);
        assert_eq!(r.counter("test_requests_total", "route=b").get(), 1);
    }

    #[test]
    fn test_gauge_inc_dec() {
        let r = registry();
        let g = r.gauge("test_in_flight", "route=a");
        g.inc();
        g.inc();
        g.dec();
        assert_eq!(g.get(), 1);
    }

    #[test]
    fn test_histogram_count_equals_bucket_sum() {
        let r = registry();
        let h = r.histogram("test_duration_seconds", "route=a");
        for v in [0.0005, 0.003, 0.02, 0.7, 42.0] {
            h.observe(v);
        }
        let cumulative = h.cumulative();
        assert_eq!(*cumulative.last().unwrap(), h.count());
        assert_eq!(h.count(), 5);
        // 42.0 lands in the overflow bucket only.
        assert_eq!(cumulative[cumulative.len() - 2], 4);
    }

    #[test]
    fn test_histogram_cumulative_is_monotonic() {
        let r = registry();
        let h = r.histogram("test_duration_seconds", "route=a");
        for v in [0.002, 0.002, 0.03, 0.2, 1.5, 9.0] {
            h.observe(v);
        }
        let cumulative = h.cumulative();
        assert!(cumulative.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_text_render_shape() {
        let r = registry();
        r.counter("test_requests_total", "route=a,method=GET,status=200")
            .inc();
        r.gauge("test_in_flight", "route=a").set(3);
        r.histogram("test_duration_seconds", "route=a").observe(0.002);

        let text = r.render_text();
        assert!(text.contains("# HELP test_requests_total Total requests"));
        assert!(text.contains("# TYPE test_requests_total counter"));
        assert!(text.contains("test_requests_total{key=\"route=a,method=GET,status=200\"} 1"));
        assert!(text.contains("test_in_flight{key=\"route=a\"} 3"));
        assert!(text.contains("test_duration_seconds_bucket{key=\"route=a\",le=\"+Inf\"} 1"));
        assert!(text.contains("test_duration_seconds_count{key=\"route=a\"} 1"));
    }

    #[test]
    fn test_unlabelled_series_renders_bare() {
        let r = registry();
        r.counter("test_requests_total", "").add(7);
        let text = r.render_text();
        assert!(text.contains("test_requests_total 7\n"));
    }

    #[test]
    fn test_json_snapshot_excludes_histograms() {
        let r = registry();
        r.counter("test_requests_total", "route=a").inc();
        r.histogram("test_duration_seconds", "route=a").observe(0.1);

        let snap = r.snapshot_json();
        assert_eq!(snap["test_requests_total"]["route=a"], 1);
        assert!(snap.get("test_duration_seconds").is_none());
    }

    #[test]
    fn test_custom_latency_bounds() {
        let r = Registry::new(Some(vec![0.1, 1.0]));
        r.describe_histogram("test_duration_seconds", "Request duration");
        let h = r.histogram("test_duration_seconds", "route=a");
        h.observe(0.05);
        h.observe(0.5);
        h.observe(5.0);
        assert_eq!(h.cumulative(), vec![1, 2, 3]);
    }
}
