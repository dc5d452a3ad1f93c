pub mod registry;
pub mod usage;

pub use registry::{Counter, Gauge, Histogram, Registry};
pub use usage::{UsageStat, UsageTracker};

use std::sync::Arc;

// Metric family names. Labels are flattened into the series key, e.g.
// `gateway_requests_total{key="route=users,method=GET,status=200"}`.
pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
pub const UPSTREAM_DURATION_SECONDS: &str = "gateway_upstream_duration_seconds";
pub const REQUESTS_IN_FLIGHT: &str = "gateway_requests_in_flight";
pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
pub const ERRORS_TOTAL: &str = "gateway_errors_total";
pub const CLIENT_REQUESTS_TOTAL: &str = "gateway_client_requests_total";
pub const UPSTREAM_HEALTH: &str = "gateway_upstream_health";
pub const CONNECTIONS_TOTAL: &str = "gateway_connections_total";
pub const CONNECTIONS_ACTIVE: &str = "gateway_connections_active";

/// Shared observability handle: the scrape registry plus the rolling usage
/// window behind `/stats`. Cheap to clone.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    pub usage: Arc<UsageTracker>,
}

impl Metrics {
    /// Build the registry and register every family description up front so
    /// the scrape output carries HELP/TYPE lines from the first request.
    pub fn install(latency_buckets: Option<Vec<f64>>) -> Self {
        let registry = Registry::new(latency_buckets);

        registry.describe_counter(REQUESTS_TOTAL, "Total HTTP requests processed");
        registry.describe_histogram(
            REQUEST_DURATION_SECONDS,
            "Total request duration from client perspective",
        );
        registry.describe_histogram(
            UPSTREAM_DURATION_SECONDS,
            "Upstream request duration (time spent waiting for upstream)",
        );
        registry.describe_gauge(
            REQUESTS_IN_FLIGHT,
            "Number of requests currently being processed",
        );
        registry.describe_counter(
            RATE_LIMITED_TOTAL,
            "Total requests rejected by the rate limiter",
        );
        registry.describe_counter(ERRORS_TOTAL, "Total gateway errors by reason");
        registry.describe_counter(
            CLIENT_REQUESTS_TOTAL,
            "Total requests attributed to recognised API clients",
        );
        registry.describe_gauge(UPSTREAM_HEALTH, "Target health: 1=live 0=down");
        registry.describe_counter(CONNECTIONS_TOTAL, "Total connections accepted");
        registry.describe_gauge(CONNECTIONS_ACTIVE, "Number of active downstream connections");

        Self {
            registry: Arc::new(registry),
            usage: Arc::new(UsageTracker::new()),
        }
    }
}
