use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Deserialize a `T` that implements `Default` — treats JSON `null` the same as
/// a missing field (returns `T::default()`).  Use with:
///   `#[serde(default, deserialize_with = "deserialize_null_default")]`
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level gateway configuration.
///
/// Unknown keys at this level are ignored so deployment tooling can stash
/// extra sections in the same file; unknown keys inside any nested section
/// are a configuration error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub upstreams: Vec<UpstreamConfig>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub routes: Vec<RouteConfig>,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub api_keys: Vec<ApiKeyConfig>,
}

/// Main listener settings. Timeouts are whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_rw_timeout")]
    pub read_timeout: u64,

    #[serde(default = "default_rw_timeout")]
    pub write_timeout: u64,

    /// How long to wait for in-flight connections to drain on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            read_timeout: default_rw_timeout(),
            write_timeout: default_rw_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_rw_timeout() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    10
}

/// Named set of targets sharing a selection discipline and health policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    pub name: String,

    pub targets: Vec<TargetConfig>,

    /// "round_robin" (default), "least_conn", "random", "weighted_round_robin".
    #[serde(default = "default_load_balance")]
    pub load_balance: String,

    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
}

fn default_load_balance() -> String {
    "round_robin".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Absolute base URL, e.g. `http://10.0.0.4:9000` or `https://api.internal/v2`.
    pub url: String,

    /// Relative selection weight for weighted round-robin. Absent means 1;
    /// an explicit 0 keeps the target out of weighted rotation.
    #[serde(default)]
    pub weight: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckConfig {
    /// Probe path appended to each target's base URL.
    pub path: String,

    /// Seconds between probe rounds.
    #[serde(default = "default_health_interval")]
    pub interval: u64,

    /// Per-probe timeout in seconds.
    #[serde(default = "default_health_timeout")]
    pub timeout: u64,
}

fn default_health_interval() -> u64 {
    10
}

fn default_health_timeout() -> u64 {
    5
}

/// One matcher + forwarding directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    /// Stable name used in metrics and logs. Falls back to the path pattern.
    #[serde(default)]
    pub name: Option<String>,

    /// Host pattern: exact (`api.example.com`) or wildcard suffix
    /// (`*.example.com`). Absent matches any host.
    #[serde(default)]
    pub host: Option<String>,

    /// Path pattern: literals, `:name` / `{name}` parameters, `*`, and a
    /// trailing `**`.
    pub path: String,

    /// Allowed HTTP methods. Empty means all methods.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub methods: Vec<String>,

    /// Name of the upstream this route forwards to.
    pub upstream: String,

    /// Remove the matched literal prefix before forwarding.
    #[serde(default)]
    pub strip_path: bool,

    /// Static headers injected into the upstream request; last write wins.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub rate_limit: Option<RouteRateLimit>,

    /// Per-route upstream deadline in seconds; overrides the client default.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Accepted for forward compatibility; the gateway never retries.
    #[serde(default)]
    pub retry_count: Option<u32>,
}

/// Inline per-route rate limit override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteRateLimit {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub requests_per_second: f64,

    pub burst_size: u64,
}

/// Global rate limiting knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_rps")]
    pub default_rps: f64,

    #[serde(default = "default_burst")]
    pub default_burst: u64,

    /// Enforce a per-client-IP bucket.
    #[serde(default)]
    pub per_ip: bool,

    /// Enforce a per-API-key bucket.
    #[serde(default)]
    pub per_api_key: bool,

    /// Seconds between idle-bucket eviction sweeps.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            default_rps: default_rps(),
            default_burst: default_burst(),
            per_ip: false,
            per_api_key: false,
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_rps() -> f64 {
    100.0
}

fn default_burst() -> u64 {
    100
}

fn default_cleanup_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_metrics_port")]
    pub port: u16,

    #[serde(default = "default_metrics_path")]
    pub path: String,

    /// Histogram upper bounds in seconds, ascending. Absent uses built-ins.
    #[serde(default)]
    pub latency_buckets: Option<Vec<f64>>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_metrics_port(),
            path: default_metrics_path(),
            latency_buckets: None,
        }
    }
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// A recognised API client with its own admission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiKeyConfig {
    pub key: String,

    pub name: String,

    pub requests_per_second: f64,

    pub burst_size: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}
