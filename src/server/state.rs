use crate::config::GatewayConfig;
use crate::metrics::Metrics;
use crate::ratelimit::RateLimiter;
use crate::routing::RouteTable;
use crate::upstream::{build_proxy_client, ProxyClient, UpstreamStore};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// A recognised API client resolved from `api_keys` config.
#[derive(Debug, Clone)]
pub struct ApiClient {
    pub name: String,
    pub rps: f64,
    pub burst: u64,
}

/// Shared gateway state, cheaply cloneable.
///
/// Everything here is immutable after construction except the interior
/// atomics (target liveness, counters) and the concurrent registries
/// (buckets, metric series), so request handlers never take a lock to read
/// configuration or routing data.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub router: Arc<RouteTable>,
    pub upstreams: UpstreamStore,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Metrics,
    pub client: ProxyClient,
    pub api_clients: Arc<HashMap<String, ApiClient>>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let router = RouteTable::new(&config.routes)?;
        let upstreams = UpstreamStore::from_configs(&config.upstreams)?;
        let metrics = Metrics::install(config.metrics.latency_buckets.clone());

        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.default_rps,
            config.rate_limit.default_burst,
        ));

        // Seed buckets for recognised clients at full capacity so their
        // custom limits apply from the first request.
        let mut api_clients = HashMap::with_capacity(config.api_keys.len());
        for key_config in &config.api_keys {
            if !key_config.enabled {
                continue;
            }
            limiter.set_limits(
                &format!("apikey:{}", key_config.key),
                key_config.requests_per_second,
                key_config.burst_size,
            );
            api_clients.insert(
                key_config.key.clone(),
                ApiClient {
                    name: key_config.name.clone(),
                    rps: key_config.requests_per_second,
                    burst: key_config.burst_size,
                },
            );
        }

        Ok(Self {
            config: Arc::new(config),
            router: Arc::new(router),
            upstreams,
            limiter,
            metrics,
            client: build_proxy_client(),
            api_clients: Arc::new(api_clients),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKeyConfig, RouteConfig, TargetConfig, UpstreamConfig};

    fn config() -> GatewayConfig {
        GatewayConfig {
            upstreams: vec![UpstreamConfig {
                name: "backend".into(),
                targets: vec![TargetConfig {
                    url: "http://127.0.0.1:9001".into(),
                    weight: None,
                }],
                load_balance: "round_robin".into(),
                health_check: None,
            }],
            routes: vec![RouteConfig {
                name: Some("api".into()),
                host: None,
                path: "/api/**".into(),
                methods: vec![],
                upstream: "backend".into(),
                strip_path: false,
                headers: Default::default(),
                rate_limit: None,
                timeout: None,
                retry_count: None,
            }],
            api_keys: vec![ApiKeyConfig {
                key: "k-1".into(),
                name: "acme".into(),
                requests_per_second: 0.0,
                burst_size: 2,
                enabled: true,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_state_builds_and_seeds_clients() {
        let state = GatewayState::new(config()).unwrap();
        assert_eq!(state.router.len(), 1);
        assert_eq!(state.api_clients.get("k-1").unwrap().name, "acme");

        // Seeded bucket enforces the client's burst, not the default.
        assert!(state.limiter.allow("apikey:k-1"));
        assert!(state.limiter.allow("apikey:k-1"));
        assert!(!state.limiter.allow("apikey:k-1"));
    }

    #[tokio::test]
    async fn test_disabled_key_not_registered() {
        let mut cfg = config();
        cfg.api_keys[0].enabled = false;
        let state = GatewayState::new(cfg).unwrap();
        assert!(state.api_clients.is_empty());
    }
}
