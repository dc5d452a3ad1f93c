pub mod least_conn;
pub mod random;
pub mod round_robin;
pub mod weighted;

use crate::config::TargetConfig;
use anyhow::{Context, Result};
use least_conn::LeastConnBalancer;
use random::RandomBalancer;
use round_robin::RoundRobinBalancer;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use weighted::WeightedBalancer;

/// A resolved upstream target. The liveness flag and in-flight counter are
/// the only mutable state; both are atomics shared through the `Arc`.
#[derive(Debug)]
pub struct Target {
    /// "http" or "https".
    pub scheme: Arc<str>,
    /// `host` or `host:port` as it appears in the upstream request URI.
    pub authority: Arc<str>,
    /// Path component of the base URL; empty when the URL had none.
    pub base_path: Arc<str>,
    /// Full base URL for probes, logs, and metric labels.
    pub base_url: Arc<str>,
    pub weight: u32,
    live: AtomicBool,
    in_flight: AtomicUsize,
}

impl Target {
    pub fn from_config(config: &TargetConfig) -> Result<Self> {
        let parsed = url::Url::parse(&config.url)
            .with_context(|| format!("invalid target url {}", config.url))?;
        let host = parsed
            .host_str()
            .with_context(|| format!("target url {} has no host", config.url))?;

        let authority = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let base_path = parsed.path().trim_end_matches('/').to_string();
        let base_url = config.url.trim_end_matches('/').to_string();

        Ok(Self {
            scheme: Arc::from(parsed.scheme()),
            authority: Arc::from(authority.as_str()),
            base_path: Arc::from(base_path.as_str()),
            base_url: Arc::from(base_url.as_str()),
            weight: config.weight.unwrap_or(1),
            live: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Acquire-load so the hot path observes the checker's latest verdict.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Release-store; written only by the health checker.
    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Release);
    }

    pub fn inc_in_flight(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_in_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

/// Enum-based load balancer — no trait objects, branch-predictable dispatch.
pub enum LoadBalancer {
    RoundRobin(RoundRobinBalancer),
    LeastConn(LeastConnBalancer),
    Random(RandomBalancer),
    WeightedRoundRobin(WeightedBalancer),
}

impl LoadBalancer {
    /// Factory mapping the configured discipline name. Unknown names fall
    /// back to round-robin; config validation rejects them before this runs.
    pub fn new(discipline: &str, targets: Vec<Arc<Target>>) -> Self {
        match discipline {
            "least_conn" => Self::LeastConn(LeastConnBalancer::new(targets)),
            "random" => Self::Random(RandomBalancer::new(targets)),
            "weighted_round_robin" => Self::WeightedRoundRobin(WeightedBalancer::new(targets)),
            _ => Self::RoundRobin(RoundRobinBalancer::new(targets)),
        }
    }

    /// Select a target. `None` only for an empty target set; when every
    /// target is down the first target is returned and the caller decides
    /// (the proxy re-checks liveness and maps a dead pick to 503, which
    /// keeps recovery probes flowing through selection).
    pub fn next(&self) -> Option<Arc<Target>> {
        match self {
            Self::RoundRobin(lb) => lb.next(),
            Self::LeastConn(lb) => lb.next(),
            Self::Random(lb) => lb.next(),
            Self::WeightedRoundRobin(lb) => lb.next(),
        }
    }

    /// Read-only snapshot of the target set.
    pub fn targets(&self) -> &[Arc<Target>] {
        match self {
            Self::RoundRobin(lb) => lb.targets(),
            Self::LeastConn(lb) => lb.targets(),
            Self::Random(lb) => lb.targets(),
            Self::WeightedRoundRobin(lb) => lb.targets(),
        }
    }

    /// Flip the liveness flag of the target identified by base URL.
    pub fn mark_live(&self, base_url: &str, live: bool) {
        if let Some(target) = self.targets().iter().find(|t| &*t.base_url == base_url) {
            target.set_live(live);
        }
    }
}

/// RAII guard pairing the in-flight increment with its decrement, so every
/// exit path of the forwarding step balances the counter exactly once.
pub struct InFlightGuard {
    target: Arc<Target>,
}

impl InFlightGuard {
    pub fn acquire(target: Arc<Target>) -> Self {
        target.inc_in_flight();
        Self { target }
    }

    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.target.dec_in_flight();
    }
}

#[cfg(test)]
pub(crate) fn test_targets(weights: &[u32]) -> Vec<Arc<Target>> {
    weights
        .iter()
        .enumerate()
        .map(|(i, w)| {
            Arc::new(
                Target::from_config(&TargetConfig {
                    url: format!("http://10.0.0.{}:9000", i + 1),
                    weight: Some(*w),
                })
                .unwrap(),
            )
        })
        .collect()
}
