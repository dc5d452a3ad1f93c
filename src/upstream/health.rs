use crate::config::HealthCheckConfig;
use crate::metrics::{self, Metrics};
use crate::upstream::loadbalance::Target;
use crate::upstream::store::{Upstream, UpstreamStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawn one checker task per upstream that declares a health policy and
/// return their join handles; the bootstrap awaits them after signalling
/// shutdown so termination is acknowledged before the process exits.
pub fn spawn_health_checkers(
    store: &UpstreamStore,
    metrics: &Metrics,
    shutdown: &Arc<Notify>,
) -> Vec<JoinHandle<()>> {
    let client = build_health_check_client();

    store
        .iter()
        .filter_map(|upstream| {
            let policy = upstream.health_check()?.clone();
            Some(tokio::spawn(run_checker(
                upstream.clone(),
                policy,
                client.clone(),
                metrics.clone(),
                shutdown.clone(),
            )))
        })
        .collect()
}

pub fn build_health_check_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .no_proxy()
        .build()
        .expect("failed to build health check client")
}

/// One upstream's probe loop: an immediate initial round, then a ticker at
/// the configured interval. Targets are probed sequentially within a round.
async fn run_checker(
    upstream: Arc<Upstream>,
    policy: HealthCheckConfig,
    client: reqwest::Client,
    metrics: Metrics,
    shutdown: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(policy.interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for target in upstream.targets() {
                    probe_target(&client, &upstream, target, &policy, &metrics).await;
                }
            }
            _ = shutdown.notified() => {
                debug!("health: checker stopped, upstream={}", upstream.name());
                return;
            }
        }
    }
}

async fn probe_target(
    client: &reqwest::Client,
    upstream: &Upstream,
    target: &Arc<Target>,
    policy: &HealthCheckConfig,
    metrics: &Metrics,
) {
    let url = probe_url(&target.base_url, &policy.path);

    let result = client
        .get(&url)
        .timeout(Duration::from_secs(policy.timeout.max(1)))
        .send()
        .await;

    // Healthy iff a response arrived in time with a 2xx/3xx status.
    let healthy = match result {
        Ok(resp) => (200..400).contains(&resp.status().as_u16()),
        Err(_) => false,
    };

    let was_live = target.is_live();
    target.set_live(healthy);

    metrics
        .registry
        .gauge(
            metrics::UPSTREAM_HEALTH,
            &format!("upstream={},target={}", upstream.name(), target.base_url),
        )
        .set(healthy as i64);

    if healthy && !was_live {
        tracing::info!(
            "health: target recovered, upstream={}, target={}",
            upstream.name(),
            target.base_url
        );
    } else if !healthy && was_live {
        warn!(
            "health: target marked down, upstream={}, target={}",
            upstream.name(),
            target.base_url
        );
    } else {
        debug!(
            "health: probe, upstream={}, target={}, healthy={}",
            upstream.name(),
            target.base_url,
            healthy
        );
    }
}

fn probe_url(base_url: &str, path: &str) -> String {
    let mut url = String::with_capacity(base_url.len() + path.len() + 1);
    url.push_str(base_url);
    if !path.starts_with('/') {
        url.push('/');
    }
    url.push_str(path);
    url
}
