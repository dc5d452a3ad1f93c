use crate::config::{HealthCheckConfig, UpstreamConfig};
use crate::upstream::loadbalance::{LoadBalancer, Target};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Runtime representation of one configured upstream: the target set behind
/// a selection discipline, plus the optional health policy. The store is
/// built once at startup and never mutated, so readers share it lock-free.
pub struct Upstream {
    name: Arc<str>,
    lb: LoadBalancer,
    health_check: Option<HealthCheckConfig>,
}

impl Upstream {
    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        let targets = config
            .targets
            .iter()
            .map(|t| Target::from_config(t).map(Arc::new))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("upstream {}", config.name))?;

        Ok(Self {
            name: Arc::from(config.name.as_str()),
            lb: LoadBalancer::new(&config.load_balance, targets),
            health_check: config.health_check.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn select(&self) -> Option<Arc<Target>> {
        self.lb.next()
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        self.lb.targets()
    }

    pub fn mark_live(&self, base_url: &str, live: bool) {
        self.lb.mark_live(base_url, live);
    }

    pub fn health_check(&self) -> Option<&HealthCheckConfig> {
        self.health_check.as_ref()
    }
}

/// Registry of all upstreams by name.
#[derive(Clone)]
pub struct UpstreamStore {
    upstreams: Arc<HashMap<String, Arc<Upstream>>>,
}

impl UpstreamStore {
    pub fn from_configs(configs: &[UpstreamConfig]) -> Result<Self> {
        let mut upstreams = HashMap::with_capacity(configs.len());
        for config in configs {
            upstreams.insert(
                config.name.clone(),
                Arc::new(Upstream::from_config(config)?),
            );
        }
        Ok(Self {
            upstreams: Arc::new(upstreams),
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<Upstream>> {
        self.upstreams.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Upstream>> {
        self.upstreams.values()
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}
