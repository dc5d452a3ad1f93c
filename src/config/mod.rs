pub mod types;


pub use types::*;

use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;

impl GatewayConfig {
    /// Load configuration from a file and apply environment variable
    /// overrides for listener settings. The format is chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("cannot read config file {}: {}", path.display(), e)
        })?;
        let mut config: GatewayConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
            None => anyhow::bail!("config file has no extension, use .toml or .json"),
        };

        config.apply_env_overrides();

        config.validate()?;
        tracing::info!(
            "config: loaded, routes={}, upstreams={}",
            config.routes.len(),
            config.upstreams.len()
        );
        Ok(config)
    }

    /// Listener overrides for containerised deployments. Business config
    /// (routes, upstreams, limits) comes only from the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PORTICO_LISTEN") {
            if let Some((host, port)) = parse_listen_addr(&v) {
                self.server.host = host;
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("PORTICO_METRICS_LISTEN") {
            if let Some((host, port)) = parse_listen_addr(&v) {
                self.metrics.host = host;
                self.metrics.port = port;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be in 1..=65535");
        }

        if self.routes.is_empty() {
            anyhow::bail!("at least one route is required");
        }

        let mut upstream_names = HashSet::new();
        for upstream in &self.upstreams {
            if !upstream_names.insert(upstream.name.as_str()) {
                anyhow::bail!("duplicate upstream name: {}", upstream.name);
            }
            if upstream.targets.is_empty() {
                anyhow::bail!("upstream {} has no targets", upstream.name);
            }
            match upstream.load_balance.as_str() {
                "round_robin" | "least_conn" | "random" | "weighted_round_robin" => {}
                other => anyhow::bail!(
                    "upstream {}: unknown load_balance {:?}",
                    upstream.name,
                    other
                ),
            }
            for target in &upstream.targets {
                let parsed = url::Url::parse(&target.url).map_err(|e| {
                    anyhow::anyhow!("upstream {}: invalid target url {}: {}", upstream.name, target.url, e)
                })?;
                if !parsed.has_authority() || parsed.host_str().is_none() {
                    anyhow::bail!(
                        "upstream {}: target url {} must be absolute with scheme and authority",
                        upstream.name,
                        target.url
                    );
                }
            }
        }

        for route in &self.routes {
            if route.path.is_empty() {
                anyhow::bail!("route {:?} has an empty path pattern", route.name);
            }
            if !upstream_names.contains(route.upstream.as_str()) {
                anyhow::bail!(
                    "route {} references unknown upstream {}",
                    route.name.as_deref().unwrap_or(&route.path),
                    route.upstream
                );
            }
        }

        if let Some(ref buckets) = self.metrics.latency_buckets {
            if !buckets.windows(2).all(|w| w[0] < w[1]) {
                anyhow::bail!("metrics.latency_buckets must be strictly ascending");
            }
        }

        Ok(())
    }
}

/// Split a `host:port` listener address. The host may be empty (`:9090`
/// means all interfaces).
fn parse_listen_addr(addr: &str) -> Option<(String, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    Some((host.to_string(), port))
}
