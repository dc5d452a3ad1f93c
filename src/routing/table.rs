use crate::config::RouteConfig;
use crate::routing::pattern::PathPattern;
use anyhow::{Context, Result};
use http::{HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Host matcher compiled from a route's `host` field.
#[derive(Debug, Clone)]
pub enum HostPattern {
    /// Lowercased exact host.
    Exact(String),
    /// `*.suffix` — stored as `.suffix` (dot inclusive), lowercased.
    Suffix(String),
}

impl HostPattern {
    pub fn compile(pattern: &str) -> Self {
        let lowered = pattern.to_ascii_lowercase();
        match lowered.strip_prefix("*.") {
            Some(suffix) => HostPattern::Suffix(format!(".{suffix}")),
            None => HostPattern::Exact(lowered),
        }
    }

    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Exact(exact) => host.eq_ignore_ascii_case(exact),
            HostPattern::Suffix(suffix) => {
                host.len() >= suffix.len()
                    && host.as_bytes()[host.len() - suffix.len()..]
                        .eq_ignore_ascii_case(suffix.as_bytes())
            }
        }
    }
}

/// Per-route rate-limit override, validated at compile time.
#[derive(Debug, Clone)]
pub struct RouteLimit {
    pub enabled: bool,
    pub rps: f64,
    pub burst: u64,
}

/// An immutable compiled route. Everything the hot path needs — segments,
/// priority, header values — is resolved here, never at match time.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub host: Option<HostPattern>,
    pub pattern: PathPattern,
    /// Uppercased method set; empty means any, as does an explicit "ANY".
    pub methods: Vec<String>,
    pub upstream: String,
    pub strip_path: bool,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub rate_limit: Option<RouteLimit>,
    pub timeout: Option<Duration>,
}

impl Route {
    fn compile(config: &RouteConfig) -> Result<Self> {
        let pattern = PathPattern::compile(&config.path)?;
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| config.path.clone());

        let mut headers = Vec::with_capacity(config.headers.len());
        for (header, value) in &config.headers {
            let header_name: HeaderName = header
                .parse()
                .with_context(|| format!("route {name}: invalid header name {header:?}"))?;
            let header_value = HeaderValue::from_str(value)
                .with_context(|| format!("route {name}: invalid value for header {header}"))?;
            headers.push((header_name, header_value));
        }

        Ok(Self {
            name,
            host: config.host.as_deref().map(HostPattern::compile),
            pattern,
            methods: config
                .methods
                .iter()
                .map(|m| m.to_ascii_uppercase())
                .collect(),
            upstream: config.upstream.clone(),
            strip_path: config.strip_path,
            headers,
            rate_limit: config.rate_limit.as_ref().map(|rl| RouteLimit {
                enabled: rl.enabled,
                rps: rl.requests_per_second,
                burst: rl.burst_size,
            }),
            timeout: config.timeout.map(Duration::from_secs),
        })
    }

    fn allows_method(&self, method_upper: &str) -> bool {
        self.methods.is_empty()
            || self
                .methods
                .iter()
                .any(|m| m == "ANY" || m == method_upper)
    }

    /// The path actually forwarded upstream, honouring `strip_path`.
    pub fn forward_path<'a>(&self, path: &'a str) -> &'a str {
        if self.strip_path {
            self.pattern.strip_literal_prefix(path)
        } else {
            path
        }
    }
}

/// A successful match: the route plus its captured parameters.
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: HashMap<String, String>,
}

/// The route table — compiled once at startup, immutable afterwards, so the
/// hot path reads it lock-free through a plain `Arc`.
///
/// Routes are sorted by descending priority with insertion order breaking
/// ties; matching walks the sorted list and returns the first hit, which
/// makes match order agree with priority order by construction.
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new(configs: &[RouteConfig]) -> Result<Self> {
        let mut routes = configs
            .iter()
            .map(Route::compile)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(Arc::new)
            .collect::<Vec<_>>();

        // Stable sort keeps insertion order among equal priorities.
        routes.sort_by_key(|r| std::cmp::Reverse(r.pattern.priority()));

        for route in &routes {
            tracing::debug!(
                "routing: compiled route, name={}, pattern={}, priority={}",
                route.name,
                route.pattern.raw(),
                route.pattern.priority(),
            );
        }

        Ok(Self { routes })
    }

    /// Match a request. Host test first (absent = any), then method, then
    /// the path walk.
    pub fn match_request(&self, host: &str, method: &str, path: &str) -> Option<RouteMatch> {
        let method_upper = method.to_ascii_uppercase();
        let req_host = host.split(':').next().unwrap_or(host);

        for route in &self.routes {
            if let Some(ref host_pattern) = route.host {
                if !host_pattern.matches(req_host) {
                    continue;
                }
            }
            if !route.allows_method(&method_upper) {
                continue;
            }
            if let Some(params) = route.pattern.match_path(path) {
                return Some(RouteMatch {
                    route: route.clone(),
                    params,
                });
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_config(name: &str, path: &str) -> RouteConfig {
        RouteConfig {
            name: Some(name.to_string()),
            host: None,
            path: path.to_string(),
            methods: vec![],
            upstream: "backend".to_string(),
            strip_path: false,
            headers: HashMap::new(),
            rate_limit: None,
            timeout: None,
            retry_count: None,
        }
    }

    #[test]
    fn test_more_specific_pattern_wins() {
        let table = RouteTable::new(&[
            route_config("catchall", "/api/**"),
            route_config("exact", "/api/v1/users"),
            route_config("wildcard", "/api/v1/users/*"),
            route_config("order", "/api/v1/orders/:id"),
        ])
        .unwrap();

        let m = table.match_request("", "GET", "/api/v1/users/123").unwrap();
        assert_eq!(m.route.name, "wildcard");

        let m = table.match_request("", "GET", "/api/v1/users").unwrap();
        assert_eq!(m.route.name, "exact");

        let m = table.match_request("", "GET", "/api/v1/orders/7").unwrap();
        assert_eq!(m.route.name, "order");
        assert_eq!(m.params["id"], "7");

        let m = table.match_request("", "GET", "/api/v2/other").unwrap();
        assert_eq!(m.route.name, "catchall");
    }

    #[test]
    fn test_priority_tie_breaks_by_insertion() {
        let table = RouteTable::new(&[
            route_config("first", "/a/:x"),
            route_config("second", "/a/:y"),
        ])
        .unwrap();
        let m = table.match_request("", "GET", "/a/1").unwrap();
        assert_eq!(m.route.name, "first");
    }

    #[test]
    fn test_exact_literal_beats_param_sibling() {
        let table = RouteTable::new(&[
            route_config("param", "/users/:id"),
            route_config("literal", "/users/me"),
        ])
        .unwrap();
        let m = table.match_request("", "GET", "/users/me").unwrap();
        assert_eq!(m.route.name, "literal");
        let m = table.match_request("", "GET", "/users/42").unwrap();
        assert_eq!(m.route.name, "param");
    }

    #[test]
    fn test_method_filter() {
        let mut post_only = route_config("post_only", "/submit");
        post_only.methods = vec!["post".into()];
        let table = RouteTable::new(&[post_only, route_config("fallback", "/**")]).unwrap();

        let m = table.match_request("", "POST", "/submit").unwrap();
        assert_eq!(m.route.name, "post_only");
        let m = table.match_request("", "GET", "/submit").unwrap();
        assert_eq!(m.route.name, "fallback");
    }

    #[test]
    fn test_any_method_keyword() {
        let mut any = route_config("any", "/submit");
        any.methods = vec!["any".into()];
        let table = RouteTable::new(&[any]).unwrap();
        assert!(table.match_request("", "DELETE", "/submit").is_some());
    }

    #[test]
    fn test_host_exact_and_wildcard() {
        let mut exact = route_config("exact-host", "/**");
        exact.host = Some("API.example.com".into());
        let mut wildcard = route_config("wild-host", "/**");
        wildcard.host = Some("*.example.com".into());
        let table = RouteTable::new(&[exact, wildcard]).unwrap();

        let m = table
            .match_request("api.example.com:8080", "GET", "/x")
            .unwrap();
        assert_eq!(m.route.name, "exact-host");

        let m = table.match_request("cdn.example.com", "GET", "/x").unwrap();
        assert_eq!(m.route.name, "wild-host");

        assert!(table.match_request("example.com", "GET", "/x").is_none());
        assert!(table.match_request("other.test", "GET", "/x").is_none());
    }

    #[test]
    fn test_empty_table_matches_nothing() {
        let table = RouteTable::new(&[]).unwrap();
        assert!(table.match_request("any", "GET", "/").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_compile_error_surfaces_at_construction() {
        assert!(RouteTable::new(&[route_config("bad", "/a/**/b")]).is_err());
    }

    #[test]
    fn test_invalid_header_rejected_at_construction() {
        let mut cfg = route_config("hdr", "/a");
        cfg.headers
            .insert("bad header name".into(), "v".into());
        assert!(RouteTable::new(&[cfg]).is_err());
    }

    #[test]
    fn test_forward_path_strip() {
        let mut cfg = route_config("svc", "/api/v1/users/**");
        cfg.strip_path = true;
        let table = RouteTable::new(&[cfg]).unwrap();
        let m = table.match_request("", "GET", "/api/v1/users/42").unwrap();
        assert_eq!(m.route.forward_path("/api/v1/users/42"), "/42");
        assert_eq!(m.route.forward_path("/api/v1/users"), "/");
    }

    #[test]
    fn test_rest_param_bound() {
        let table = RouteTable::new(&[route_config("rest", "/files/**")]).unwrap();
        let m = table.match_request("", "GET", "/files/a/b/c").unwrap();
        assert_eq!(m.params["**"], "a/b/c");
    }
}
