use super::GatewayState;
use crate::proxy::context::{full_body, BoxBody};
use hyper::Response;

/// Built-in endpoints on the main listener. Returns `None` when the request
/// should fall through to routed proxying.
pub fn handle_builtin(method: &http::Method, path: &str, state: &GatewayState) -> Option<Response<BoxBody>> {
    if method != http::Method::GET {
        return None;
    }

    match path {
        "/health" => Some(
            Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(full_body(r#"{"status":"healthy"}"#))
                .expect("static response"),
        ),

        "/stats" => {
            let stats = state.metrics.usage.snapshot();
            let body = serde_json::to_string(&stats).unwrap_or_else(|_| "[]".to_string());
            Some(
                Response::builder()
                    .status(200)
                    .header("content-type", "application/json")
                    .body(full_body(body))
                    .expect("static response"),
            )
        }

        _ => None,
    }
}

/// The metrics listener: the configured scrape path in Prometheus text
/// format, 404 for everything else.
pub fn handle_metrics(path: &str, state: &GatewayState) -> Response<BoxBody> {
    if path == state.config.metrics.path {
        let body = state.metrics.registry.render_text();
        Response::builder()
            .status(200)
            .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
            .body(full_body(body))
            .expect("static response")
    } else {
        Response::builder()
            .status(404)
            .header("content-type", "text/plain; charset=utf-8")
            .body(full_body("Not Found"))
            .expect("static response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, RouteConfig, TargetConfig, UpstreamConfig};

    fn state() -> GatewayState {
        GatewayState::new(GatewayConfig {
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
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = state();
        let resp = handle_builtin(&http::Method::GET, "/health", &state).unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_stats_endpoint_is_json_array() {
        let state = state();
        state.metrics.usage.record("api", 12.0, false);
        let resp = handle_builtin(&http::Method::GET, "/stats", &state).unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_non_get_falls_through() {
        let state = state();
        assert!(handle_builtin(&http::Method::POST, "/health", &state).is_none());
        assert!(handle_builtin(&http::Method::GET, "/other", &state).is_none());
    }

    #[tokio::test]
    async fn test_metrics_listener_paths() {
        let state = state();
        let resp = handle_metrics("/metrics", &state);
        assert_eq!(resp.status(), 200);
        let resp = handle_metrics("/other", &state);
        assert_eq!(resp.status(), 404);
    }
}
