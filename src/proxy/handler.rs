use crate::error::GatewayError;
use crate::metrics;
use crate::proxy::context::{BoxBody, RequestContext};
use crate::proxy::identity;
use crate::routing::{Route, RouteMatch};
use crate::server::{ApiClient, GatewayState};
use crate::upstream::{InFlightGuard, DEFAULT_REQUEST_TIMEOUT};
use http::header::{HeaderName, HeaderValue, CONNECTION, HOST, TRANSFER_ENCODING};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Handle one proxied request end to end:
///
/// route match → rate limiting → target selection → forwarding → response
/// relay, with metrics recorded on every exit path. The `RequestContext`
/// guarantees the in-flight gauge balances even when the downstream client
/// goes away mid-flight (recorded as status 499).
pub async fn handle_request(
    req: Request<Incoming>,
    state: GatewayState,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let path = req.uri().path().to_string();
    let method = req.method().as_str().to_string();

    let mut ctx = RequestContext::new(state.metrics.clone(), host, path, method);

    let Some(RouteMatch { route, params: _ }) =
        state
            .router
            .match_request(&ctx.host, &ctx.method, &ctx.path)
    else {
        debug!("proxy: no route matched, host={}, path={}", ctx.host, ctx.path);
        return Ok(fail(&mut ctx, GatewayError::NoRouteMatch));
    };

    ctx.route_name = route.name.clone();
    ctx.arm_in_flight();

    ctx.client_addr = identity::client_addr(req.headers(), peer_addr);
    let api_key = identity::api_key(req.headers(), req.uri().query());
    let client = api_key
        .as_deref()
        .and_then(|key| state.api_clients.get(key));
    ctx.client_name = client.map(|c| c.name.clone());

    if state.config.rate_limit.enabled {
        if let Some(tier) = rejected_tier(&state, &route, api_key.as_deref(), client, &ctx) {
            debug!(
                "proxy: rate limited, route={}, tier={}, client={}",
                ctx.route_name, tier, ctx.client_addr
            );
            state
                .metrics
                .registry
                .counter(metrics::RATE_LIMITED_TOTAL, &format!("tier={tier}"))
                .inc();
            return Ok(fail(&mut ctx, GatewayError::RateLimited { tier }));
        }
    }

    let Some(upstream) = state.upstreams.get(&route.upstream) else {
        warn!(
            "proxy: upstream not found, route={}, upstream={}",
            ctx.route_name, route.upstream
        );
        return Ok(fail(
            &mut ctx,
            GatewayError::UpstreamNotFound(route.upstream.clone()),
        ));
    };

    // The balancer falls back to the first target when everything is down;
    // the liveness verdict is made here so health probes keep a selection
    // path to recover through.
    let target = match upstream.select() {
        Some(target) if target.is_live() => target,
        _ => {
            warn!(
                "proxy: no healthy target, route={}, upstream={}",
                ctx.route_name,
                upstream.name()
            );
            return Ok(fail(
                &mut ctx,
                GatewayError::NoHealthyUpstream(upstream.name().to_string()),
            ));
        }
    };

    let guard = InFlightGuard::acquire(target.clone());

    // Build the upstream request: target authority, joined path, original
    // query and method, streamed body.
    let (parts, body) = req.into_parts();

    let forward_path = route.forward_path(&ctx.path);
    let joined_path = single_join(&target.base_path, forward_path);
    let upstream_uri = match parts.uri.query() {
        Some(query) => format!(
            "{}://{}{}?{}",
            target.scheme, target.authority, joined_path, query
        ),
        None => format!("{}://{}{}", target.scheme, target.authority, joined_path),
    };

    let mut headers = parts.headers;
    // Host names the target; the original value travels in X-Forwarded-Host.
    // Route overrides run afterwards so an explicit Host injection wins.
    if let Ok(v) = HeaderValue::from_str(&target.authority) {
        headers.insert(HOST, v);
    }
    apply_route_headers(&route, &mut headers);
    inject_forwarded_headers(&mut headers, peer_addr, &ctx.host, &ctx.client_addr);
    remove_hop_headers(&mut headers);

    let upstream_req = Request::builder()
        .method(parts.method)
        .uri(&upstream_uri)
        .body(body.boxed());
    let mut upstream_req = match upstream_req {
        Ok(r) => r,
        Err(e) => {
            warn!(
                "proxy: failed to build upstream request, route={}, uri={}, error={}",
                ctx.route_name, upstream_uri, e
            );
            drop(guard);
            return Ok(fail(&mut ctx, GatewayError::ProxyError(e.to_string())));
        }
    };
    *upstream_req.headers_mut() = headers;

    let deadline = route.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
    let upstream_start = Instant::now();
    let result = tokio::time::timeout(deadline, state.client.request(upstream_req)).await;

    // Counter release happens-before the duration observation.
    drop(guard);
    let upstream_elapsed = upstream_start.elapsed();
    state
        .metrics
        .registry
        .histogram(
            metrics::UPSTREAM_DURATION_SECONDS,
            &format!("upstream={}", upstream.name()),
        )
        .observe(upstream_elapsed.as_secs_f64());

    let upstream_resp = match result {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            warn!(
                "proxy: upstream error, route={}, target={}, error={}",
                ctx.route_name, target.base_url, e
            );
            return Ok(fail(&mut ctx, GatewayError::ProxyError(e.to_string())));
        }
        Err(_) => {
            warn!(
                "proxy: upstream timeout after {:?}, route={}, target={}",
                deadline, ctx.route_name, target.base_url
            );
            return Ok(fail(
                &mut ctx,
                GatewayError::ProxyError("deadline exceeded".to_string()),
            ));
        }
    };

    let (mut resp_parts, resp_body) = upstream_resp.into_parts();
    remove_hop_headers(&mut resp_parts.headers);
    let status = resp_parts.status.as_u16();

    if status >= 400 {
        ctx.record_error("upstream_status");
    }
    ctx.finalize(status);

    tracing::info!(
        client = %ctx.client_addr,
        method = %ctx.method,
        host = %ctx.host,
        path = %ctx.path,
        status = status,
        route = %ctx.route_name,
        upstream = %upstream.name(),
        target = %target.base_url,
        latency_ms = %ctx.start.elapsed().as_millis(),
        upstream_ms = %upstream_elapsed.as_millis(),
        "access"
    );

    Ok(Response::from_parts(resp_parts, resp_body.boxed()))
}

/// Single failure exit: bump the error counter (when the kind counts as an
/// error) and answer with the mapped status.
fn fail(ctx: &mut RequestContext, error: GatewayError) -> Response<BoxBody> {
    if let Some(label) = error.metric_label() {
        ctx.record_error(label);
    }
    ctx.error_response(error.status())
}

/// Evaluate the rate-limit tiers in fixed order; the first rejection wins.
/// Returns the rejecting tier name.
fn rejected_tier(
    state: &GatewayState,
    route: &Arc<Route>,
    api_key: Option<&str>,
    client: Option<&ApiClient>,
    ctx: &RequestContext,
) -> Option<&'static str> {
    if let Some(ref limit) = route.rate_limit {
        if limit.enabled {
            let key = format!("route:{}", route.name);
            if !state.limiter.allow_with(&key, limit.rps, limit.burst) {
                return Some("route");
            }
        }
    }

    if state.config.rate_limit.per_api_key {
        if let Some(key) = api_key {
            let bucket_key = format!("apikey:{key}");
            // A recognised client carries its own limits so the bucket is
            // rebuilt with them after eviction.
            let allowed = match client {
                Some(client) => state.limiter.allow_with(&bucket_key, client.rps, client.burst),
                None => state.limiter.allow(&bucket_key),
            };
            if !allowed {
                return Some("apikey");
            }
        }
    }

    if state.config.rate_limit.per_ip && !ctx.client_addr.is_empty() {
        let key = format!("ip:{}", ctx.client_addr);
        if !state.limiter.allow(&key) {
            return Some("ip");
        }
    }

    None
}

/// Join a base path and a request path with exactly one separator.
pub fn single_join(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// Apply route-configured header overrides; last write wins.
fn apply_route_headers(route: &Route, headers: &mut http::HeaderMap) {
    for (name, value) in &route.headers {
        headers.insert(name.clone(), value.clone());
    }
}

/// Maintain the standard forwarding headers for the upstream hop:
///
/// - `X-Forwarded-For`: append the TCP peer IP to any existing list.
/// - `X-Forwarded-Host`: the original `Host`.
/// - `X-Forwarded-Proto`: the gateway does not terminate TLS, so an existing
///   value is trusted and `http` is the default.
/// - `X-Real-IP`: the derived client address.
fn inject_forwarded_headers(
    headers: &mut http::HeaderMap,
    peer_addr: SocketAddr,
    original_host: &str,
    client_addr: &str,
) {
    static XFF: HeaderName = HeaderName::from_static("x-forwarded-for");
    static XFP: HeaderName = HeaderName::from_static("x-forwarded-proto");
    static XFH: HeaderName = HeaderName::from_static("x-forwarded-host");
    static XRI: HeaderName = HeaderName::from_static("x-real-ip");

    let peer_ip = peer_addr.ip().to_string();

    if let Some(existing) = headers.get(&XFF).and_then(|v| v.to_str().ok()) {
        let mut combined = String::with_capacity(existing.len() + 2 + peer_ip.len());
        combined.push_str(existing);
        combined.push_str(", ");
        combined.push_str(&peer_ip);
        if let Ok(v) = HeaderValue::from_str(&combined) {
            headers.insert(XFF.clone(), v);
        }
    } else if let Ok(v) = HeaderValue::from_str(&peer_ip) {
        headers.insert(XFF.clone(), v);
    }

    if !headers.contains_key(&XFP) {
        headers.insert(XFP.clone(), HeaderValue::from_static("http"));
    }

    if !original_host.is_empty() {
        if let Ok(v) = HeaderValue::from_str(original_host) {
            headers.insert(XFH.clone(), v);
        }
    }

    if let Ok(v) = HeaderValue::from_str(client_addr) {
        headers.insert(XRI.clone(), v);
    }
}

/// Strip hop-by-hop headers (RFC 7230 §6.1) from a header map. Applied to
/// both the outgoing upstream request and the relayed response.
pub fn remove_hop_headers(headers: &mut http::HeaderMap) {
    let hop_headers: &[HeaderName] = &[
        CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-authenticate"),
        HeaderName::from_static("proxy-authorization"),
        HeaderName::from_static("te"),
        HeaderName::from_static("trailers"),
        TRANSFER_ENCODING,
        HeaderName::from_static("upgrade"),
    ];

    for h in hop_headers {
        headers.remove(h);
    }
}
