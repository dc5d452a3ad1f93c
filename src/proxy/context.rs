use crate::error::GatewayError;
use crate::metrics::{self, Metrics};
use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use std::time::Instant;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Route label used when no route matched.
const NO_ROUTE: &str = "_no_route";

/// Per-request bookkeeping that flows through the pipeline phases.
///
/// Finalisation is guaranteed: every exit path calls `finalize` (directly or
/// through `error_response`), and if the downstream client aborts — hyper
/// drops the service future at an await point — the `Drop` impl records the
/// request as status 499. The in-flight gauge is therefore decremented
/// exactly once per armed request.
pub struct RequestContext {
    pub host: String,
    pub path: String,
    pub method: String,
    pub route_name: String,
    pub client_addr: String,
    /// Name of the recognised API client, when one was identified.
    pub client_name: Option<String>,
    pub start: Instant,
    metrics: Metrics,
    in_flight: bool,
    finished: bool,
}

impl RequestContext {
    pub fn new(metrics: Metrics, host: String, path: String, method: String) -> Self {
        Self {
            host,
            path,
            method,
            route_name: String::new(),
            client_addr: String::new(),
            client_name: None,
            start: Instant::now(),
            metrics,
            in_flight: false,
            finished: false,
        }
    }

    fn route_label(&self) -> &str {
        if self.route_name.is_empty() {
            NO_ROUTE
        } else {
            &self.route_name
        }
    }

    /// Bump the in-flight gauge; `finalize` (or `Drop`) pairs the decrement.
    pub fn arm_in_flight(&mut self) {
        self.metrics
            .registry
            .gauge(
                metrics::REQUESTS_IN_FLIGHT,
                &format!("route={}", self.route_name),
            )
            .inc();
        self.in_flight = true;
    }

    /// Record the per-request metrics exactly once.
    pub fn finalize(&mut self, status: u16) {
        if self.finished {
            return;
        }
        self.finished = true;

        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(status);
        let route = self.route_label().to_string();

        self.metrics
            .registry
            .counter(
                metrics::REQUESTS_TOTAL,
                &format!("route={},method={},status={}", route, self.method, status_str),
            )
            .inc();

        let elapsed = self.start.elapsed();
        self.metrics
            .registry
            .histogram(
                metrics::REQUEST_DURATION_SECONDS,
                &format!("route={},method={}", route, self.method),
            )
            .observe(elapsed.as_secs_f64());

        if self.in_flight {
            self.metrics
                .registry
                .gauge(
                    metrics::REQUESTS_IN_FLIGHT,
                    &format!("route={}", self.route_name),
                )
                .dec();
            self.in_flight = false;
        }

        if let Some(ref client) = self.client_name {
            self.metrics
                .registry
                .counter(
                    metrics::CLIENT_REQUESTS_TOTAL,
                    &format!("client={},status={}", client, status_str),
                )
                .inc();
        }

        // Rate-limit rejections and client aborts are not failures of the
        // request itself for usage accounting.
        let is_error = status >= 400 && status != 429 && status != 499;
        let latency_ms = elapsed.as_secs_f64() * 1000.0;
        if !self.route_name.is_empty() {
            self.metrics
                .usage
                .record(&self.route_name, latency_ms, is_error);
        }
        if let Some(ref client) = self.client_name {
            self.metrics
                .usage
                .record(&format!("apikey:{client}"), latency_ms, is_error);
        }
    }

    /// Bump the error counter family. Never called for 429 or 499.
    pub fn record_error(&self, reason: &str) {
        self.metrics
            .registry
            .counter(
                metrics::ERRORS_TOTAL,
                &format!("route={},reason={}", self.route_label(), reason),
            )
            .inc();
    }

    /// Single exit point for failure branches: finalize metrics and answer
    /// with the status reason phrase as a plain-text body.
    pub fn error_response(&mut self, status: StatusCode) -> hyper::Response<BoxBody> {
        self.finalize(status.as_u16());

        let reason = status.canonical_reason().unwrap_or("Error");
        let mut builder = hyper::Response::builder()
            .status(status)
            .header("content-type", "text/plain; charset=utf-8");
        if status == StatusCode::TOO_MANY_REQUESTS {
            builder = builder.header("retry-after", "1");
        }
        builder
            .body(full_body(reason))
            .expect("static response construction cannot fail")
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        // Reached only when the future was dropped mid-flight, i.e. the
        // downstream connection went away before a response was produced.
        if !self.finished {
            let error = GatewayError::ClientClosed;
            tracing::debug!(
                "proxy: {}, route={}, method={}, path={}",
                error,
                self.route_label(),
                self.method,
                self.path
            );
            self.finalize(error.status().as_u16());
        }
    }
}
