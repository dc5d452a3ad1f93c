use crate::proxy::context::BoxBody;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

/// Default total deadline for one upstream call. Routes may override it.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// TCP connect bound.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// TCP keep-alive probe interval for pooled connections.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Idle pooled connections are dropped after this long.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
/// Per-host idle connection cap; saturation surfaces as call timeouts.
pub const POOL_MAX_IDLE_PER_HOST: usize = 32;

pub type ProxyClient = Client<HttpsConnector<HttpConnector>, BoxBody>;

/// Build the single shared upstream client.
///
/// - Plain `http://` connections go through the inner `HttpConnector`.
/// - `https://` targets are terminated with rustls (ring, webpki roots);
///   HTTP/2 is negotiated via ALPN, plain connections stay on HTTP/1.1.
pub fn build_proxy_client() -> ProxyClient {
    let mut http = HttpConnector::new();
    http.set_nodelay(true);
    http.set_keepalive(Some(KEEPALIVE_INTERVAL));
    http.set_connect_timeout(Some(CONNECT_TIMEOUT));
    http.enforce_http(false);

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http);

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .build(https)
}
