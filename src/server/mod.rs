mod admin;
pub mod bootstrap;
pub mod runtime;
mod state;

pub use state::{ApiClient, GatewayState};

use crate::metrics;
use crate::proxy;
use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

/// Run the main proxy listener with graceful shutdown.
///
/// When `shutdown` fires the loop stops accepting and waits up to
/// `server.shutdown_timeout` for in-flight connections to finish before
/// returning; the built-in `/health` and `/stats` endpoints are served here
/// ahead of routed traffic.
pub async fn run_proxy_server(
    listen: &str,
    state: GatewayState,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: proxy listening, addr={}", addr);

    let drain_timeout = Duration::from_secs(state.config.server.shutdown_timeout);
    let read_timeout = Duration::from_secs(state.config.server.read_timeout);
    let active_conns = Arc::new(AtomicI64::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("server: proxy: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => {
                state
                    .metrics
                    .registry
                    .counter(metrics::CONNECTIONS_TOTAL, "status=accepted")
                    .inc();
                v
            }
            Err(e) => {
                error!("server: proxy: accept failed, error={}", e);
                state
                    .metrics
                    .registry
                    .counter(metrics::CONNECTIONS_TOTAL, "status=error")
                    .inc();
                continue;
            }
        };

        state
            .metrics
            .registry
            .gauge(metrics::CONNECTIONS_ACTIVE, "")
            .inc();
        active_conns.fetch_add(1, Ordering::Relaxed);

        let state = state.clone();
        let active_conns = active_conns.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let state_inner = state.clone();
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state_inner.clone();
                async move {
                    if let Some(resp) =
                        admin::handle_builtin(req.method(), req.uri().path(), &state)
                    {
                        return Ok(resp);
                    }
                    proxy::handle_request(req, state, peer_addr).await
                }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(read_timeout)
                .keep_alive(true)
                .http2()
                .keep_alive_interval(Some(Duration::from_secs(20)))
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!(
                        "server: proxy: connection error, peer={}, error={}",
                        peer_addr, e
                    );
                }
            }

            state
                .metrics
                .registry
                .gauge(metrics::CONNECTIONS_ACTIVE, "")
                .dec();
            active_conns.fetch_sub(1, Ordering::Relaxed);
        });
    }

    drain_connections(&active_conns, drain_timeout).await;
    Ok(())
}

async fn drain_connections(active_conns: &AtomicI64, drain_timeout: Duration) {
    let active = active_conns.load(Ordering::Relaxed);
    if active == 0 {
        return;
    }
    info!(
        "server: proxy: waiting for {} active connections to drain",
        active
    );
    let drain = async {
        while active_conns.load(Ordering::Relaxed) > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    match tokio::time::timeout(drain_timeout, drain).await {
        Ok(_) => info!("server: proxy: all connections drained"),
        Err(_) => info!(
            "server: proxy: drain timeout ({}s), {} connections still active",
            drain_timeout.as_secs(),
            active_conns.load(Ordering::Relaxed)
        ),
    }
}

/// Run the metrics listener. It stays reachable through the proxy drain and
/// is stopped last by the bootstrap aborting its task.
pub async fn run_metrics_server(listen: &str, state: GatewayState) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: metrics listening, addr={}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move {
                    Ok::<_, hyper::Error>(admin::handle_metrics(req.uri().path(), &state))
                }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: metrics: connection error, error={}", e);
                }
            }
        });
    }
}
