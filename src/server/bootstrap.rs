use crate::config::GatewayConfig;
use crate::server;
use crate::upstream::spawn_health_checkers;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
}

/// Gateway lifecycle: load → build state → spawn background loops → serve →
/// drain → stop background loops → exit.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let config = GatewayConfig::load(&args.config_path)?;

    let listen = format!("{}:{}", config.server.host, config.server.port);
    let metrics_listen = format!("{}:{}", config.metrics.host, config.metrics.port);
    let metrics_enabled = config.metrics.enabled;
    let limiter_enabled = config.rate_limit.enabled;
    let cleanup_interval = Duration::from_secs(config.rate_limit.cleanup_interval.max(1));

    let state = server::GatewayState::new(config)?;
    let shutdown = Arc::new(Notify::new());

    // Background loops: health checkers per upstream plus the bucket
    // sweeper. Their handles are awaited after the drain so termination is
    // acknowledged, never assumed.
    let mut background = spawn_health_checkers(&state.upstreams, &state.metrics, &shutdown);
    if limiter_enabled {
        background.push(state.limiter.start_sweeper(cleanup_interval, shutdown.clone()));
    }

    let metrics_handle = if metrics_enabled {
        let state = state.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server::run_metrics_server(&metrics_listen, state).await {
                tracing::error!("server: metrics failed, error={}", e);
            }
        }))
    } else {
        None
    };

    tracing::info!("server: starting gateway, listen={}", listen);

    let proxy_handle = tokio::spawn({
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_proxy_server(&listen, state, shutdown).await }
    });

    wait_for_signal().await;
    shutdown.notify_waiters();

    // The proxy task drains in-flight connections up to the configured
    // deadline before resolving.
    match proxy_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("server: proxy error, error={}", e),
        Err(e) => tracing::error!("server: proxy task panicked, error={}", e),
    }

    for handle in background {
        if let Err(e) = handle.await {
            tracing::error!("server: background task error, error={}", e);
        }
    }

    // The metrics endpoint stays reachable until everything else is down.
    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    // The writer guard must live for the process; dropping it would silence
    // all further log output.
    std::mem::forget(guard);
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }
}
