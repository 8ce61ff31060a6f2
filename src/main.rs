//! Real-time market microstructure monitor entry point: loads config, opens
//! the durable stores, spawns the feed adapters and the metrics tick loop,
//! and serves the HTTP/WebSocket API.

use anyhow::Context;
use microstructure_monitor::config::dotenv;
use microstructure_monitor::{http, AppState, Config};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::load(".env");
    init_tracing();

    let config = Config::from_env();
    info!(
        symbols = ?config.symbols.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        depth = config.depth,
        base_mm_notional = config.base_mm_notional,
        large_move_notional = config.large_move_notional,
        metrics_interval_ms = config.metrics_interval_ms,
        log_interval_ms = config.log_interval_ms,
        data_dir = %config.data_dir,
        live_monitoring = config.live_monitoring,
        host = %config.host,
        port = config.port,
        "starting microstructure monitor"
    );

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config)?;
    state.spawn_feeds();
    tokio::spawn(log_summary(state.clone()));

    let app = http::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

/// Resolves on Ctrl+C so the HTTP listener closes cleanly; feed/tick tasks
/// are plain `tokio::spawn`s with no shared cancellation handle and are
/// simply dropped with the runtime on process exit.
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// Periodically logs per-store row counts and active outlier span count, the
/// operator-visible heartbeat while `LIVE_MONITORING` is running.
async fn log_summary(state: AppState) {
    let mut ticker = interval(Duration::from_millis(state.config.log_interval_ms));
    loop {
        ticker.tick().await;
        let now = now_ms();
        info!(
            symbols = state.config.symbols.len(),
            metrics_rows = state.metrics_store.len(),
            trade_rows = state.trade_store.len(),
            liquidation_rows = state.liquidation_store.len(),
            oi_funding_rows = state.oi_funding_store.len(),
            outlier_rows = state.outlier_store.len(),
            span_rows = state.span_store.len(),
            large_move_rows = state.large_move_store.len(),
            active_spans = state.span_tracker.active_snapshot(now).len(),
            websocket_subscribers = state.broadcaster.subscriber_count(),
            "status"
        );
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "microstructure_monitor=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
