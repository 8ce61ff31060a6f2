//! HTTP + WebSocket surface. Report-rendering endpoints
//! (`/api/outliers/report*`, `/api/analysis/report*`) are out of scope and
//! are not implemented here.

use crate::app::AppState;
use crate::store::RowFilter;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/config", get(get_config))
        .route("/status", get(get_status))
        .route("/history", get(get_history))
        .route("/liquidations", get(get_liquidations))
        .route("/trades", get(get_trades))
        .route("/oi-funding", get(get_oi_funding))
        .route("/outliers", get(get_outliers))
        .route("/outliers/spans", get(get_outlier_spans));

    let base_path = state.config.base_path.trim_end_matches('/').to_string();
    let inner = Router::new()
        .route("/healthz", get(healthz))
        .route("/", get(websocket_handler))
        .nest("/api", api)
        .with_state(state);

    if base_path.is_empty() {
        inner
    } else {
        Router::new().nest(&base_path, inner)
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "symbols": state.config.symbols.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        "depth": state.config.depth,
        "baseMmNotional": state.config.base_mm_notional,
        "largeMoveNotional": state.config.large_move_notional,
        "sizeBins": state.config.size_bins,
    }))
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "liveMonitoring": state.config.live_monitoring }))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
    symbol: Option<String>,
}

const DEFAULT_LIMIT: usize = 200;

async fn get_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> impl IntoResponse {
    let history = state
        .metrics_store
        .get_history(q.limit.unwrap_or(DEFAULT_LIMIT), q.symbol.as_deref());
    Json(history)
}

#[derive(Debug, Deserialize, Default)]
struct FilterQuery {
    limit: Option<usize>,
    symbol: Option<String>,
    market: Option<String>,
    exchange: Option<String>,
}

impl FilterQuery {
    fn into_filter(self) -> (usize, RowFilter) {
        (
            self.limit.unwrap_or(DEFAULT_LIMIT),
            RowFilter {
                symbol: self.symbol,
                market: self.market,
                exchange: self.exchange,
            },
        )
    }
}

async fn get_liquidations(
    State(state): State<AppState>,
    Query(q): Query<FilterQuery>,
) -> impl IntoResponse {
    let (limit, filter) = q.into_filter();
    Json(state.liquidation_store.get_history(limit, &filter))
}

async fn get_trades(
    State(state): State<AppState>,
    Query(q): Query<FilterQuery>,
) -> impl IntoResponse {
    let (limit, filter) = q.into_filter();
    Json(state.trade_store.get_history(limit, &filter))
}

async fn get_oi_funding(
    State(state): State<AppState>,
    Query(q): Query<FilterQuery>,
) -> impl IntoResponse {
    let (limit, filter) = q.into_filter();
    Json(state.oi_funding_store.get_history(limit, &filter))
}

async fn get_outliers(
    State(state): State<AppState>,
    Query(q): Query<FilterQuery>,
) -> impl IntoResponse {
    let (limit, filter) = q.into_filter();
    Json(state.outlier_store.get_history(limit, &filter))
}

async fn get_outlier_spans(
    State(state): State<AppState>,
    Query(q): Query<FilterQuery>,
) -> impl IntoResponse {
    let (limit, filter) = q.into_filter();
    Json(state.span_store.get_history(limit, &filter))
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Server-initiated messages only; clients reconnect on close. No
/// per-client filtering — every subscriber gets every envelope.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.broadcaster.subscribe();

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(text) => {
                        if socket.send(Message::Text(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket client lagged, dropping skipped envelopes");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
