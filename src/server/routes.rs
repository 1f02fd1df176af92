use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::error::AppError;
use super::state::AppState;
use crate::dashboard::Dashboard;
use crate::fetcher::{
    DEFAULT_EXCHANGE, DEFAULT_STOCK_INTERVAL, DEFAULT_STOCK_PERIOD, DEFAULT_TIMEFRAME,
};

#[derive(Debug, Deserialize)]
pub struct StockParams {
    pub period: Option<String>,
    pub interval: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CryptoParams {
    pub exchange: Option<String>,
    pub timeframe: Option<String>,
}

/// GET /api/health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /api/stock/{ticker}?period=60d&interval=1d
pub async fn get_stock(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
    Query(params): Query<StockParams>,
) -> Result<Json<Dashboard>, AppError> {
    let period = params.period.as_deref().unwrap_or(DEFAULT_STOCK_PERIOD);
    let interval = params.interval.as_deref().unwrap_or(DEFAULT_STOCK_INTERVAL);

    let table = state
        .fetcher
        .fetch_stock_history(&ticker.to_uppercase(), period, interval)
        .await
        .or_empty();

    if table.is_empty() {
        debug!("No stock data for {}", ticker);
        return Err(AppError::no_data());
    }
    Ok(Json(Dashboard::from_table(&table)))
}

/// GET /api/crypto/{symbol}?exchange=binance&timeframe=1d
///
/// The pair separator may be written as `-` or `_`, e.g. `BTC-USDT`.
pub async fn get_crypto(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(params): Query<CryptoParams>,
) -> Result<Json<Dashboard>, AppError> {
    let exchange = params.exchange.as_deref().unwrap_or(DEFAULT_EXCHANGE);
    let timeframe = params.timeframe.as_deref().unwrap_or(DEFAULT_TIMEFRAME);

    let table = state
        .fetcher
        .fetch_crypto_history(&symbol, exchange, timeframe)
        .await
        .or_empty();

    if table.is_empty() {
        debug!("No crypto data for {} on {}", symbol, exchange);
        return Err(AppError::no_data());
    }
    Ok(Json(Dashboard::from_table(&table)))
}
