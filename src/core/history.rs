//! Upstream history provider abstractions and their raw payloads

use anyhow::Result;
use async_trait::async_trait;

/// Daily (or intraday) bars as returned by a stock data provider.
///
/// `index` holds epoch seconds. Columns keep the provider's own names and
/// may contain gaps where the provider had no value for a bar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStockHistory {
    pub index: Vec<i64>,
    pub columns: Vec<(String, Vec<Option<f64>>)>,
}

/// One exchange candle: `[timestamp_ms, open, high, low, close, volume]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OhlcvCandle {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[async_trait]
pub trait StockHistoryProvider: Send + Sync {
    async fn fetch_history(
        &self,
        ticker: &str,
        period: &str,
        interval: &str,
    ) -> Result<RawStockHistory>;
}

#[async_trait]
pub trait CryptoExchange: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<OhlcvCandle>>;
}
