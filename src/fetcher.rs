//! Cache-aware price history fetching for stocks and crypto pairs.
//!
//! Each fetcher checks its cache, calls the upstream provider under a
//! timeout, normalizes the payload into a [`PriceTable`] and stores it.
//! Upstream failures come back as [`FetchOutcome::Failed`] and are never
//! cached, so the next request retries.
use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::cache::TtlCache;
use crate::core::history::{OhlcvCandle, RawStockHistory, StockHistoryProvider};
use crate::core::table::{Candle, PriceColumn, PriceTable};
use crate::providers::ExchangeRegistry;

pub const DEFAULT_STOCK_PERIOD: &str = "60d";
pub const DEFAULT_STOCK_INTERVAL: &str = "1d";
pub const DEFAULT_CRYPTO_SYMBOL: &str = "BTC/USDT";
pub const DEFAULT_EXCHANGE: &str = "binance";
pub const DEFAULT_TIMEFRAME: &str = "1d";
pub const DEFAULT_CRYPTO_LIMIT: usize = 200;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    Stock,
    Crypto,
}

impl AssetClass {
    /// The table a failed fetch degrades to.
    pub fn empty_table(&self) -> PriceTable {
        match self {
            AssetClass::Stock => PriceTable::empty(),
            AssetClass::Crypto => PriceTable::empty_with_canonical_columns(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StockKey {
    pub ticker: String,
    pub period: String,
    pub interval: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CryptoKey {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: String,
}

pub type StockCache = TtlCache<StockKey, Arc<PriceTable>>;
pub type CryptoCache = TtlCache<CryptoKey, Arc<PriceTable>>;

#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(Arc<PriceTable>),
    Failed {
        asset: AssetClass,
        error: anyhow::Error,
    },
}

impl FetchOutcome {
    pub fn is_fetched(&self) -> bool {
        matches!(self, FetchOutcome::Fetched(_))
    }

    /// Treats a failed fetch as an empty table of the right shape.
    pub fn or_empty(self) -> Arc<PriceTable> {
        match self {
            FetchOutcome::Fetched(table) => table,
            FetchOutcome::Failed { asset, .. } => Arc::new(asset.empty_table()),
        }
    }
}

/// Upper-cases a trading pair and accepts `-` or `_` as the separator.
pub fn normalize_pair(symbol: &str) -> String {
    symbol.trim().to_uppercase().replace(['-', '_'], "/")
}

/// Converts a provider's date-indexed history into the canonical schema.
///
/// Column names are matched case-insensitively, columns outside the OHLCV set
/// are dropped, and bars with a gap in any kept column are skipped.
pub fn normalize_stock_history(raw: RawStockHistory) -> Result<PriceTable> {
    let mut columns: BTreeMap<PriceColumn, Vec<Option<f64>>> = BTreeMap::new();
    for (name, values) in raw.columns {
        let Ok(column) = name.parse::<PriceColumn>() else {
            debug!("Ignoring provider column {}", name);
            continue;
        };
        if values.len() != raw.index.len() {
            return Err(anyhow!(
                "Provider column {} has {} values for {} bars",
                name,
                values.len(),
                raw.index.len()
            ));
        }
        columns.insert(column, values);
    }

    let mut timestamps = Vec::with_capacity(raw.index.len());
    let mut kept: BTreeMap<PriceColumn, Vec<f64>> =
        columns.keys().map(|c| (*c, Vec::new())).collect();

    for (row, secs) in raw.index.iter().enumerate() {
        let values: Option<Vec<f64>> = columns.values().map(|v| v[row]).collect();
        let Some(values) = values else {
            debug!("Skipping incomplete bar at {}", secs);
            continue;
        };
        let timestamp = Utc
            .timestamp_opt(*secs, 0)
            .single()
            .ok_or_else(|| anyhow!("Invalid bar timestamp: {}", secs))?;

        timestamps.push(timestamp);
        for (out, value) in kept.values_mut().zip(values) {
            out.push(value);
        }
    }

    PriceTable::from_columns(timestamps, kept)
}

/// Converts exchange candles with epoch-millisecond times into a table.
pub fn normalize_candles(candles: Vec<OhlcvCandle>) -> Result<PriceTable> {
    let candles = candles
        .into_iter()
        .map(|c| {
            let timestamp = DateTime::from_timestamp_millis(c.timestamp_ms)
                .ok_or_else(|| anyhow!("Invalid candle timestamp: {}", c.timestamp_ms))?;
            Ok(Candle {
                timestamp,
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
                volume: c.volume,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PriceTable::from_candles(candles))
}

pub struct HistoryFetcher {
    stock_provider: Arc<dyn StockHistoryProvider>,
    exchanges: ExchangeRegistry,
    stock_cache: Arc<StockCache>,
    crypto_cache: Arc<CryptoCache>,
    timeout: Duration,
    crypto_limit: usize,
}

impl HistoryFetcher {
    pub fn new(
        stock_provider: Arc<dyn StockHistoryProvider>,
        exchanges: ExchangeRegistry,
        stock_cache: Arc<StockCache>,
        crypto_cache: Arc<CryptoCache>,
    ) -> Self {
        Self {
            stock_provider,
            exchanges,
            stock_cache,
            crypto_cache,
            timeout: DEFAULT_FETCH_TIMEOUT,
            crypto_limit: DEFAULT_CRYPTO_LIMIT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_crypto_limit(mut self, limit: usize) -> Self {
        self.crypto_limit = limit;
        self
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| anyhow!("Upstream call timed out after {:?}", self.timeout))?
    }

    pub async fn fetch_stock_history(
        &self,
        ticker: &str,
        period: &str,
        interval: &str,
    ) -> FetchOutcome {
        let key = StockKey {
            ticker: ticker.trim().to_uppercase(),
            period: period.to_string(),
            interval: interval.to_string(),
        };

        let result = self
            .stock_cache
            .get_or_try_insert_with(key.clone(), || async {
                let raw = self
                    .bounded(
                        self.stock_provider
                            .fetch_history(&key.ticker, &key.period, &key.interval),
                    )
                    .await?;
                let table = normalize_stock_history(raw)?;
                info!(ticker = %key.ticker, rows = table.len(), "Fetched stock history");
                Ok::<_, anyhow::Error>(Arc::new(table))
            })
            .await;

        match result {
            Ok(table) => FetchOutcome::Fetched(table),
            Err(error) => {
                warn!(ticker = %key.ticker, error = %error, "Stock fetch error");
                FetchOutcome::Failed {
                    asset: AssetClass::Stock,
                    error,
                }
            }
        }
    }

    pub async fn fetch_crypto_history(
        &self,
        symbol: &str,
        exchange_name: &str,
        timeframe: &str,
    ) -> FetchOutcome {
        let key = CryptoKey {
            exchange: exchange_name.trim().to_lowercase(),
            symbol: normalize_pair(symbol),
            timeframe: timeframe.to_string(),
        };

        let result = self
            .crypto_cache
            .get_or_try_insert_with(key.clone(), || async {
                let exchange = self.exchanges.resolve(&key.exchange)?;
                let candles = self
                    .bounded(exchange.fetch_ohlcv(&key.symbol, &key.timeframe, self.crypto_limit))
                    .await?;
                let table = normalize_candles(candles)?;
                info!(
                    exchange = %key.exchange,
                    symbol = %key.symbol,
                    rows = table.len(),
                    "Fetched crypto history"
                );
                Ok::<_, anyhow::Error>(Arc::new(table))
            })
            .await;

        match result {
            Ok(table) => FetchOutcome::Fetched(table),
            Err(error) => {
                warn!(symbol = %key.symbol, error = %error, "Crypto fetch error");
                FetchOutcome::Failed {
                    asset: AssetClass::Crypto,
                    error,
                }
            }
        }
    }
}
