use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::core::config::AppConfig;
use crate::fetcher::{CryptoCache, HistoryFetcher, StockCache};
use crate::providers::{ExchangeRegistry, YahooFinanceProvider};

/// Shared state handed to every route handler.
pub struct AppState {
    pub fetcher: HistoryFetcher,
}

impl AppState {
    pub fn new(fetcher: HistoryFetcher) -> Self {
        Self { fetcher }
    }

    /// Wires providers and caches from configuration. Caches are created
    /// here once and live as long as the state.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let stock_cache = Arc::new(StockCache::new(config.cache.stock_ttl()));
        let crypto_cache = Arc::new(CryptoCache::new(config.cache.crypto_ttl()));

        let stock_provider = Arc::new(YahooFinanceProvider::new(config.yahoo_base_url())?);
        let exchanges = ExchangeRegistry::from_config(&config.providers.exchanges)?;
        info!(exchanges = ?exchanges.names(), "Configured exchanges");

        let fetcher = HistoryFetcher::new(stock_provider, exchanges, stock_cache, crypto_cache)
            .with_timeout(config.fetch.timeout())
            .with_crypto_limit(config.fetch.crypto_limit);

        Ok(Self::new(fetcher))
    }
}
