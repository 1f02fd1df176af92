use anyhow::{Result, anyhow};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::binance::BinanceExchange;
use crate::core::config::ExchangeConfig;
use crate::core::history::CryptoExchange;

/// Exchange adapters addressable by name.
#[derive(Default, Clone)]
pub struct ExchangeRegistry {
    exchanges: HashMap<String, Arc<dyn CryptoExchange>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one Binance-compatible adapter per configured exchange.
    pub fn from_config(configs: &BTreeMap<String, ExchangeConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (name, config) in configs {
            let exchange = BinanceExchange::new(
                name,
                &config.base_url,
                Duration::from_secs(config.timeout_secs),
            )?;
            registry.register(Arc::new(exchange));
        }
        Ok(registry)
    }

    pub fn register(&mut self, exchange: Arc<dyn CryptoExchange>) {
        debug!("Registering exchange {}", exchange.name());
        self.exchanges.insert(exchange.name().to_lowercase(), exchange);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn CryptoExchange>> {
        self.exchanges
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| anyhow!("Unknown exchange: {}", name))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.exchanges.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
