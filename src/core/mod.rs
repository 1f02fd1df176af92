//! Core types, analytics and ambient plumbing

pub mod analytics;
pub mod cache;
pub mod config;
pub mod history;
pub mod log;
pub mod table;

// Re-export main types for cleaner imports
pub use analytics::{KpiResult, MovingAverageSet, compute_kpis, compute_moving_averages};
pub use cache::TtlCache;
pub use history::{CryptoExchange, OhlcvCandle, RawStockHistory, StockHistoryProvider};
pub use table::{Candle, PriceColumn, PriceTable};
