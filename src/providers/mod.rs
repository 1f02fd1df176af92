pub mod binance;
pub mod exchanges;
pub mod yahoo_finance;

pub use binance::BinanceExchange;
pub use exchanges::ExchangeRegistry;
pub use yahoo_finance::YahooFinanceProvider;
