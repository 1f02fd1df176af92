use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::core::history::{CryptoExchange, OhlcvCandle};

/// Candles from any exchange speaking the Binance spot klines API.
pub struct BinanceExchange {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl BinanceExchange {
    pub fn new(name: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("pricedash/1.0")
            .timeout(timeout)
            .build()?;
        Ok(BinanceExchange {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// `BTC/USDT` becomes the market id `BTCUSDT`.
    pub fn market_id(symbol: &str) -> String {
        symbol.replace('/', "").to_uppercase()
    }

    fn klines_url(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base URL for {}: {}", self.name, self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Base URL for {} cannot take a path", self.name))?
            .pop_if_empty()
            .extend(["api", "v3", "klines"]);
        url.query_pairs_mut()
            .append_pair("symbol", &Self::market_id(symbol))
            .append_pair("interval", timeframe)
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }
}

#[derive(Deserialize, Debug)]
struct BinanceError {
    msg: String,
}

fn number_at(row: &[Value], index: usize) -> Result<f64> {
    match row.get(index) {
        Some(Value::String(s)) => s
            .parse::<f64>()
            .with_context(|| format!("Invalid number in kline field {index}: {s}")),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| anyhow!("Invalid number in kline field {index}")),
        _ => Err(anyhow!("Missing kline field {index}")),
    }
}

fn parse_kline(row: &[Value]) -> Result<OhlcvCandle> {
    let timestamp_ms = row
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow!("Missing kline open time"))?;

    Ok(OhlcvCandle {
        timestamp_ms,
        open: number_at(row, 1)?,
        high: number_at(row, 2)?,
        low: number_at(row, 3)?,
        close: number_at(row, 4)?,
        volume: number_at(row, 5)?,
    })
}

#[async_trait]
impl CryptoExchange for BinanceExchange {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "ExchangeOhlcvFetch",
        skip(self),
        fields(exchange = %self.name, symbol = %symbol)
    )]
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<OhlcvCandle>> {
        let url = self.klines_url(symbol, timeframe, limit)?;
        debug!("Requesting candles from {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| anyhow!("Request error: {} for symbol: {} URL: {}", e, symbol, url))?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let reason = serde_json::from_str::<BinanceError>(&text)
                .map(|e| e.msg)
                .unwrap_or_else(|_| status.to_string());
            return Err(anyhow!(
                "Exchange {} rejected {}: {}",
                self.name,
                symbol,
                reason
            ));
        }

        let rows: Vec<Vec<Value>> = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", symbol, e))?;

        rows.iter()
            .map(|row| parse_kline(row))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Malformed candle data for {symbol}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn exchange(server: &MockServer) -> BinanceExchange {
        BinanceExchange::new("binance", &server.uri(), Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn test_market_id() {
        assert_eq!(BinanceExchange::market_id("BTC/USDT"), "BTCUSDT");
        assert_eq!(BinanceExchange::market_id("eth/btc"), "ETHBTC");
        assert_eq!(BinanceExchange::market_id("SOLUSDT"), "SOLUSDT");
    }

    #[tokio::test]
    async fn test_successful_ohlcv_fetch() {
        let mock_response = r#"[
            [1704067200000, "42283.58", "44184.10", "42180.77", "44179.55", "27174.29", 1704153599999, "0", 0, "0", "0", "0"],
            [1704153600000, "44179.55", "45879.63", "44148.34", "44946.91", "65146.40", 1704239999999, "0", 0, "0", "0", "0"]
        ]"#;

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .and(query_param("symbol", "BTCUSDT"))
            .and(query_param("interval", "1d"))
            .and(query_param("limit", "200"))
            .respond_with(ResponseTemplate::new(200).set_body_string(mock_response))
            .mount(&mock_server)
            .await;

        let candles = exchange(&mock_server)
            .fetch_ohlcv("BTC/USDT", "1d", 200)
            .await
            .unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp_ms, 1704067200000);
        assert_eq!(candles[0].open, 42283.58);
        assert_eq!(candles[1].close, 44946.91);
        assert_eq!(candles[1].volume, 65146.40);
    }

    #[tokio::test]
    async fn test_unlisted_symbol() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"code": -1121, "msg": "Invalid symbol."}"#),
            )
            .mount(&mock_server)
            .await;

        let result = exchange(&mock_server).fetch_ohlcv("FOO/BAR", "1d", 200).await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "Exchange binance rejected FOO/BAR: Invalid symbol."
        );
    }

    #[tokio::test]
    async fn test_server_error_without_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let result = exchange(&mock_server).fetch_ohlcv("BTC/USDT", "1d", 200).await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "Exchange binance rejected BTC/USDT: 503 Service Unavailable"
        );
    }

    #[tokio::test]
    async fn test_malformed_candle() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"[[1704067200000, "abc"]]"#),
            )
            .mount(&mock_server)
            .await;

        let result = exchange(&mock_server).fetch_ohlcv("BTC/USDT", "1d", 200).await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "Malformed candle data for BTC/USDT"
        );
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("[]")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let exchange =
            BinanceExchange::new("binance", &mock_server.uri(), Duration::from_millis(50))
                .unwrap();
        let result = exchange.fetch_ohlcv("BTC/USDT", "1d", 200).await;
        assert!(result.unwrap_err().to_string().starts_with("Request error"));
    }

    #[tokio::test]
    async fn test_request_parameters_are_encoded() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&mock_server)
            .await;

        let candles = exchange(&mock_server)
            .fetch_ohlcv("ETH/BTC", "1d&limit=5", 200)
            .await
            .unwrap();
        assert!(candles.is_empty());

        let requests = mock_server.received_requests().await.unwrap();
        let query: Vec<(String, String)> = requests[0].url.query_pairs().into_owned().collect();
        assert_eq!(
            query,
            vec![
                ("symbol".to_string(), "ETHBTC".to_string()),
                ("interval".to_string(), "1d&limit=5".to_string()),
                ("limit".to_string(), "200".to_string()),
            ]
        );
    }
}
