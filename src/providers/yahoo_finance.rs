use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::core::history::{RawStockHistory, StockHistoryProvider};

const CLOSE: &str = "close";
const ADJUSTED_COLUMNS: [&str; 4] = ["open", "high", "low", CLOSE];

/// Stock history from the Yahoo Finance chart API.
pub struct YahooFinanceProvider {
    base_url: String,
    client: reqwest::Client,
}

impl YahooFinanceProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("pricedash/1.0")
            .build()?;
        Ok(YahooFinanceProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn chart_url(&self, ticker: &str, period: &str, interval: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid Yahoo base URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Yahoo base URL cannot take a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", ticker]);
        url.query_pairs_mut()
            .append_pair("range", period)
            .append_pair("interval", interval);
        Ok(url)
    }
}

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Option<Vec<ChartItem>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    #[serde(default)]
    quote: Vec<BTreeMap<String, Vec<Option<f64>>>>,
    #[serde(default)]
    adjclose: Vec<AdjClose>,
}

#[derive(Deserialize, Debug)]
struct AdjClose {
    adjclose: Vec<Option<f64>>,
}

/// Scales OHLC values by `adjclose / close` so splits and dividends do not
/// show up as price jumps.
fn auto_adjust(columns: &mut BTreeMap<String, Vec<Option<f64>>>, adjclose: &[Option<f64>]) {
    let Some(close) = columns.get(CLOSE).cloned() else {
        return;
    };
    let ratios: Vec<Option<f64>> = close
        .iter()
        .zip(adjclose)
        .map(|(close, adj)| match (close, adj) {
            (Some(close), Some(adj)) if *close != 0.0 => Some(adj / close),
            _ => None,
        })
        .collect();

    for name in ADJUSTED_COLUMNS {
        if let Some(values) = columns.get_mut(name) {
            for (value, ratio) in values.iter_mut().zip(&ratios) {
                if let (Some(v), Some(r)) = (value.as_mut(), ratio) {
                    *v *= r;
                }
            }
        }
    }
}

#[async_trait]
impl StockHistoryProvider for YahooFinanceProvider {
    #[instrument(
        name = "YahooHistoryFetch",
        skip(self),
        fields(ticker = %ticker)
    )]
    async fn fetch_history(
        &self,
        ticker: &str,
        period: &str,
        interval: &str,
    ) -> Result<RawStockHistory> {
        let url = self.chart_url(ticker, period, interval)?;
        debug!("Requesting price history from {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| anyhow!("Request error: {} for symbol: {} URL: {}", e, ticker, url))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP error: {} for symbol: {}",
                response.status(),
                ticker
            ));
        }

        let text = response.text().await?;
        let data: YahooChartResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", ticker, e))?;

        if let Some(error) = data.chart.error {
            return Err(anyhow!(
                "Provider error for symbol {}: {}",
                ticker,
                error.description
            ));
        }

        let item = data
            .chart
            .result
            .and_then(|items| items.into_iter().next())
            .ok_or_else(|| anyhow!("No price data found for symbol: {}", ticker))?;

        // Yahoo omits the bars entirely when the range holds no trading days
        let Some(index) = item.timestamp else {
            debug!("No bars returned for {}", ticker);
            return Ok(RawStockHistory::default());
        };
        let indicators = item
            .indicators
            .ok_or_else(|| anyhow!("No indicators found for symbol: {}", ticker))?;

        let mut columns = indicators.quote.into_iter().next().unwrap_or_default();
        if let Some(adj) = indicators.adjclose.first() {
            auto_adjust(&mut columns, &adj.adjclose);
        }

        Ok(RawStockHistory {
            index,
            columns: columns.into_iter().collect(),
        })
    }
}
