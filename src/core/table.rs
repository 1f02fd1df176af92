//! Normalized OHLCV price table shared by the fetchers and the analytics.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

/// Format used when a timestamp is rendered as text in API responses.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Name of the timestamp field in serialized rows.
pub const TIMESTAMP_FIELD: &str = "timestamp";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub enum PriceColumn {
    Open,
    High,
    Low,
    #[default]
    Close,
    Volume,
}

impl PriceColumn {
    pub const ALL: [PriceColumn; 5] = [
        PriceColumn::Open,
        PriceColumn::High,
        PriceColumn::Low,
        PriceColumn::Close,
        PriceColumn::Volume,
    ];

    /// Canonical column name used once a table is normalized.
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceColumn::Open => "Open",
            PriceColumn::High => "High",
            PriceColumn::Low => "Low",
            PriceColumn::Close => "Close",
            PriceColumn::Volume => "Volume",
        }
    }
}

impl Display for PriceColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PriceColumn {
    type Err = anyhow::Error;

    /// Provider column names differ only in case, so matching is case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(PriceColumn::Open),
            "high" => Ok(PriceColumn::High),
            "low" => Ok(PriceColumn::Low),
            "close" => Ok(PriceColumn::Close),
            "volume" => Ok(PriceColumn::Volume),
            _ => Err(anyhow!("Unknown price column: {}", s)),
        }
    }
}

/// One complete OHLCV row.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Chronologically ordered price history stored column by column.
///
/// Columns are optional: a table only carries the columns its source
/// provided. Every present column has exactly one value per timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceTable {
    timestamps: Vec<DateTime<Utc>>,
    columns: BTreeMap<PriceColumn, Vec<f64>>,
}

impl PriceTable {
    /// A table with no rows and no columns.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A table with no rows that still carries every canonical column.
    pub fn empty_with_canonical_columns() -> Self {
        Self {
            timestamps: Vec::new(),
            columns: PriceColumn::ALL.iter().map(|c| (*c, Vec::new())).collect(),
        }
    }

    /// Builds a table from parallel vectors, sorting rows by timestamp.
    pub fn from_columns(
        timestamps: Vec<DateTime<Utc>>,
        columns: BTreeMap<PriceColumn, Vec<f64>>,
    ) -> Result<Self> {
        if let Some((column, values)) = columns
            .iter()
            .find(|(_, values)| values.len() != timestamps.len())
        {
            return Err(anyhow!(
                "Column {} has {} values but the table has {} timestamps",
                column,
                values.len(),
                timestamps.len()
            ));
        }

        if timestamps.windows(2).all(|w| w[0] <= w[1]) {
            return Ok(Self {
                timestamps,
                columns,
            });
        }

        let mut order: Vec<usize> = (0..timestamps.len()).collect();
        order.sort_by_key(|&i| timestamps[i]);
        let columns = columns
            .into_iter()
            .map(|(column, values)| (column, order.iter().map(|&i| values[i]).collect()))
            .collect();
        let timestamps = order.iter().map(|&i| timestamps[i]).collect();

        Ok(Self {
            timestamps,
            columns,
        })
    }

    pub fn from_candles(candles: Vec<Candle>) -> Self {
        let mut timestamps = Vec::with_capacity(candles.len());
        let mut columns: BTreeMap<PriceColumn, Vec<f64>> = PriceColumn::ALL
            .iter()
            .map(|c| (*c, Vec::with_capacity(candles.len())))
            .collect();

        for candle in candles {
            timestamps.push(candle.timestamp);
            for (column, value) in [
                (PriceColumn::Open, candle.open),
                (PriceColumn::High, candle.high),
                (PriceColumn::Low, candle.low),
                (PriceColumn::Close, candle.close),
                (PriceColumn::Volume, candle.volume),
            ] {
                columns.entry(column).or_default().push(value);
            }
        }

        // Lengths match by construction, only the ordering may need fixing.
        Self::from_columns(timestamps, columns).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn column(&self, column: PriceColumn) -> Option<&[f64]> {
        self.columns.get(&column).map(Vec::as_slice)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.keys().map(PriceColumn::as_str).collect()
    }

    /// Renders each row as a JSON object with a textual timestamp.
    pub fn to_records(&self) -> Vec<Value> {
        (0..self.len())
            .map(|row| {
                let mut record = Map::new();
                record.insert(
                    TIMESTAMP_FIELD.to_string(),
                    Value::String(self.timestamps[row].format(TIMESTAMP_FORMAT).to_string()),
                );
                for (column, values) in &self.columns {
                    record.insert(column.to_string(), Value::from(values[row]));
                }
                Value::Object(record)
            })
            .collect()
    }
}
