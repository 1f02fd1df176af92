//! Summary KPIs and moving averages computed over a price table.
use crate::core::table::{PriceColumn, PriceTable};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Windows used when the caller does not ask for specific ones.
pub const DEFAULT_WINDOWS: [usize; 3] = [7, 50, 200];

/// Headline figures for a price series.
///
/// Every field is `None` when there is no data, which is distinct from a
/// series that genuinely moved by zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KpiResult {
    pub last_price: Option<f64>,
    pub change: Option<f64>,
    pub pct_change: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
}

/// Rolling means keyed by window size, each aligned with the table's rows.
///
/// Serializes as an object keyed `MA<window>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovingAverageSet(BTreeMap<usize, Vec<f64>>);

impl MovingAverageSet {
    pub fn label(window: usize) -> String {
        format!("MA{window}")
    }

    pub fn get(&self, window: usize) -> Option<&[f64]> {
        self.0.get(&window).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[f64])> {
        self.0.iter().map(|(window, values)| (*window, values.as_slice()))
    }
}

impl Serialize for MovingAverageSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (window, values) in &self.0 {
            map.serialize_entry(&Self::label(*window), values)?;
        }
        map.end()
    }
}

/// Computes last price, day-over-day change, and the high/low of `column`.
pub fn compute_kpis(table: &PriceTable, column: PriceColumn) -> KpiResult {
    let values = match table.column(column) {
        Some(values) if !values.is_empty() => values,
        _ => {
            debug!("No {} data, returning empty KPIs", column);
            return KpiResult::default();
        }
    };

    let last_price = values[values.len() - 1];
    let prev_price = if values.len() > 1 {
        values[values.len() - 2]
    } else {
        last_price
    };
    let change = last_price - prev_price;
    let pct_change = if prev_price != 0.0 {
        change / prev_price * 100.0
    } else {
        0.0
    };

    let high = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let low = values.iter().copied().fold(f64::INFINITY, f64::min);

    KpiResult {
        last_price: Some(last_price),
        change: Some(change),
        pct_change: Some(pct_change),
        high: Some(high),
        low: Some(low),
    }
}

/// Computes a simple moving average of `column` for each window.
///
/// Leading points use however many values are available, so each sequence
/// is as long as the table.
pub fn compute_moving_averages(
    table: &PriceTable,
    column: PriceColumn,
    windows: &[usize],
) -> MovingAverageSet {
    let mut averages = MovingAverageSet::default();
    let values = match table.column(column) {
        Some(values) if !values.is_empty() => values,
        _ => return averages,
    };

    for &window in windows {
        if window == 0 {
            debug!("Skipping moving average with a zero window");
            continue;
        }
        averages.0.insert(window, rolling_mean(values, window));
    }

    averages
}

fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, value) in values.iter().enumerate() {
        sum += value;
        if i >= window {
            sum -= values[i - window];
        }
        let count = (i + 1).min(window);
        out.push(sum / count as f64);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn table_with_closes(closes: &[f64]) -> PriceTable {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let timestamps = (0..closes.len())
            .map(|i| start + Duration::days(i as i64))
            .collect();
        let mut columns = BTreeMap::new();
        columns.insert(PriceColumn::Close, closes.to_vec());
        PriceTable::from_columns(timestamps, columns).unwrap()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_kpis_for_three_rows() {
        let table = table_with_closes(&[10.0, 12.0, 11.0]);
        let kpis = compute_kpis(&table, PriceColumn::Close);

        assert_eq!(kpis.last_price, Some(11.0));
        assert_eq!(kpis.change, Some(-1.0));
        assert_close(kpis.pct_change.unwrap(), -1.0 / 12.0 * 100.0);
        assert_eq!(kpis.high, Some(12.0));
        assert_eq!(kpis.low, Some(10.0));
    }

    #[test]
    fn test_kpis_for_single_row() {
        let kpis = compute_kpis(&table_with_closes(&[42.5]), PriceColumn::Close);

        assert_eq!(kpis.last_price, Some(42.5));
        assert_eq!(kpis.change, Some(0.0));
        assert_eq!(kpis.pct_change, Some(0.0));
        assert_eq!(kpis.high, Some(42.5));
        assert_eq!(kpis.low, Some(42.5));
    }

    #[test]
    fn test_kpis_guard_zero_previous_price() {
        let kpis = compute_kpis(&table_with_closes(&[5.0, 0.0, 3.0]), PriceColumn::Close);

        assert_eq!(kpis.change, Some(3.0));
        assert_eq!(kpis.pct_change, Some(0.0));
        assert_eq!(kpis.low, Some(0.0));
    }

    #[test]
    fn test_kpis_without_data_are_all_absent() {
        let empty = compute_kpis(&PriceTable::empty(), PriceColumn::Close);
        assert_eq!(empty, KpiResult::default());
        assert_eq!(
            serde_json::to_value(&empty).unwrap(),
            serde_json::json!({
                "last_price": null,
                "change": null,
                "pct_change": null,
                "high": null,
                "low": null
            })
        );

        let table = table_with_closes(&[1.0, 2.0]);
        assert_eq!(compute_kpis(&table, PriceColumn::Volume), KpiResult::default());

        let canonical = PriceTable::empty_with_canonical_columns();
        assert_eq!(
            compute_kpis(&canonical, PriceColumn::Close),
            KpiResult::default()
        );
    }

    #[test]
    fn test_moving_average_expands_until_window_fills() {
        let table = table_with_closes(&[10.0, 12.0, 11.0]);
        let averages = compute_moving_averages(&table, PriceColumn::Close, &[2]);

        assert_eq!(averages.get(2).unwrap(), &[10.0, 11.0, 11.5]);
    }

    #[test]
    fn test_moving_averages_match_trailing_means() {
        let closes: Vec<f64> = (0..30).map(|i| ((i * 7) % 11) as f64 + 0.25).collect();
        let table = table_with_closes(&closes);
        let averages = compute_moving_averages(&table, PriceColumn::Close, &[1, 5, 50]);

        for (window, series) in averages.iter() {
            assert_eq!(series.len(), closes.len());
            for (i, value) in series.iter().enumerate() {
                let start = (i + 1).saturating_sub(window);
                let slice = &closes[start..=i];
                let expected = slice.iter().sum::<f64>() / slice.len() as f64;
                assert_close(*value, expected);
            }
        }
    }

    #[test]
    fn test_default_windows_are_labelled() {
        let table = table_with_closes(&[1.0, 2.0, 3.0, 4.0]);
        let averages = compute_moving_averages(&table, PriceColumn::Close, &DEFAULT_WINDOWS);

        let json = serde_json::to_value(&averages).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 3);
        assert!(json.get("MA7").is_some());
        assert!(json.get("MA50").is_some());
        assert!(json.get("MA200").is_some());
        assert_eq!(json["MA200"], serde_json::json!([1.0, 1.5, 2.0, 2.5]));
    }

    #[test]
    fn test_moving_averages_without_data_are_empty() {
        let empty = compute_moving_averages(&PriceTable::empty(), PriceColumn::Close, &[7]);
        assert!(empty.is_empty());
        assert_eq!(serde_json::to_value(&empty).unwrap(), serde_json::json!({}));

        let table = table_with_closes(&[1.0]);
        assert!(compute_moving_averages(&table, PriceColumn::Open, &[7]).is_empty());
    }

    #[test]
    fn test_zero_window_is_skipped() {
        let table = table_with_closes(&[1.0, 2.0]);
        let averages = compute_moving_averages(&table, PriceColumn::Close, &[0, 2]);

        assert_eq!(averages.len(), 1);
        assert!(averages.get(0).is_none());
    }
}
