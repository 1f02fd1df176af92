//! Response payload combining history, KPIs and moving averages.
use serde::Serialize;
use serde_json::Value;

use crate::core::analytics::{
    DEFAULT_WINDOWS, KpiResult, MovingAverageSet, compute_kpis, compute_moving_averages,
};
use crate::core::table::{PriceColumn, PriceTable};

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub kpis: KpiResult,
    pub history: Vec<Value>,
    pub moving_averages: MovingAverageSet,
}

impl Dashboard {
    /// Runs the analytics over the close column with the default windows.
    pub fn from_table(table: &PriceTable) -> Self {
        Self::with_windows(table, &DEFAULT_WINDOWS)
    }

    pub fn with_windows(table: &PriceTable, windows: &[usize]) -> Self {
        Dashboard {
            kpis: compute_kpis(table, PriceColumn::Close),
            history: table.to_records(),
            moving_averages: compute_moving_averages(table, PriceColumn::Close, windows),
        }
    }
}
