//! Stock status classification.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockforge_core::{DomainError, Quantity};

/// Derived availability status of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
    /// Display-only: nothing is available but active holds exist, so the
    /// stock is spoken for rather than gone.
    Reserved,
}

impl StockStatus {
    /// Stable text form used for persistence.
    pub fn as_str(self) -> &'static str {
        match self {
            StockStatus::InStock => "in_stock",
            StockStatus::LowStock => "low_stock",
            StockStatus::OutOfStock => "out_of_stock",
            StockStatus::Reserved => "reserved",
        }
    }
}

impl FromStr for StockStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_stock" => Ok(StockStatus::InStock),
            "low_stock" => Ok(StockStatus::LowStock),
            "out_of_stock" => Ok(StockStatus::OutOfStock),
            "reserved" => Ok(StockStatus::Reserved),
            other => Err(DomainError::validation(format!(
                "unknown stock status '{other}'"
            ))),
        }
    }
}

/// Classify a bucket from its quantities and thresholds.
///
/// Pure function; the ledger store calls it after every commit and persists
/// the result. The low-stock threshold is the reorder point when configured,
/// the minimum stock level otherwise. `Reserved` replaces `OutOfStock` only —
/// it never masks a bucket that still has availability.
pub fn classify(
    available: Quantity,
    reserved: Quantity,
    min_stock_level: Quantity,
    reorder_point: Option<Quantity>,
) -> StockStatus {
    let threshold = reorder_point.unwrap_or(min_stock_level);

    if available.is_zero() {
        if reserved.is_positive() {
            StockStatus::Reserved
        } else {
            StockStatus::OutOfStock
        }
    } else if available <= threshold {
        StockStatus::LowStock
    } else {
        StockStatus::InStock
    }
}
