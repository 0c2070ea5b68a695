//! Adapter from external venue market data to native mirror updates.
//!
//! External feeds carry decimal prices and RFC3339 timestamps; this module
//! converts rows into scaled-integer [`MarketUpdate`]s and depth snapshots
//! that travel the mirror pathway. Parsing happens off the matching thread.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::command::{DepthLevel, MarketDepth, MarketUpdate};
use crate::types::{Price, Side, PRICE_SCALE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("unknown row type: {0}")]
    UnknownType(String),
    #[error("unknown side: {0}")]
    UnknownSide(String),
    #[error("row is missing a required field: {0}")]
    MissingField(&'static str),
    #[error("price does not fit the tick grid")]
    PriceOverflow,
    #[error("quantity does not fit")]
    QuantityOverflow,
}

/// One L2 row as exchanges typically stream them: a level set or delete
/// with decimal price and size.
#[derive(Debug, Clone, Deserialize)]
pub struct L2Row {
    #[serde(rename = "type")]
    pub kind: String,
    pub side: Option<String>,
    pub price: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub order_count: Option<u32>,
    pub timestamp: Option<DateTime<Utc>>,
}

fn parse_side(raw: Option<&str>) -> Result<Side, FeedError> {
    match raw {
        Some("buy") | Some("bid") => Ok(Side::Buy),
        Some("sell") | Some("ask") => Ok(Side::Sell),
        Some(other) => Err(FeedError::UnknownSide(other.to_string())),
        None => Err(FeedError::MissingField("side")),
    }
}

fn scale_price(value: Decimal) -> Result<Price, FeedError> {
    (value * Decimal::from(PRICE_SCALE))
        .to_u64()
        .map(Price)
        .ok_or(FeedError::PriceOverflow)
}

fn scale_quantity(value: Decimal) -> Result<u64, FeedError> {
    value.to_u64().ok_or(FeedError::QuantityOverflow)
}

impl L2Row {
    /// Convert to a native mirror update. `set` rows with zero size become
    /// removals, matching the usual exchange convention.
    pub fn to_update(&self) -> Result<MarketUpdate, FeedError> {
        let side = parse_side(self.side.as_deref())?;
        match self.kind.as_str() {
            "set" | "update" | "add" => {
                let price = scale_price(self.price.ok_or(FeedError::MissingField("price"))?)?;
                let quantity =
                    scale_quantity(self.amount.ok_or(FeedError::MissingField("amount"))?)?;
                if quantity == 0 {
                    return Ok(MarketUpdate::Remove { side, price });
                }
                Ok(MarketUpdate::Set {
                    side,
                    price,
                    quantity,
                    order_count: self.order_count.unwrap_or(1),
                })
            }
            "delete" | "remove" => {
                let price = scale_price(self.price.ok_or(FeedError::MissingField("price"))?)?;
                Ok(MarketUpdate::Remove { side, price })
            }
            other => Err(FeedError::UnknownType(other.to_string())),
        }
    }
}

/// Build a depth snapshot out of `set` rows, for `apply_external_snapshot`.
pub fn snapshot_from_rows(rows: &[L2Row]) -> Result<MarketDepth, FeedError> {
    let mut depth = MarketDepth::default();
    for row in rows {
        let side = parse_side(row.side.as_deref())?;
        let price = scale_price(row.price.ok_or(FeedError::MissingField("price"))?)?;
        let quantity = scale_quantity(row.amount.ok_or(FeedError::MissingField("amount"))?)?;
        let level = DepthLevel {
            price,
            quantity,
            order_count: row.order_count.unwrap_or(1),
        };
        match side {
            Side::Buy => depth.bids.push(level),
            Side::Sell => depth.asks.push(level),
        }
        if let Some(ts) = row.timestamp {
            depth.ts_ns = ts.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
        }
    }
    Ok(depth)
}
