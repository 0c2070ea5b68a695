//! Commands flowing into the matching thread and events flowing out of it.
//!
//! Commands are fixed-width `Copy` records so producers enqueue without
//! allocating. Events are produced on the matching thread and handed to the
//! publisher port, which must copy or consume them.

use thiserror::Error;

use crate::types::{
    Account, OrderId, OrderKind, OrderStatus, Price, Quantity, Side, Symbol, TimeInForce, TradeId,
};

// ============================================================================
// Inbound commands
// ============================================================================

/// Request to admit a new order.
#[derive(Clone, Copy, Debug)]
pub struct AddOrder {
    pub id: OrderId,
    pub side: Side,
    pub kind: OrderKind,
    pub tif: TimeInForce,
    /// Ignored for `OrderKind::Market`.
    pub price: Price,
    pub quantity: Quantity,
    pub symbol: Symbol,
    pub account: Account,
}

impl AddOrder {
    pub fn limit(id: u64, side: Side, price: Price, quantity: Quantity) -> Self {
        Self {
            id: OrderId(id),
            side,
            kind: OrderKind::Limit,
            tif: TimeInForce::Gtc,
            price,
            quantity,
            symbol: Symbol::default(),
            account: Account::default(),
        }
    }

    pub fn ioc(id: u64, side: Side, price: Price, quantity: Quantity) -> Self {
        Self {
            tif: TimeInForce::Ioc,
            ..Self::limit(id, side, price, quantity)
        }
    }

    pub fn fok(id: u64, side: Side, price: Price, quantity: Quantity) -> Self {
        Self {
            tif: TimeInForce::Fok,
            ..Self::limit(id, side, price, quantity)
        }
    }

    pub fn market(id: u64, side: Side, quantity: Quantity) -> Self {
        Self {
            kind: OrderKind::Market,
            ..Self::limit(id, side, Price::ZERO, quantity)
        }
    }

    pub fn with_symbol(mut self, symbol: Symbol) -> Self {
        self.symbol = symbol;
        self
    }

    pub fn with_account(mut self, account: Account) -> Self {
        self.account = account;
        self
    }
}

/// Request to cancel a resting order.
#[derive(Clone, Copy, Debug)]
pub struct CancelOrder {
    pub id: OrderId,
}

/// Request to re-price and/or re-size a resting order.
#[derive(Clone, Copy, Debug)]
pub struct ModifyOrder {
    pub id: OrderId,
    pub new_price: Option<Price>,
    pub new_quantity: Option<Quantity>,
}

/// Discriminated command record carried by the ingestion shards.
#[derive(Clone, Copy, Debug)]
pub enum Command {
    Add(AddOrder),
    Cancel(CancelOrder),
    Modify(ModifyOrder),
}

/// External market-data mirror updates. These travel their own sharded
/// queue, mutate level aggregates only, and never produce trades.
#[derive(Clone, Copy, Debug)]
pub enum MarketUpdate {
    /// Drop the whole book before a snapshot (also used for gap recovery).
    SnapshotStart,
    SnapshotEnd,
    /// Set a level's aggregates, creating the level if absent.
    Set {
        side: Side,
        price: Price,
        quantity: Quantity,
        order_count: u32,
    },
    /// Drop a level.
    Remove { side: Side, price: Price },
}

// ============================================================================
// Outbound events
// ============================================================================

/// Why an order (or command) was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error("quantity must be positive")]
    InvalidQuantity,
    #[error("quantity {0} exceeds the admissible maximum")]
    QuantityOverflow(u64),
    #[error("limit price must be positive")]
    InvalidPrice,
    #[error("symbol does not match this book")]
    UnknownSymbol,
    #[error("order id already present")]
    DuplicateOrderId,
    #[error("order capacity exhausted")]
    BookFull,
    #[error("insufficient liquidity to fill")]
    InsufficientLiquidity,
    #[error("order size {0} exceeds limit {1}")]
    OrderTooLarge(u64, u64),
    #[error("price outside risk bounds")]
    PriceOutOfBounds,
    #[error("position limit breached")]
    PositionLimit,
}

/// A fill. The maker's resting price is the trade price.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trade {
    pub id: TradeId,
    pub taker_order_id: OrderId,
    pub maker_order_id: OrderId,
    pub taker_side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub symbol: Symbol,
    pub ts_ns: u64,
}

/// What happened to one price level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookUpdateKind {
    Add,
    Modify,
    Remove,
}

/// A change at a single price level, sequenced for downstream mirroring.
/// Gaps and duplicates in `sequence` are bugs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BookUpdate {
    pub kind: BookUpdateKind,
    pub side: Side,
    pub price: Price,
    /// Total remaining at the level after the change (0 for `Remove`).
    pub quantity: Quantity,
    pub order_count: u32,
    pub sequence: u64,
    pub ts_ns: u64,
}

/// Top-of-book snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BestPrices {
    pub bid: Option<Price>,
    pub ask: Option<Price>,
    pub bid_size: Option<Quantity>,
    pub ask_size: Option<Quantity>,
    pub sequence: u64,
    pub ts_ns: u64,
}

/// One aggregated level of depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthLevel {
    pub price: Price,
    pub quantity: Quantity,
    pub order_count: u32,
}

/// N levels per side, best first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MarketDepth {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
    pub ts_ns: u64,
}

/// Execution-report type, FIX-flavoured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecType {
    New,
    PartialFill,
    Fill,
    Cancelled,
    Rejected,
}

/// Per-order lifecycle report handed to the publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionReport {
    pub order_id: OrderId,
    pub exec_type: ExecType,
    pub status: OrderStatus,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub filled_quantity: Quantity,
    pub leaves_quantity: Quantity,
    pub trade_id: Option<TradeId>,
    pub symbol: Symbol,
    pub account: Account,
    pub reason: Option<RejectReason>,
    pub ts_ns: u64,
}
