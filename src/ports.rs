//! Ports to external collaborators: risk pre-filter and market-data
//! publication. The core depends only on these traits; concrete adapters
//! (FIX sessions, WebSocket fan-out, databases) live outside the crate.

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::error;

use crate::arena::OrderNode;
use crate::command::{BestPrices, BookUpdate, ExecutionReport, MarketDepth, RejectReason, Trade};
use crate::types::{Account, Price, Symbol};

/// Outcome of a risk validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RiskCheck {
    Approved,
    Rejected(RejectReason),
}

impl RiskCheck {
    #[inline]
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskCheck::Approved)
    }
}

/// Per-account position state.
#[derive(Clone, Debug, Default)]
pub struct Portfolio {
    pub account: Account,
    positions: FxHashMap<Symbol, i64>,
    last_prices: FxHashMap<Symbol, Price>,
}

impl Portfolio {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            positions: FxHashMap::default(),
            last_prices: FxHashMap::default(),
        }
    }

    pub fn apply_fill(&mut self, symbol: Symbol, signed_quantity: i64, price: Price) {
        *self.positions.entry(symbol).or_insert(0) += signed_quantity;
        self.last_prices.insert(symbol, price);
    }

    #[inline]
    pub fn position(&self, symbol: &Symbol) -> i64 {
        self.positions.get(symbol).copied().unwrap_or(0)
    }

    #[inline]
    pub fn last_price(&self, symbol: &Symbol) -> Option<Price> {
        self.last_prices.get(symbol).copied()
    }
}

/// Risk pre-filter consulted before an order enters the book.
///
/// The matching thread calls `associate_order` and `validate_order` at
/// admission and `update_position` after every trade. `set_bypass` is a
/// runtime toggle so benchmarks can run against a release build without a
/// recompile.
pub trait RiskPort: Send {
    /// Validate against limits and the submitting account's portfolio.
    fn validate_order(&mut self, order: &OrderNode) -> RiskCheck;

    /// Apply a trade to both counterparties' positions.
    fn update_position(&mut self, trade: &Trade);

    /// Remember which account owns an order, for position attribution.
    fn associate_order(&mut self, order: crate::types::OrderId, account: Account);

    /// Snapshot of an account's portfolio, for observers.
    fn portfolio_for(&self, account: &Account) -> Option<Portfolio>;

    fn set_bypass(&mut self, bypass: bool);

    fn is_bypassed(&self) -> bool;
}

/// Failure surfaced by a publisher adapter. The core logs it and moves on;
/// a broken subscriber must not stall matching.
#[derive(Error, Debug)]
#[error("publish failed: {0}")]
pub struct PublishError(pub String);

/// Outbound market-data and execution-report sink.
pub trait Publisher: Send {
    fn publish_trade(&mut self, trade: &Trade) -> Result<(), PublishError>;
    fn publish_book_update(&mut self, update: &BookUpdate) -> Result<(), PublishError>;
    fn publish_best_prices(&mut self, prices: &BestPrices) -> Result<(), PublishError>;
    fn publish_depth(&mut self, depth: &MarketDepth) -> Result<(), PublishError>;
    fn publish_execution_report(&mut self, report: &ExecutionReport) -> Result<(), PublishError>;
}

/// Discards everything. Benchmarks and bare books use this.
#[derive(Default)]
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish_trade(&mut self, _: &Trade) -> Result<(), PublishError> {
        Ok(())
    }
    fn publish_book_update(&mut self, _: &BookUpdate) -> Result<(), PublishError> {
        Ok(())
    }
    fn publish_best_prices(&mut self, _: &BestPrices) -> Result<(), PublishError> {
        Ok(())
    }
    fn publish_depth(&mut self, _: &MarketDepth) -> Result<(), PublishError> {
        Ok(())
    }
    fn publish_execution_report(&mut self, _: &ExecutionReport) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Fans events out to several subscribers. A failing subscriber is logged
/// and skipped; the others still receive the event.
#[derive(Default)]
pub struct FanOutPublisher {
    subscribers: Vec<Box<dyn Publisher>>,
}

impl FanOutPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn Publisher>) {
        self.subscribers.push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn each(
        &mut self,
        what: &'static str,
        mut f: impl FnMut(&mut Box<dyn Publisher>) -> Result<(), PublishError>,
    ) -> Result<(), PublishError> {
        for (i, sub) in self.subscribers.iter_mut().enumerate() {
            if let Err(e) = f(sub) {
                error!(subscriber = i, event = what, error = %e, "subscriber failed");
            }
        }
        Ok(())
    }
}

impl Publisher for FanOutPublisher {
    fn publish_trade(&mut self, trade: &Trade) -> Result<(), PublishError> {
        self.each("trade", |s| s.publish_trade(trade))
    }
    fn publish_book_update(&mut self, update: &BookUpdate) -> Result<(), PublishError> {
        self.each("book_update", |s| s.publish_book_update(update))
    }
    fn publish_best_prices(&mut self, prices: &BestPrices) -> Result<(), PublishError> {
        self.each("best_prices", |s| s.publish_best_prices(prices))
    }
    fn publish_depth(&mut self, depth: &MarketDepth) -> Result<(), PublishError> {
        self.each("depth", |s| s.publish_depth(depth))
    }
    fn publish_execution_report(&mut self, report: &ExecutionReport) -> Result<(), PublishError> {
        self.each("execution_report", |s| s.publish_execution_report(report))
    }
}

/// Adapter that lets an observer keep a handle on a publisher owned by the
/// matching thread. The mutex is on the subscriber side; the core imposes
/// no synchronisation of its own.
pub struct SharedPublisher<P>(pub std::sync::Arc<std::sync::Mutex<P>>);

impl<P: Publisher> SharedPublisher<P> {
    pub fn new(inner: P) -> (Self, std::sync::Arc<std::sync::Mutex<P>>) {
        let shared = std::sync::Arc::new(std::sync::Mutex::new(inner));
        (Self(shared.clone()), shared)
    }
}

impl<P: Publisher> Publisher for SharedPublisher<P> {
    fn publish_trade(&mut self, trade: &Trade) -> Result<(), PublishError> {
        self.0.lock().unwrap().publish_trade(trade)
    }
    fn publish_book_update(&mut self, update: &BookUpdate) -> Result<(), PublishError> {
        self.0.lock().unwrap().publish_book_update(update)
    }
    fn publish_best_prices(&mut self, prices: &BestPrices) -> Result<(), PublishError> {
        self.0.lock().unwrap().publish_best_prices(prices)
    }
    fn publish_depth(&mut self, depth: &MarketDepth) -> Result<(), PublishError> {
        self.0.lock().unwrap().publish_depth(depth)
    }
    fn publish_execution_report(&mut self, report: &ExecutionReport) -> Result<(), PublishError> {
        self.0.lock().unwrap().publish_execution_report(report)
    }
}

/// Everything the core published, in emission order. Tests assert against
/// this; the threaded engine wraps it in a mutex on the subscriber side.
#[derive(Clone, Debug)]
pub enum PublishedEvent {
    Trade(Trade),
    Book(BookUpdate),
    Best(BestPrices),
    Depth(MarketDepth),
    Report(ExecutionReport),
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Vec<PublishedEvent>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PublishedEvent::Trade(t) => Some(*t),
                _ => None,
            })
            .collect()
    }

    pub fn book_updates(&self) -> Vec<BookUpdate> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PublishedEvent::Book(u) => Some(*u),
                _ => None,
            })
            .collect()
    }

    pub fn reports(&self) -> Vec<ExecutionReport> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PublishedEvent::Report(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Publisher for RecordingPublisher {
    fn publish_trade(&mut self, trade: &Trade) -> Result<(), PublishError> {
        self.events.push(PublishedEvent::Trade(*trade));
        Ok(())
    }
    fn publish_book_update(&mut self, update: &BookUpdate) -> Result<(), PublishError> {
        self.events.push(PublishedEvent::Book(*update));
        Ok(())
    }
    fn publish_best_prices(&mut self, prices: &BestPrices) -> Result<(), PublishError> {
        self.events.push(PublishedEvent::Best(*prices));
        Ok(())
    }
    fn publish_depth(&mut self, depth: &MarketDepth) -> Result<(), PublishError> {
        self.events.push(PublishedEvent::Depth(depth.clone()));
        Ok(())
    }
    fn publish_execution_report(&mut self, report: &ExecutionReport) -> Result<(), PublishError> {
        self.events.push(PublishedEvent::Report(*report));
        Ok(())
    }
}
