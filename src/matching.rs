//! The matching engine: applies commands to the book under strict
//! price-time priority and emits trades, book updates and execution
//! reports through the publisher port.
//!
//! An aggressive limit order is appended to its own side before the
//! crossing pass. Allocation can therefore only fail before the first
//! trade of a command prints, so an out-of-capacity command aborts with
//! the book unchanged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::arena::{ArenaIndex, OrderNode, NULL_INDEX};
use crate::command::{
    AddOrder, BookUpdate, BookUpdateKind, CancelOrder, Command, ExecType, ExecutionReport,
    MarketUpdate, ModifyOrder, RejectReason, Trade,
};
use crate::order_book::{OrderBook, OrderLocator};
use crate::ports::{NullPublisher, Publisher, RiskCheck, RiskPort};
use crate::types::{
    now_nanos, OrderId, OrderKind, OrderStatus, Price, Quantity, Side, Symbol, TimeInForce,
    TradeId, MAX_QUANTITY,
};

pub struct MatchingEngine {
    pub book: OrderBook,
    risk: Option<Box<dyn RiskPort>>,
    publisher: Box<dyn Publisher>,
    /// Dense per-book trade ids; the last allocated value.
    last_trade_id: u64,
    /// Sequence for the book-update stream.
    update_seq: u64,
    /// Sequence for the best-prices stream.
    snapshot_seq: u64,
    /// Levels per side included in published depth snapshots.
    published_depth: usize,
    /// Cross-thread observable trade counter.
    trade_count: Arc<AtomicU64>,
}

impl MatchingEngine {
    /// Bare engine: no risk port, events discarded. Benchmarks and unit
    /// tests start here.
    pub fn new(symbol: Symbol, order_capacity: u32) -> Self {
        Self::with_ports(symbol, order_capacity, None, Box::new(NullPublisher))
    }

    pub fn with_ports(
        symbol: Symbol,
        order_capacity: u32,
        risk: Option<Box<dyn RiskPort>>,
        publisher: Box<dyn Publisher>,
    ) -> Self {
        Self {
            book: OrderBook::new(symbol, order_capacity),
            risk,
            publisher,
            last_trade_id: 0,
            update_seq: 0,
            snapshot_seq: 0,
            published_depth: 5,
            trade_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_published_depth(&mut self, levels: usize) {
        self.published_depth = levels;
    }

    pub fn risk_mut(&mut self) -> Option<&mut (dyn RiskPort + 'static)> {
        self.risk.as_deref_mut()
    }

    /// Handle for reading the trade counter from another thread.
    pub fn trade_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.trade_count)
    }

    pub fn trades_executed(&self) -> u64 {
        self.trade_count.load(Ordering::Relaxed)
    }

    pub fn warm_up(&mut self) {
        self.book.arena.warm_up();
    }

    // ========================================================================
    // Command application
    // ========================================================================

    pub fn apply(&mut self, command: Command) {
        match command {
            Command::Add(add) => self.process_add(add),
            Command::Cancel(cancel) => self.process_cancel(cancel),
            Command::Modify(modify) => self.process_modify(modify),
        }

        // Full structural sweep is far too expensive for the hot path, so
        // it only runs when trace-level diagnostics are switched on.
        if tracing::enabled!(tracing::Level::TRACE) {
            if let Err(violation) = self.book.validate() {
                error!(%violation, "book invariant violated");
                debug_assert!(false, "book invariant violated: {violation}");
            }
        }
    }

    fn process_add(&mut self, add: AddOrder) {
        if let Err(reason) = validate_add(&add, self.book.symbol()) {
            warn!(order = %add.id, %reason, "order rejected");
            self.report_command_reject(&add, reason);
            return;
        }

        if self.book.contains(add.id) {
            warn!(order = %add.id, "duplicate order id dropped");
            self.report_command_reject(&add, RejectReason::DuplicateOrderId);
            return;
        }

        let mut node = OrderNode::vacant();
        node.id = add.id;
        node.side = add.side;
        node.kind = add.kind;
        node.tif = add.tif;
        node.price = add.price;
        node.original_quantity = add.quantity;
        node.account = add.account;
        node.arrival_ns = now_nanos();

        if let Some(risk) = self.risk.as_mut() {
            if !risk.is_bypassed() {
                risk.associate_order(add.id, add.account);
                if let RiskCheck::Rejected(reason) = risk.validate_order(&node) {
                    warn!(order = %add.id, %reason, "order rejected by risk");
                    self.report_command_reject(&add, reason);
                    return;
                }
            }
        }

        // A fill-or-kill either fully fills right now or leaves no trace.
        if node.tif == TimeInForce::Fok && !self.fully_fillable(&node) {
            debug!(order = %add.id, "fill-or-kill not fillable");
            self.report_command_reject(&add, RejectReason::InsufficientLiquidity);
            return;
        }

        match node.kind {
            OrderKind::Limit => {
                let Some(locator) = self.book.admit(node) else {
                    warn!(order = %add.id, "order capacity exhausted");
                    self.report_command_reject(&add, RejectReason::BookFull);
                    return;
                };
                {
                    let level = self.book.ladder(locator.side).get(locator.level);
                    let (qty, count) = (level.total_remaining, level.order_count);
                    self.publish_level(BookUpdateKind::Add, add.side, add.price, qty, count);
                }
                self.cross(locator.node, add.side, Some(add.price));
                self.settle_aggressor(add.id, 0, true);
            }
            OrderKind::Market => {
                let Some(node_idx) = self.book.arena.insert(node) else {
                    warn!(order = %add.id, "order capacity exhausted");
                    self.report_command_reject(&add, RejectReason::BookFull);
                    return;
                };
                self.cross(node_idx, add.side, None);
                let mut done = *self.book.arena.get(node_idx);
                self.book.arena.free(node_idx);
                let exec = if done.is_fully_filled() {
                    ExecType::Fill
                } else {
                    // unfilled remainder is cancelled, never rested
                    done.status = OrderStatus::Cancelled;
                    ExecType::Cancelled
                };
                self.publish_report(self.report_for(&done, exec, None));
            }
        }

        self.publish_market_snapshot();
    }

    fn process_cancel(&mut self, cancel: CancelOrder) {
        let Some(locator) = self.book.locate(cancel.id) else {
            // already filled or cancelled; not an error
            warn!(order = %cancel.id, "cancel for unknown order");
            return;
        };

        self.book.arena.get_mut(locator.node).status = OrderStatus::Cancelled;
        let node = *self.book.arena.get(locator.node);
        let (qty, count, emptied) = self.book.evict(cancel.id, locator);
        let kind = if emptied {
            BookUpdateKind::Remove
        } else {
            BookUpdateKind::Modify
        };
        self.publish_level(kind, node.side, node.price, qty, count);
        self.publish_report(self.report_for(&node, ExecType::Cancelled, None));
        self.publish_market_snapshot();
    }

    fn process_modify(&mut self, modify: ModifyOrder) {
        let Some(locator) = self.book.locate(modify.id) else {
            warn!(order = %modify.id, "modify for unknown order");
            return;
        };

        let node = *self.book.arena.get(locator.node);
        let target_price = modify.new_price.unwrap_or(node.price);
        let target_qty = modify.new_quantity.unwrap_or(node.original_quantity);

        if target_qty == 0 || target_qty > MAX_QUANTITY || target_price.is_zero() {
            warn!(order = %modify.id, "modify with invalid fields ignored");
            return;
        }

        // Identical price and size keeps the order untouched, including its
        // time priority.
        if target_price == node.price && target_qty == node.original_quantity {
            return;
        }

        if target_qty <= node.filled_quantity {
            // The new size is already filled: promote to Filled and remove.
            {
                let n = self.book.arena.get_mut(locator.node);
                n.original_quantity = target_qty;
                n.filled_quantity = target_qty;
                n.status = OrderStatus::Filled;
            }
            let done = *self.book.arena.get(locator.node);
            self.book.reduce_level(locator.side, locator.level, node.remaining());
            let (qty, count, emptied) = self.book.evict(modify.id, locator);
            let kind = if emptied {
                BookUpdateKind::Remove
            } else {
                BookUpdateKind::Modify
            };
            self.publish_level(kind, node.side, node.price, qty, count);
            self.publish_report(self.report_for(&done, ExecType::Fill, None));
        } else if target_price == node.price && target_qty < node.original_quantity {
            // In-place shrink keeps time priority.
            let released = node.original_quantity - target_qty;
            self.book.arena.get_mut(locator.node).original_quantity = target_qty;
            self.book.reduce_level(locator.side, locator.level, released);
            let level = self.book.ladder(locator.side).get(locator.level);
            let (qty, count) = (level.total_remaining, level.order_count);
            self.publish_level(BookUpdateKind::Modify, node.side, node.price, qty, count);
        } else {
            // Price change or size increase: cancel + re-add semantics.
            // The order goes to the tail of the target level and may now
            // cross.
            let prior_filled = node.filled_quantity;
            let (qty, count, emptied) = self.book.unlink_for_requeue(locator);
            let kind = if emptied {
                BookUpdateKind::Remove
            } else {
                BookUpdateKind::Modify
            };
            self.publish_level(kind, node.side, node.price, qty, count);

            {
                let n = self.book.arena.get_mut(locator.node);
                n.price = target_price;
                n.original_quantity = target_qty;
                n.arrival_ns = now_nanos();
            }
            let locator = self.book.requeue(modify.id, locator.node);
            {
                let level = self.book.ladder(locator.side).get(locator.level);
                let (qty, count) = (level.total_remaining, level.order_count);
                self.publish_level(BookUpdateKind::Add, node.side, target_price, qty, count);
            }
            self.cross(locator.node, node.side, Some(target_price));
            self.settle_aggressor(modify.id, prior_filled, false);
        }

        self.publish_market_snapshot();
    }

    /// External mirror updates. These mutate level aggregates only and
    /// never produce trades.
    pub fn apply_market(&mut self, update: MarketUpdate) {
        match update {
            MarketUpdate::SnapshotStart => {
                self.book.clear();
                info!("book cleared for external snapshot");
            }
            MarketUpdate::SnapshotEnd => {}
            MarketUpdate::Set {
                side,
                price,
                quantity,
                order_count,
            } => {
                if !self.book.mirror_set(side, price, quantity, order_count) {
                    warn!(%side, %price, "mirror update collides with native orders");
                }
            }
            MarketUpdate::Remove { side, price } => {
                self.book.mirror_remove(side, price);
            }
        }
        self.publish_market_snapshot();
    }

    // ========================================================================
    // Crossing
    // ========================================================================

    /// Whether the opposite side holds enough matchable size at acceptable
    /// prices to fully fill `node` right now.
    fn fully_fillable(&self, node: &OrderNode) -> bool {
        let ladder = self.book.ladder(node.side.opposite());
        let mut needed = node.remaining();
        for level in ladder.iter_best_outward() {
            if node.kind == OrderKind::Limit && !ladder.crosses(node.price, level.price) {
                break;
            }
            if level.front() == NULL_INDEX {
                // mirrored aggregate, nothing matchable behind it
                break;
            }
            needed = needed.saturating_sub(level.total_remaining);
            if needed == 0 {
                return true;
            }
        }
        false
    }

    /// Walk the opposite side from its best price while the aggressor has
    /// quantity and the price condition holds. `limit` is `None` for
    /// market orders.
    fn cross(&mut self, taker: ArenaIndex, taker_side: Side, limit: Option<Price>) {
        let maker_side = taker_side.opposite();
        loop {
            if self.book.arena.get(taker).remaining() == 0 {
                break;
            }
            let ladder = self.book.ladder(maker_side);
            let Some(level_idx) = ladder.best() else {
                break;
            };
            let level = ladder.get(level_idx);
            if let Some(limit) = limit {
                if !ladder.crosses(limit, level.price) {
                    break;
                }
            }
            if level.front() == NULL_INDEX {
                // externally mirrored level: no matchable orders
                break;
            }
            self.match_level(taker, taker_side, level_idx);
        }
    }

    /// Match the aggressor against one level's FIFO queue until either is
    /// exhausted.
    fn match_level(
        &mut self,
        taker: ArenaIndex,
        taker_side: Side,
        level_idx: crate::ladder::LevelIndex,
    ) {
        let maker_side = taker_side.opposite();
        loop {
            let taker_remaining = self.book.arena.get(taker).remaining();
            if taker_remaining == 0 {
                return;
            }

            let level = self.book.ladder(maker_side).get(level_idx);
            let level_price = level.price;
            let maker_idx = level.front();
            if maker_idx == NULL_INDEX {
                return;
            }

            let maker_remaining = self.book.arena.get(maker_idx).remaining();
            let quantity = taker_remaining.min(maker_remaining);
            debug_assert!(quantity > 0, "zero-size maker linked into level");

            let maker_done = self.book.arena.get_mut(maker_idx).fill(quantity);
            self.book.arena.get_mut(taker).fill(quantity);

            let maker = *self.book.arena.get(maker_idx);
            let taker_id = self.book.arena.get(taker).id;

            self.last_trade_id += 1;
            let trade = Trade {
                id: TradeId(self.last_trade_id),
                taker_order_id: taker_id,
                maker_order_id: maker.id,
                taker_side,
                price: level_price,
                quantity,
                symbol: self.book.symbol(),
                ts_ns: now_nanos(),
            };
            if let Some(risk) = self.risk.as_mut() {
                if !risk.is_bypassed() {
                    risk.update_position(&trade);
                }
            }
            if let Err(e) = self.publisher.publish_trade(&trade) {
                error!(error = %e, "publisher failed: trade");
            }
            self.trade_count.fetch_add(1, Ordering::Relaxed);

            self.book.reduce_level(maker_side, level_idx, quantity);

            let exec = if maker_done {
                ExecType::Fill
            } else {
                ExecType::PartialFill
            };
            self.publish_report(self.report_for(&maker, exec, Some(trade.id)));

            if maker_done {
                let locator = OrderLocator {
                    node: maker_idx,
                    level: level_idx,
                    side: maker_side,
                };
                let (qty, count, emptied) = self.book.evict(maker.id, locator);
                let kind = if emptied {
                    BookUpdateKind::Remove
                } else {
                    BookUpdateKind::Modify
                };
                self.publish_level(kind, maker_side, level_price, qty, count);
                if emptied {
                    // the level slot was recycled; the caller re-reads best
                    return;
                }
            } else {
                let level = self.book.ladder(maker_side).get(level_idx);
                let (qty, count) = (level.total_remaining, level.order_count);
                self.publish_level(BookUpdateKind::Modify, maker_side, level_price, qty, count);
            }
        }
    }

    /// Resolve the aggressor after its crossing pass: remove it when
    /// terminal, rest it otherwise, and reconcile its own level's
    /// aggregates with the fills it took.
    fn settle_aggressor(&mut self, id: OrderId, prior_filled: Quantity, emit_accept: bool) {
        let Some(locator) = self.book.locate(id) else {
            debug_assert!(false, "aggressor vanished before settlement");
            return;
        };
        let node = *self.book.arena.get(locator.node);
        let fill_delta = node.filled_quantity - prior_filled;
        if fill_delta > 0 {
            self.book.reduce_level(locator.side, locator.level, fill_delta);
        }

        if node.is_fully_filled() {
            let (qty, count, emptied) = self.book.evict(id, locator);
            let kind = if emptied {
                BookUpdateKind::Remove
            } else {
                BookUpdateKind::Modify
            };
            self.publish_level(kind, node.side, node.price, qty, count);
            self.publish_report(self.report_for(&node, ExecType::Fill, None));
        } else if node.tif == TimeInForce::Ioc {
            self.book.arena.get_mut(locator.node).status = OrderStatus::Cancelled;
            let node = *self.book.arena.get(locator.node);
            let (qty, count, emptied) = self.book.evict(id, locator);
            let kind = if emptied {
                BookUpdateKind::Remove
            } else {
                BookUpdateKind::Modify
            };
            self.publish_level(kind, node.side, node.price, qty, count);
            self.publish_report(self.report_for(&node, ExecType::Cancelled, None));
        } else {
            debug_assert!(
                node.tif != TimeInForce::Fok,
                "fill-or-kill passed feasibility but did not fill"
            );
            if fill_delta > 0 {
                let level = self.book.ladder(locator.side).get(locator.level);
                let (qty, count) = (level.total_remaining, level.order_count);
                self.publish_level(BookUpdateKind::Modify, node.side, node.price, qty, count);
                self.publish_report(self.report_for(&node, ExecType::PartialFill, None));
            } else if emit_accept {
                self.publish_report(self.report_for(&node, ExecType::New, None));
            }
        }
    }

    // ========================================================================
    // Event emission
    // ========================================================================

    fn publish_level(
        &mut self,
        kind: BookUpdateKind,
        side: Side,
        price: Price,
        quantity: Quantity,
        order_count: u32,
    ) {
        self.update_seq += 1;
        let update = BookUpdate {
            kind,
            side,
            price,
            quantity,
            order_count,
            sequence: self.update_seq,
            ts_ns: now_nanos(),
        };
        if let Err(e) = self.publisher.publish_book_update(&update) {
            error!(error = %e, "publisher failed: book update");
        }
    }

    fn publish_market_snapshot(&mut self) {
        self.snapshot_seq += 1;
        let best = self.book.best_prices(self.snapshot_seq);
        if let Err(e) = self.publisher.publish_best_prices(&best) {
            error!(error = %e, "publisher failed: best prices");
        }
        let depth = self.book.depth(self.published_depth);
        if let Err(e) = self.publisher.publish_depth(&depth) {
            error!(error = %e, "publisher failed: depth");
        }
    }

    fn publish_report(&mut self, report: ExecutionReport) {
        if let Err(e) = self.publisher.publish_execution_report(&report) {
            error!(error = %e, "publisher failed: execution report");
        }
    }

    fn report_for(
        &self,
        node: &OrderNode,
        exec_type: ExecType,
        trade_id: Option<TradeId>,
    ) -> ExecutionReport {
        ExecutionReport {
            order_id: node.id,
            exec_type,
            status: node.status,
            side: node.side,
            price: node.price,
            quantity: node.original_quantity,
            filled_quantity: node.filled_quantity,
            leaves_quantity: if node.status.is_terminal() {
                0
            } else {
                node.remaining()
            },
            trade_id,
            symbol: self.book.symbol(),
            account: node.account,
            reason: None,
            ts_ns: now_nanos(),
        }
    }

    fn report_command_reject(&mut self, add: &AddOrder, reason: RejectReason) {
        let report = ExecutionReport {
            order_id: add.id,
            exec_type: ExecType::Rejected,
            status: OrderStatus::Rejected,
            side: add.side,
            price: add.price,
            quantity: add.quantity,
            filled_quantity: 0,
            leaves_quantity: 0,
            trade_id: None,
            symbol: self.book.symbol(),
            account: add.account,
            reason: Some(reason),
            ts_ns: now_nanos(),
        };
        self.publish_report(report);
    }

    /// Hash of the observable book state, for determinism checks.
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.book.best_bid().map(|p| p.ticks()).hash(&mut hasher);
        self.book.best_ask().map(|p| p.ticks()).hash(&mut hasher);
        self.book.order_count().hash(&mut hasher);
        self.book.arena.live().hash(&mut hasher);
        self.last_trade_id.hash(&mut hasher);
        hasher.finish()
    }
}

fn validate_add(add: &AddOrder, book_symbol: Symbol) -> Result<(), RejectReason> {
    if add.quantity == 0 {
        return Err(RejectReason::InvalidQuantity);
    }
    if add.quantity > MAX_QUANTITY {
        return Err(RejectReason::QuantityOverflow(add.quantity));
    }
    if add.kind == OrderKind::Limit && add.price.is_zero() {
        return Err(RejectReason::InvalidPrice);
    }
    if !add.symbol.is_empty() && add.symbol != book_symbol {
        return Err(RejectReason::UnknownSymbol);
    }
    Ok(())
}
