//! The order book: an arena of orders, a ladder per side, and an O(1)
//! order index keyed by id.
//!
//! The book is strictly owned by the matching thread; nothing here is
//! synchronised. Queries read the consumer's view.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::arena::{Arena, ArenaIndex, OrderNode, NULL_INDEX};
use crate::command::{BestPrices, DepthLevel, MarketDepth};
use crate::ladder::{Ladder, LevelIndex};
use crate::types::{now_nanos, OrderId, Price, Quantity, Side, Symbol};

/// Where a live resting order sits.
#[derive(Clone, Copy, Debug)]
pub struct OrderLocator {
    pub node: ArenaIndex,
    pub level: LevelIndex,
    pub side: Side,
}

/// A violated structural invariant, reported by [`OrderBook::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("level {price} aggregate {cached} != recomputed {actual}")]
    LevelQuantity {
        price: Price,
        cached: Quantity,
        actual: Quantity,
    },
    #[error("level {price} order count {cached} != recomputed {actual}")]
    LevelCount { price: Price, cached: u32, actual: u32 },
    #[error("empty level {price} still reachable")]
    EmptyLevel { price: Price },
    #[error("ladder ordering broken on {side} side")]
    LadderOrder { side: Side },
    #[error("order {id} indexed but not linked into its level")]
    DanglingIndexEntry { id: OrderId },
    #[error("order {id} has filled > original")]
    FillOverrun { id: OrderId },
    #[error("book is crossed: bid {bid} >= ask {ask}")]
    CrossedBook { bid: Price, ask: Price },
}

pub struct OrderBook {
    pub(crate) symbol: Symbol,
    pub(crate) arena: Arena,
    pub(crate) bids: Ladder,
    pub(crate) asks: Ladder,
    pub(crate) index: FxHashMap<OrderId, OrderLocator>,
}

impl OrderBook {
    pub fn new(symbol: Symbol, order_capacity: u32) -> Self {
        Self {
            symbol,
            arena: Arena::new(order_capacity),
            bids: Ladder::new(Side::Buy),
            asks: Ladder::new(Side::Sell),
            index: FxHashMap::with_capacity_and_hasher(
                order_capacity as usize,
                Default::default(),
            ),
        }
    }

    #[inline]
    pub fn symbol(&self) -> Symbol {
        self.symbol
    }

    #[inline]
    pub(crate) fn ladder(&self, side: Side) -> &Ladder {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    #[inline]
    pub(crate) fn ladder_mut(&mut self, side: Side) -> &mut Ladder {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    // ========================================================================
    // Resting-order plumbing (used by the matching engine)
    // ========================================================================

    /// Materialise `node` in the arena, append it to its level's tail and
    /// index it. Returns `None` when the arena is exhausted, with the book
    /// unchanged.
    pub(crate) fn admit(&mut self, node: OrderNode) -> Option<OrderLocator> {
        debug_assert!(!self.index.contains_key(&node.id));
        let id = node.id;
        let side = node.side;
        let price = node.price;
        let node_idx = self.arena.insert(node)?;
        let level_idx = self.ladder_mut(side).find_or_create(price);
        let ladder = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        ladder.get_mut(level_idx).push_back(&mut self.arena, node_idx);
        let locator = OrderLocator {
            node: node_idx,
            level: level_idx,
            side,
        };
        self.index.insert(id, locator);
        Some(locator)
    }

    /// Unlink an order from its level and index and recycle its arena slot.
    /// Returns the level's (quantity, count) after removal and whether the
    /// level was destroyed.
    pub(crate) fn evict(&mut self, id: OrderId, locator: OrderLocator) -> (Quantity, u32, bool) {
        let ladder = match locator.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let level = ladder.get_mut(locator.level);
        let emptied = level.unlink(&mut self.arena, locator.node);
        let (qty, count) = (level.total_remaining, level.order_count);
        if emptied {
            ladder.remove(locator.level);
        }
        self.index.remove(&id);
        self.arena.free(locator.node);
        (qty, count, emptied)
    }

    #[inline]
    pub(crate) fn locate(&self, id: OrderId) -> Option<OrderLocator> {
        self.index.get(&id).copied()
    }

    /// Shrink a level's aggregate after fills were applied to one of its
    /// orders.
    #[inline]
    pub(crate) fn reduce_level(&mut self, side: Side, level: LevelIndex, quantity: Quantity) {
        self.ladder_mut(side).get_mut(level).reduce(quantity);
    }

    /// Unlink an order from its level ahead of a re-queue, keeping its
    /// arena slot and index entry alive. Returns the old level's
    /// (quantity, count) after removal and whether it was destroyed.
    pub(crate) fn unlink_for_requeue(&mut self, locator: OrderLocator) -> (Quantity, u32, bool) {
        let ladder = match locator.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let level = ladder.get_mut(locator.level);
        let emptied = level.unlink(&mut self.arena, locator.node);
        let result = (level.total_remaining, level.order_count, emptied);
        if emptied {
            ladder.remove(locator.level);
        }
        result
    }

    /// Re-append a live node (with updated price/size) at the tail of its
    /// level, losing time priority, and refresh the index entry.
    pub(crate) fn requeue(&mut self, id: OrderId, node_idx: ArenaIndex) -> OrderLocator {
        let (side, price) = {
            let node = self.arena.get(node_idx);
            (node.side, node.price)
        };
        let level_idx = self.ladder_mut(side).find_or_create(price);
        let ladder = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        ladder.get_mut(level_idx).push_back(&mut self.arena, node_idx);
        let locator = OrderLocator {
            node: node_idx,
            level: level_idx,
            side,
        };
        self.index.insert(id, locator);
        locator
    }

    // ========================================================================
    // Queries (matching-thread view)
    // ========================================================================

    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.best_price()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.best_price()
    }

    pub fn best_prices(&self, sequence: u64) -> BestPrices {
        let bid_level = self.bids.best().map(|i| self.bids.get(i));
        let ask_level = self.asks.best().map(|i| self.asks.get(i));
        BestPrices {
            bid: bid_level.map(|l| l.price),
            ask: ask_level.map(|l| l.price),
            bid_size: bid_level.map(|l| l.total_remaining),
            ask_size: ask_level.map(|l| l.total_remaining),
            sequence,
            ts_ns: now_nanos(),
        }
    }

    /// Up to `levels` aggregated levels per side, best first.
    pub fn depth(&self, levels: usize) -> MarketDepth {
        let collect = |ladder: &Ladder| -> Vec<DepthLevel> {
            ladder
                .iter_best_outward()
                .take(levels)
                .map(|l| DepthLevel {
                    price: l.price,
                    quantity: l.total_remaining,
                    order_count: l.order_count,
                })
                .collect()
        };
        MarketDepth {
            bids: collect(&self.bids),
            asks: collect(&self.asks),
            ts_ns: now_nanos(),
        }
    }

    #[inline]
    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn bid_level_count(&self) -> usize {
        self.bids.len()
    }

    #[inline]
    pub fn ask_level_count(&self) -> usize {
        self.asks.len()
    }

    #[inline]
    pub fn contains(&self, id: OrderId) -> bool {
        self.index.contains_key(&id)
    }

    #[inline]
    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if ask > bid => Some(Price(ask.ticks() - bid.ticks())),
            _ => None,
        }
    }

    /// Drop every resting order and level. Used on external gap recovery.
    pub fn clear(&mut self) {
        let locators: Vec<OrderLocator> = self.index.values().copied().collect();
        for locator in locators {
            self.arena.free(locator.node);
        }
        self.index.clear();
        self.bids.clear();
        self.asks.clear();
    }

    // ========================================================================
    // External mirror application
    // ========================================================================

    /// Overwrite a level's aggregates from an external venue. Mirror levels
    /// hold no order nodes; a level that already holds native orders is
    /// left untouched and `false` is returned.
    pub(crate) fn mirror_set(
        &mut self,
        side: Side,
        price: Price,
        quantity: Quantity,
        order_count: u32,
    ) -> bool {
        let ladder = self.ladder_mut(side);
        let idx = ladder.find_or_create(price);
        let level = ladder.get_mut(idx);
        if level.head != NULL_INDEX {
            return false;
        }
        level.set_mirror(quantity, order_count);
        if level.is_empty() {
            ladder.remove(idx);
        }
        true
    }

    /// Drop an externally mirrored level.
    pub(crate) fn mirror_remove(&mut self, side: Side, price: Price) {
        let ladder = self.ladder_mut(side);
        if let Some(idx) = ladder.lookup(price) {
            let level = ladder.get_mut(idx);
            level.set_mirror(0, 0);
            ladder.remove(idx);
        }
    }

    // ========================================================================
    // Structural validation
    // ========================================================================

    /// Walk the whole structure and verify the §invariants. Quadratic-ish;
    /// test and debug use only. Mirrored levels (aggregates without nodes)
    /// are skipped.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        for ladder in [&self.bids, &self.asks] {
            if !ladder.check_sorted() {
                return Err(InvariantViolation::LadderOrder { side: ladder.side() });
            }
            for level in ladder.iter_best_outward() {
                if level.is_empty() {
                    return Err(InvariantViolation::EmptyLevel { price: level.price });
                }
                if level.is_mirrored() {
                    continue;
                }
                let mut qty = 0u64;
                let mut count = 0u32;
                let mut cursor = level.head;
                while cursor != NULL_INDEX {
                    let node = self.arena.get(cursor);
                    if node.filled_quantity > node.original_quantity {
                        return Err(InvariantViolation::FillOverrun { id: node.id });
                    }
                    qty += node.remaining();
                    count += 1;
                    cursor = node.next;
                }
                if qty != level.total_remaining {
                    return Err(InvariantViolation::LevelQuantity {
                        price: level.price,
                        cached: level.total_remaining,
                        actual: qty,
                    });
                }
                if count != level.order_count {
                    return Err(InvariantViolation::LevelCount {
                        price: level.price,
                        cached: level.order_count,
                        actual: count,
                    });
                }
            }
        }

        for (&id, locator) in &self.index {
            let ladder = self.ladder(locator.side);
            let level = ladder.get(locator.level);
            let mut cursor = level.head;
            let mut found = false;
            while cursor != NULL_INDEX {
                if cursor == locator.node {
                    found = true;
                    break;
                }
                cursor = self.arena.get(cursor).next;
            }
            if !found || self.arena.get(locator.node).id != id {
                return Err(InvariantViolation::DanglingIndexEntry { id });
            }
        }

        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid >= ask {
                return Err(InvariantViolation::CrossedBook { bid, ask });
            }
        }

        Ok(())
    }
}
