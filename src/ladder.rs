//! One side of the book: price levels in a slab, a sorted vector of slot
//! handles, and a price-to-slot hash for O(1) lookup.
//!
//! The sorted vector keeps the best price at its end (bids ascend, asks
//! descend), so peeking and popping from the best level is O(1) and a new
//! level costs a binary search plus a tail-biased memmove. Matching walks
//! the vector from the end outward.

use rustc_hash::FxHashMap;

use crate::price_level::PriceLevel;
use crate::types::{Price, Side};

/// Handle into the level slab.
pub type LevelIndex = u32;

/// Sentinel for "no level".
pub const NO_LEVEL: LevelIndex = u32::MAX;

pub struct Ladder {
    side: Side,
    /// Slot storage; indices stay stable while a level is live.
    levels: Vec<PriceLevel>,
    /// Free slots in `levels`.
    free: Vec<LevelIndex>,
    /// Live slots ordered so the best price is last.
    sorted: Vec<LevelIndex>,
    by_price: FxHashMap<Price, LevelIndex>,
}

impl Ladder {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: Vec::with_capacity(1024),
            free: Vec::new(),
            sorted: Vec::with_capacity(1024),
            by_price: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    #[inline]
    pub fn get(&self, index: LevelIndex) -> &PriceLevel {
        &self.levels[index as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, index: LevelIndex) -> &mut PriceLevel {
        &mut self.levels[index as usize]
    }

    /// Best level: highest bid or lowest ask.
    #[inline]
    pub fn best(&self) -> Option<LevelIndex> {
        self.sorted.last().copied()
    }

    #[inline]
    pub fn best_price(&self) -> Option<Price> {
        self.best().map(|i| self.get(i).price)
    }

    #[inline]
    pub fn lookup(&self, price: Price) -> Option<LevelIndex> {
        self.by_price.get(&price).copied()
    }

    /// Whether an order at `aggressor_price` on the opposite side crosses
    /// `resting_price` on this side.
    #[inline]
    pub fn crosses(&self, aggressor_price: Price, resting_price: Price) -> bool {
        match self.side {
            // This ladder holds asks: a buy crosses when it bids at least
            // the resting ask.
            Side::Sell => aggressor_price >= resting_price,
            // This ladder holds bids: a sell crosses when it offers at most
            // the resting bid.
            Side::Buy => aggressor_price <= resting_price,
        }
    }

    /// Position in `sorted` where a level at `price` belongs.
    fn insertion_point(&self, price: Price) -> usize {
        match self.side {
            Side::Buy => self
                .sorted
                .partition_point(|&i| self.levels[i as usize].price < price),
            Side::Sell => self
                .sorted
                .partition_point(|&i| self.levels[i as usize].price > price),
        }
    }

    /// Existing level at `price`, or a fresh empty one inserted in order.
    pub fn find_or_create(&mut self, price: Price) -> LevelIndex {
        if let Some(index) = self.lookup(price) {
            return index;
        }
        let index = match self.free.pop() {
            Some(slot) => {
                self.levels[slot as usize] = PriceLevel::new(price);
                slot
            }
            None => {
                self.levels.push(PriceLevel::new(price));
                (self.levels.len() - 1) as LevelIndex
            }
        };
        let pos = self.insertion_point(price);
        self.sorted.insert(pos, index);
        self.by_price.insert(price, index);
        index
    }

    /// Detach and recycle an empty level.
    pub fn remove(&mut self, index: LevelIndex) {
        let price = self.levels[index as usize].price;
        debug_assert!(
            self.levels[index as usize].is_empty(),
            "removing non-empty level at {price}"
        );
        let pos = self.insertion_point(price);
        debug_assert!(pos < self.sorted.len() && self.sorted[pos] == index);
        self.sorted.remove(pos);
        self.by_price.remove(&price);
        self.free.push(index);
    }

    /// Live levels from best outward.
    pub fn iter_best_outward(&self) -> impl Iterator<Item = &PriceLevel> + '_ {
        self.sorted.iter().rev().map(|&i| &self.levels[i as usize])
    }

    pub fn clear(&mut self) {
        self.levels.clear();
        self.free.clear();
        self.sorted.clear();
        self.by_price.clear();
    }

    /// Check ordering and index coherence; used by fuzz tests.
    pub fn check_sorted(&self) -> bool {
        let ordered = self.sorted.windows(2).all(|w| {
            let a = self.levels[w[0] as usize].price;
            let b = self.levels[w[1] as usize].price;
            match self.side {
                Side::Buy => a < b,
                Side::Sell => a > b,
            }
        });
        ordered
            && self.by_price.len() == self.sorted.len()
            && self
                .sorted
                .iter()
                .all(|&i| self.by_price.get(&self.levels[i as usize].price) == Some(&i))
    }
}
