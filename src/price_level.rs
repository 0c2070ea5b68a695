//! A price level: the FIFO queue of all resting orders at one price on one
//! side, with cached aggregates.
//!
//! The queue is a doubly-linked list threaded through arena handles, so
//! append, pop-from-head and unlink-by-handle are all O(1). Insertion order
//! is time priority; matching always starts at the head.

use crate::arena::{Arena, ArenaIndex, NULL_INDEX};
use crate::types::{Price, Quantity};

#[derive(Clone, Copy, Debug)]
pub struct PriceLevel {
    pub price: Price,
    /// Oldest order: first to match.
    pub head: ArenaIndex,
    /// Newest order: arrivals append here.
    pub tail: ArenaIndex,
    /// Sum of `remaining()` over every order in the queue.
    pub total_remaining: Quantity,
    pub order_count: u32,
}

impl PriceLevel {
    #[inline]
    pub const fn new(price: Price) -> Self {
        Self {
            price,
            head: NULL_INDEX,
            tail: NULL_INDEX,
            total_remaining: 0,
            order_count: 0,
        }
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.order_count == 0
    }

    /// Append an order at the tail (lowest time priority).
    #[inline]
    pub fn push_back(&mut self, arena: &mut Arena, index: ArenaIndex) {
        let remaining = arena.get(index).remaining();

        if self.tail == NULL_INDEX {
            debug_assert!(self.head == NULL_INDEX);
            self.head = index;
            self.tail = index;
            let node = arena.get_mut(index);
            node.prev = NULL_INDEX;
            node.next = NULL_INDEX;
        } else {
            arena.get_mut(self.tail).next = index;
            let node = arena.get_mut(index);
            node.prev = self.tail;
            node.next = NULL_INDEX;
            self.tail = index;
        }

        self.order_count += 1;
        self.total_remaining += remaining;
    }

    /// Unlink an order from any position. The aggregates are reduced by the
    /// node's current `remaining()`, so fills must be applied to the node
    /// (and [`reduce`](Self::reduce) called) before unlinking a fully
    /// filled maker.
    ///
    /// Returns true when the level became empty. The arena slot is not
    /// freed here; the caller owns that.
    #[inline]
    pub fn unlink(&mut self, arena: &mut Arena, index: ArenaIndex) -> bool {
        let node = arena.get(index);
        let prev = node.prev;
        let next = node.next;
        let remaining = node.remaining();

        if prev == NULL_INDEX && next == NULL_INDEX {
            debug_assert!(self.head == index && self.tail == index);
            self.head = NULL_INDEX;
            self.tail = NULL_INDEX;
        } else if prev == NULL_INDEX {
            debug_assert!(self.head == index);
            self.head = next;
            arena.get_mut(next).prev = NULL_INDEX;
        } else if next == NULL_INDEX {
            debug_assert!(self.tail == index);
            self.tail = prev;
            arena.get_mut(prev).next = NULL_INDEX;
        } else {
            arena.get_mut(prev).next = next;
            arena.get_mut(next).prev = prev;
        }

        debug_assert!(self.order_count > 0);
        debug_assert!(self.total_remaining >= remaining);
        self.order_count -= 1;
        self.total_remaining -= remaining;

        let node = arena.get_mut(index);
        node.prev = NULL_INDEX;
        node.next = NULL_INDEX;

        self.order_count == 0
    }

    /// Oldest order, or `NULL_INDEX` when empty.
    #[inline]
    pub const fn front(&self) -> ArenaIndex {
        self.head
    }

    /// Shrink the aggregate after a partial fill of a member order.
    #[inline]
    pub fn reduce(&mut self, quantity: Quantity) {
        debug_assert!(self.total_remaining >= quantity);
        self.total_remaining -= quantity;
    }

    /// Overwrite the aggregates from an external venue's view. Mirror
    /// levels carry totals without any linked orders.
    #[inline]
    pub fn set_mirror(&mut self, quantity: Quantity, order_count: u32) {
        self.total_remaining = quantity;
        self.order_count = order_count;
    }

    /// True for externally mirrored levels: aggregates without any linked
    /// orders.
    #[inline]
    pub const fn is_mirrored(&self) -> bool {
        self.head == NULL_INDEX && self.order_count > 0
    }
}
