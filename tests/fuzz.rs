//! Randomised differential test: the optimized engine against a naive
//! BTreeMap reference book, plus periodic structural validation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use matchbook::{
    AddOrder, CancelOrder, Command, MatchingEngine, OrderId, Price, RecordingPublisher,
    SharedPublisher, Side, Symbol,
};

/// Straightforward but correct price-time book for GTC limit orders.
struct ReferenceBook {
    bids: BTreeMap<u64, Vec<(u64, u64)>>, // price -> [(order id, remaining)]
    asks: BTreeMap<u64, Vec<(u64, u64)>>,
    orders: HashMap<u64, (Side, u64)>,
}

impl ReferenceBook {
    fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders: HashMap::new(),
        }
    }

    fn best_bid(&self) -> Option<u64> {
        self.bids.keys().next_back().copied()
    }

    fn best_ask(&self) -> Option<u64> {
        self.asks.keys().next().copied()
    }

    /// Returns total traded volume.
    fn place(&mut self, id: u64, side: Side, price: u64, mut qty: u64) -> u64 {
        let mut traded = 0u64;

        match side {
            Side::Buy => {
                let crossable: Vec<u64> = self
                    .asks
                    .range(..=price)
                    .map(|(p, _)| *p)
                    .collect();
                for level_price in crossable {
                    if qty == 0 {
                        break;
                    }
                    let queue = self.asks.get_mut(&level_price).unwrap();
                    while !queue.is_empty() && qty > 0 {
                        let take = queue[0].1.min(qty);
                        queue[0].1 -= take;
                        qty -= take;
                        traded += take;
                        if queue[0].1 == 0 {
                            let (maker, _) = queue.remove(0);
                            self.orders.remove(&maker);
                        }
                    }
                    if queue.is_empty() {
                        self.asks.remove(&level_price);
                    }
                }
                if qty > 0 {
                    self.bids.entry(price).or_default().push((id, qty));
                    self.orders.insert(id, (Side::Buy, price));
                }
            }
            Side::Sell => {
                let crossable: Vec<u64> = self
                    .bids
                    .range(price..)
                    .rev()
                    .map(|(p, _)| *p)
                    .collect();
                for level_price in crossable {
                    if qty == 0 {
                        break;
                    }
                    let queue = self.bids.get_mut(&level_price).unwrap();
                    while !queue.is_empty() && qty > 0 {
                        let take = queue[0].1.min(qty);
                        queue[0].1 -= take;
                        qty -= take;
                        traded += take;
                        if queue[0].1 == 0 {
                            let (maker, _) = queue.remove(0);
                            self.orders.remove(&maker);
                        }
                    }
                    if queue.is_empty() {
                        self.bids.remove(&level_price);
                    }
                }
                if qty > 0 {
                    self.asks.entry(price).or_default().push((id, qty));
                    self.orders.insert(id, (Side::Sell, price));
                }
            }
        }

        traded
    }

    fn cancel(&mut self, id: u64) -> bool {
        let Some((side, price)) = self.orders.remove(&id) else {
            return false;
        };
        let book = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if let Some(queue) = book.get_mut(&price) {
            queue.retain(|(other, _)| *other != id);
            if queue.is_empty() {
                book.remove(&price);
            }
        }
        true
    }

    fn order_count(&self) -> usize {
        self.orders.len()
    }
}

fn harness() -> (MatchingEngine, Arc<Mutex<RecordingPublisher>>) {
    let (publisher, events) = SharedPublisher::new(RecordingPublisher::new());
    let engine =
        MatchingEngine::with_ports(Symbol::new("AAPL"), 1 << 17, None, Box::new(publisher));
    (engine, events)
}

fn random_order(rng: &mut ChaCha8Rng, id: u64) -> (u64, Side, u64, u64) {
    (
        id,
        if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell },
        rng.gen_range(9_800..10_200) * 100,
        rng.gen_range(1..200),
    )
}

#[test]
fn fuzz_best_prices_match_reference() {
    const SEED: u64 = 0xFEED_FACE;
    const OPS: usize = 10_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let (mut engine, _events) = harness();
    let mut reference = ReferenceBook::new();

    let mut next_id = 1u64;
    let mut live: Vec<u64> = Vec::new();

    for op in 0..OPS {
        if live.is_empty() || rng.gen_bool(0.7) {
            let (id, side, price, qty) = random_order(&mut rng, next_id);
            next_id += 1;
            engine.apply(Command::Add(AddOrder::limit(id, side, Price(price), qty)));
            reference.place(id, side, price, qty);
            live.push(id);
        } else {
            let pick = rng.gen_range(0..live.len());
            let id = live.swap_remove(pick);
            engine.apply(Command::Cancel(CancelOrder { id: OrderId(id) }));
            reference.cancel(id);
        }

        assert_eq!(
            engine.book.best_bid().map(|p| p.ticks()),
            reference.best_bid(),
            "best bid diverged at op {op}"
        );
        assert_eq!(
            engine.book.best_ask().map(|p| p.ticks()),
            reference.best_ask(),
            "best ask diverged at op {op}"
        );

        if op % 500 == 0 {
            engine.book.validate().expect("structural invariant");
        }
    }

    engine.book.validate().expect("structural invariant at end");
    assert_eq!(engine.book.order_count(), reference.order_count());
}

#[test]
fn fuzz_traded_volume_matches_reference() {
    const SEED: u64 = 0x1234_5678;
    const OPS: usize = 5_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let (mut engine, events) = harness();
    let mut reference = ReferenceBook::new();

    let mut engine_volume = 0u64;
    let mut reference_volume = 0u64;

    for op in 0..OPS as u64 {
        let (id, side, price, qty) = random_order(&mut rng, op + 1);
        engine.apply(Command::Add(AddOrder::limit(id, side, Price(price), qty)));
        reference_volume += reference.place(id, side, price, qty);

        let mut recorder = events.lock().unwrap();
        engine_volume += recorder.trades().iter().map(|t| t.quantity).sum::<u64>();
        recorder.clear();
    }

    assert_eq!(engine_volume, reference_volume);
}

#[test]
fn fuzz_order_counts_match_reference() {
    const SEED: u64 = 0xBAD_C0DE;
    const OPS: usize = 5_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let (mut engine, _events) = harness();
    let mut reference = ReferenceBook::new();

    let mut next_id = 1u64;
    let mut live: Vec<u64> = Vec::new();

    for op in 0..OPS {
        if live.is_empty() || rng.gen_bool(0.6) {
            let (id, side, price, qty) = random_order(&mut rng, next_id);
            next_id += 1;
            engine.apply(Command::Add(AddOrder::limit(id, side, Price(price), qty)));
            reference.place(id, side, price, qty);
            if reference.orders.contains_key(&id) {
                live.push(id);
            }
        } else {
            let pick = rng.gen_range(0..live.len());
            let id = live.swap_remove(pick);
            engine.apply(Command::Cancel(CancelOrder { id: OrderId(id) }));
            reference.cancel(id);
        }

        if op % 100 == 0 {
            assert_eq!(
                engine.book.order_count(),
                reference.order_count(),
                "order count diverged at op {op}"
            );
        }
    }

    assert_eq!(engine.book.order_count(), reference.order_count());
}

#[test]
fn determinism_same_seed_same_state() {
    const SEED: u64 = 0xDEAD_BEEF;
    const OPS: usize = 2_000;

    let run = || {
        let mut rng = ChaCha8Rng::seed_from_u64(SEED);
        let (mut engine, _events) = harness();
        let mut next_id = 1u64;
        let mut live: Vec<u64> = Vec::new();

        for _ in 0..OPS {
            if live.is_empty() || rng.gen_bool(0.7) {
                let (id, side, price, qty) = random_order(&mut rng, next_id);
                next_id += 1;
                engine.apply(Command::Add(AddOrder::limit(id, side, Price(price), qty)));
                live.push(id);
            } else {
                let pick = rng.gen_range(0..live.len());
                let id = live.swap_remove(pick);
                engine.apply(Command::Cancel(CancelOrder { id: OrderId(id) }));
            }
        }
        engine.state_hash()
    };

    let first = run();
    for _ in 0..4 {
        assert_eq!(run(), first);
    }
}

#[test]
fn different_seeds_diverge() {
    let run = |seed: u64| {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (mut engine, _events) = harness();
        for id in 1..500u64 {
            let (id, side, price, qty) = random_order(&mut rng, id);
            engine.apply(Command::Add(AddOrder::limit(id, side, Price(price), qty)));
        }
        engine.state_hash()
    };
    assert_ne!(run(1), run(2));
}
