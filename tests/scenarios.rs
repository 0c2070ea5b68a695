//! Golden end-to-end scenarios: small, fully specified command sequences
//! with exact expected trades and book states.
//!
//! All orders are on symbol AAPL for account A; prices in whole units,
//! quantities in shares.

use std::sync::{Arc, Mutex};

use matchbook::{
    Account, AddOrder, Command, ExecType, MatchingEngine, ModifyOrder, OrderId, Price,
    RecordingPublisher, RejectReason, SharedPublisher, Side, Symbol, Trade,
};

fn engine() -> (MatchingEngine, Arc<Mutex<RecordingPublisher>>) {
    let (publisher, events) = SharedPublisher::new(RecordingPublisher::new());
    let engine =
        MatchingEngine::with_ports(Symbol::new("AAPL"), 10_000, None, Box::new(publisher));
    (engine, events)
}

fn add(engine: &mut MatchingEngine, id: u64, side: Side, price: u64, qty: u64) {
    engine.apply(Command::Add(
        AddOrder::limit(id, side, Price::from_units(price), qty)
            .with_symbol(Symbol::new("AAPL"))
            .with_account(Account::new("A")),
    ));
}

fn trades(events: &Arc<Mutex<RecordingPublisher>>) -> Vec<Trade> {
    events.lock().unwrap().trades()
}

/// (maker id, price in units, quantity) triples, in emission order.
fn trade_triples(events: &Arc<Mutex<RecordingPublisher>>) -> Vec<(u64, u64, u64)> {
    trades(events)
        .iter()
        .map(|t| {
            (
                t.maker_order_id.0,
                t.price.ticks() / matchbook::PRICE_SCALE,
                t.quantity,
            )
        })
        .collect()
}

#[test]
fn scenario_1_no_cross() {
    let (mut engine, events) = engine();
    add(&mut engine, 1, Side::Buy, 100, 50);
    add(&mut engine, 2, Side::Sell, 101, 30);

    assert!(trades(&events).is_empty());
    assert_eq!(engine.book.best_bid(), Some(Price::from_units(100)));
    assert_eq!(engine.book.best_ask(), Some(Price::from_units(101)));

    let depth = engine.book.depth(1);
    assert_eq!(depth.bids[0].quantity, 50);
    assert_eq!(depth.asks[0].quantity, 30);

    assert_eq!(engine.book.order_count(), 2);
    assert_eq!(engine.book.bid_level_count() + engine.book.ask_level_count(), 2);
    assert!(engine.book.validate().is_ok());
}

#[test]
fn scenario_2_partial_fill_crossing() {
    let (mut engine, events) = engine();
    add(&mut engine, 1, Side::Buy, 100, 50);
    add(&mut engine, 2, Side::Sell, 101, 30);
    add(&mut engine, 3, Side::Buy, 101, 20);

    let all = trades(&events);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].taker_order_id, OrderId(3));
    assert_eq!(all[0].maker_order_id, OrderId(2));
    assert_eq!(all[0].price, Price::from_units(101));
    assert_eq!(all[0].quantity, 20);

    // #3 fully filled and gone; #2 rests with 10
    assert!(!engine.book.contains(OrderId(3)));
    assert_eq!(engine.book.best_bid(), Some(Price::from_units(100)));
    assert_eq!(engine.book.best_ask(), Some(Price::from_units(101)));
    let depth = engine.book.depth(1);
    assert_eq!(depth.bids[0].quantity, 50);
    assert_eq!(depth.asks[0].quantity, 10);
    assert!(engine.book.validate().is_ok());
}

#[test]
fn scenario_3_sweep_multiple_levels() {
    let (mut engine, events) = engine();
    add(&mut engine, 1, Side::Sell, 99, 30);
    add(&mut engine, 2, Side::Sell, 100, 40);
    add(&mut engine, 3, Side::Sell, 101, 50);
    add(&mut engine, 4, Side::Buy, 102, 100);

    assert_eq!(
        trade_triples(&events),
        vec![(1, 99, 30), (2, 100, 40), (3, 101, 30)]
    );

    // #4 fully filled; #3 left with 20 at 101
    assert!(!engine.book.contains(OrderId(4)));
    assert_eq!(engine.book.order_count(), 1);
    assert_eq!(engine.book.best_ask(), Some(Price::from_units(101)));
    assert_eq!(engine.book.depth(1).asks[0].quantity, 20);
    assert!(engine.book.validate().is_ok());
}

#[test]
fn scenario_4_fifo_at_one_level() {
    let (mut engine, events) = engine();
    add(&mut engine, 1, Side::Sell, 100, 20);
    add(&mut engine, 2, Side::Sell, 100, 30);
    add(&mut engine, 3, Side::Buy, 100, 25);

    assert_eq!(trade_triples(&events), vec![(1, 100, 20), (2, 100, 5)]);
    assert!(!engine.book.contains(OrderId(1)));
    assert!(engine.book.contains(OrderId(2)));
    assert_eq!(engine.book.depth(1).asks[0].quantity, 25);
    assert!(engine.book.validate().is_ok());
}

#[test]
fn scenario_5_cancel_vs_fill_race() {
    // The race is resolved by dequeue order on the matching thread:
    // whichever of {fill, cancel} is applied first wins, and exactly one
    // of the two terminal states results.
    use matchbook::{Engine, EngineConfig, NullPublisher};

    for round in 0..20 {
        let mut config = EngineConfig {
            symbol: "AAPL".to_string(),
            order_capacity: 1024,
            command_shards: 4,
            command_shard_capacity: 1 << 10,
            ..EngineConfig::default()
        };
        config.risk.enabled = false;
        let engine = Engine::with_ports(config, None, Box::new(NullPublisher));

        engine
            .submit(AddOrder::limit(1, Side::Buy, Price::from_units(100), 50))
            .unwrap();
        engine.wait_for_completion();

        std::thread::scope(|scope| {
            let e = &engine;
            scope.spawn(move || {
                e.submit(AddOrder::limit(2, Side::Sell, Price::from_units(100), 50))
                    .unwrap();
            });
            let e = &engine;
            scope.spawn(move || {
                e.cancel(OrderId(1)).unwrap();
            });
        });
        engine.wait_for_completion();

        let traded = engine.trade_count();
        let matcher = engine.shutdown();
        match traded {
            // fill won: both orders terminal, book empty
            1 => assert_eq!(matcher.book.order_count(), 0, "round {round}"),
            // cancel won: #1 gone, #2 rests alone
            0 => {
                assert_eq!(matcher.book.order_count(), 1, "round {round}");
                assert_eq!(matcher.book.best_ask(), Some(Price::from_units(100)));
                assert!(!matcher.book.contains(OrderId(1)));
            }
            other => panic!("impossible trade count {other}"),
        }
        assert!(matcher.book.validate().is_ok());
    }
}

#[test]
fn scenario_6_modify_requeues_priority() {
    // Policy under test: a modify to identical price and size is a pure
    // no-op that keeps time priority; repricing away and back re-queues
    // at the tail.
    let (mut engine, events) = engine();
    add(&mut engine, 1, Side::Buy, 100, 10);
    add(&mut engine, 2, Side::Buy, 100, 10);

    engine.apply(Command::Modify(ModifyOrder {
        id: OrderId(1),
        new_price: Some(Price::from_units(100)),
        new_quantity: Some(10),
    }));
    add(&mut engine, 3, Side::Sell, 100, 10);

    // true no-op: #1 kept the head of the queue
    assert_eq!(trade_triples(&events), vec![(1, 100, 10)]);
    events.lock().unwrap().clear();

    // now reprice #2 away and back: it goes behind the new order #4
    add(&mut engine, 4, Side::Buy, 100, 10);
    engine.apply(Command::Modify(ModifyOrder {
        id: OrderId(2),
        new_price: Some(Price::from_units(101)),
        new_quantity: None,
    }));
    engine.apply(Command::Modify(ModifyOrder {
        id: OrderId(2),
        new_price: Some(Price::from_units(100)),
        new_quantity: None,
    }));
    add(&mut engine, 5, Side::Sell, 100, 10);

    assert_eq!(trade_triples(&events), vec![(4, 100, 10)]);
    assert!(engine.book.validate().is_ok());
}

// ============================================================================
// Boundary behaviours
// ============================================================================

#[test]
fn exact_quantity_fills_both() {
    let (mut engine, events) = engine();
    add(&mut engine, 1, Side::Sell, 100, 40);
    add(&mut engine, 2, Side::Buy, 100, 40);

    assert_eq!(trade_triples(&events), vec![(1, 100, 40)]);
    assert_eq!(engine.book.order_count(), 0);
    assert_eq!(engine.book.ask_level_count(), 0);
    assert_eq!(engine.book.bid_level_count(), 0);
}

#[test]
fn same_price_fills_in_arrival_order_with_uneven_sizes() {
    let (mut engine, events) = engine();
    add(&mut engine, 1, Side::Sell, 100, 7);
    add(&mut engine, 2, Side::Sell, 100, 100);
    add(&mut engine, 3, Side::Buy, 100, 50);

    assert_eq!(trade_triples(&events), vec![(1, 100, 7), (2, 100, 43)]);
}

#[test]
fn fok_larger_than_book_rejects_without_state_change() {
    let (mut engine, events) = engine();
    add(&mut engine, 1, Side::Sell, 100, 30);
    add(&mut engine, 2, Side::Sell, 101, 30);
    let hash_before = engine.state_hash();

    engine.apply(Command::Add(AddOrder::fok(
        3,
        Side::Buy,
        Price::from_units(101),
        100,
    )));

    assert_eq!(engine.state_hash(), hash_before);
    assert!(trades(&events).is_empty());
    let reports = events.lock().unwrap().reports();
    let reject = reports
        .iter()
        .find(|r| r.order_id == OrderId(3))
        .expect("rejection report");
    assert_eq!(reject.exec_type, ExecType::Rejected);
    assert_eq!(reject.reason, Some(RejectReason::InsufficientLiquidity));
}

#[test]
fn market_buy_into_empty_asks_does_not_rest() {
    let (mut engine, events) = engine();
    add(&mut engine, 1, Side::Buy, 99, 10); // liquidity on the same side only
    engine.apply(Command::Add(AddOrder::market(2, Side::Buy, 100)));

    assert!(trades(&events).is_empty());
    assert_eq!(engine.book.order_count(), 1);
    assert!(!engine.book.contains(OrderId(2)));

    let reports = events.lock().unwrap().reports();
    let last = reports.iter().rfind(|r| r.order_id == OrderId(2)).unwrap();
    assert_eq!(last.exec_type, ExecType::Cancelled);
    assert_eq!(last.filled_quantity, 0);
}

#[test]
fn add_then_cancel_round_trip() {
    let (mut engine, _) = engine();
    add(&mut engine, 1, Side::Buy, 100, 50);
    add(&mut engine, 2, Side::Sell, 104, 25);

    let snapshot = (
        engine.book.order_count(),
        engine.book.bid_level_count(),
        engine.book.ask_level_count(),
        engine.book.best_bid(),
        engine.book.best_ask(),
    );

    add(&mut engine, 3, Side::Buy, 101, 40);
    engine.apply(Command::Cancel(matchbook::CancelOrder { id: OrderId(3) }));

    let restored = (
        engine.book.order_count(),
        engine.book.bid_level_count(),
        engine.book.ask_level_count(),
        engine.book.best_bid(),
        engine.book.best_ask(),
    );
    assert_eq!(snapshot, restored);
    assert!(engine.book.validate().is_ok());
}

#[test]
fn trade_prices_are_maker_prices_for_market_sweeps() {
    let (mut engine, events) = engine();
    add(&mut engine, 1, Side::Sell, 100, 10);
    add(&mut engine, 2, Side::Sell, 103, 10);
    add(&mut engine, 3, Side::Sell, 107, 10);
    engine.apply(Command::Add(AddOrder::market(4, Side::Buy, 30)));

    assert_eq!(
        trade_triples(&events),
        vec![(1, 100, 10), (2, 103, 10), (3, 107, 10)]
    );
    assert_eq!(engine.book.ask_level_count(), 0);
}
