//! End-to-end demo: several producer threads fire a deterministic order
//! flow at the threaded engine while a sink thread drains published
//! events from the output ring.
//!
//! Usage: `book_sim [config.toml]`

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use matchbook::{
    AddOrder, Engine, EngineConfig, OrderId, Price, PublishedEvent, RingPublisher, Side,
};

const PRODUCERS: u64 = 4;
const ORDERS_PER_PRODUCER: u64 = 50_000;

fn main() {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&path).expect("load config"),
        None => EngineConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let (publisher, mut sink) = RingPublisher::with_capacity(1 << 16);
    let engine = Engine::start(config, Box::new(publisher));

    // Sink thread: tally events as a downstream broadcaster would.
    let stop_sink = Arc::new(AtomicBool::new(false));
    let trade_volume = Arc::new(AtomicU64::new(0));
    let sink_thread = {
        let stop = Arc::clone(&stop_sink);
        let volume = Arc::clone(&trade_volume);
        std::thread::spawn(move || {
            let mut events = 0u64;
            loop {
                match sink.pop() {
                    Ok(event) => {
                        events += 1;
                        if let PublishedEvent::Trade(trade) = event {
                            volume.fetch_add(trade.quantity, Ordering::Relaxed);
                        }
                    }
                    Err(_) => {
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        std::thread::yield_now();
                    }
                }
            }
            events
        })
    };

    info!(
        producers = PRODUCERS,
        per_producer = ORDERS_PER_PRODUCER,
        "starting flow"
    );
    let start = std::time::Instant::now();

    std::thread::scope(|scope| {
        for producer in 0..PRODUCERS {
            let engine = &engine;
            scope.spawn(move || {
                let buyer = producer % 2 == 0;
                for i in 0..ORDERS_PER_PRODUCER {
                    let id = producer * ORDERS_PER_PRODUCER + i + 1;
                    let marketable = i % 13 == 0;
                    // passive flow rests inside its own band; every 13th
                    // order reaches across the spread and sweeps
                    let price = match (buyer, marketable) {
                        (true, false) => 9_950 + i % 50,
                        (true, true) => 10_005 + i % 20,
                        (false, false) => 10_000 + i % 50,
                        (false, true) => 9_995 - i % 20,
                    };
                    let order = AddOrder::limit(
                        id,
                        if buyer { Side::Buy } else { Side::Sell },
                        Price(price * 100),
                        (i % 37) + 1,
                    );
                    while engine.submit(order).is_err() {
                        std::thread::yield_now();
                    }
                    // a slice of the passive flow is pulled again
                    if !marketable && i % 7 == 0 {
                        while engine.cancel(OrderId(id)).is_err() {
                            std::thread::yield_now();
                        }
                    }
                }
            });
        }
    });

    engine.wait_for_completion();
    let elapsed = start.elapsed();

    let submitted = PRODUCERS * ORDERS_PER_PRODUCER;
    let trades = engine.trade_count();
    let matcher = engine.shutdown();

    stop_sink.store(true, Ordering::Release);
    let events_seen = sink_thread.join().expect("sink thread");

    println!("=== book_sim ===");
    println!("commands:     {submitted}");
    println!(
        "throughput:   {:.0} cmd/s",
        submitted as f64 / elapsed.as_secs_f64()
    );
    println!("trades:       {trades}");
    println!("volume:       {}", trade_volume.load(Ordering::Relaxed));
    println!("events seen:  {events_seen}");
    println!("resting:      {}", matcher.book.order_count());
    println!(
        "best bid/ask: {:?} / {:?}",
        matcher.book.best_bid(),
        matcher.book.best_ask()
    );
    matcher.book.validate().expect("book invariants");
}
