//! Latency harness: drives the matching engine synchronously and reports
//! an hdrhistogram percentile breakdown per command.
//!
//! Risk is attached but bypassed, matching how production benchmarks run
//! against a release build without recompiling.

use hdrhistogram::Histogram;
use std::time::Instant;

use matchbook::{
    AddOrder, CancelOrder, Command, LimitRiskManager, MatchingEngine, NullPublisher, Price,
    RiskLimits, RiskPort, Side, Symbol,
};
use tracing_subscriber::EnvFilter;

const WARMUP_OPS: usize = 10_000;
const ITERATIONS: u64 = 1_000_000;

fn main() {
    // unknown-id cancels are part of the workload; keep their warnings out
    // of the measurement window
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "error".into()))
        .init();

    let symbol = Symbol::new("AAPL");
    let mut risk = LimitRiskManager::new(symbol, RiskLimits::default());
    risk.set_bypass(true);
    let mut engine = MatchingEngine::with_ports(
        symbol,
        1 << 20,
        Some(Box::new(risk)),
        Box::new(NullPublisher),
    );
    engine.warm_up();

    println!("Pre-generating {WARMUP_OPS} commands...");
    let commands: Vec<Command> = (0..WARMUP_OPS as u64)
        .map(|i| {
            let id = i + 1;
            if i % 5 == 4 {
                Command::Cancel(CancelOrder {
                    id: matchbook::OrderId(id - 2),
                })
            } else {
                Command::Add(AddOrder::limit(
                    id,
                    if i % 2 == 0 { Side::Buy } else { Side::Sell },
                    Price(Price::from_units(100).ticks() + i % 100),
                    10,
                ))
            }
        })
        .collect();

    println!("Warming up branch predictors ({WARMUP_OPS} ops)...");
    for command in &commands {
        std::hint::black_box(engine.apply(*command));
    }

    println!("Running {ITERATIONS} iterations...");
    let mut histogram = Histogram::<u64>::new_with_bounds(1, 10_000_000, 3).unwrap();
    let mut total = std::time::Duration::ZERO;
    let mut cycle = commands.iter().cycle();
    let mut next_id = WARMUP_OPS as u64 + 1;

    for _ in 0..ITERATIONS {
        let command = match *cycle.next().unwrap() {
            Command::Add(mut add) => {
                add.id = matchbook::OrderId(next_id);
                next_id += 1;
                Command::Add(add)
            }
            other => other,
        };

        let start = Instant::now();
        std::hint::black_box(engine.apply(command));
        let elapsed = start.elapsed();

        histogram.record(elapsed.as_nanos() as u64).unwrap_or(());
        total += elapsed;
    }

    println!("\n=== Latency Report (ns) ===");
    println!("Total ops:  {ITERATIONS}");
    println!(
        "Throughput: {:.2} ops/sec",
        ITERATIONS as f64 / total.as_secs_f64()
    );
    println!("Trades:     {}", engine.trades_executed());
    println!("---------------------------");
    println!("Min:    {:7} ns", histogram.min());
    println!("P50:    {:7} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:7} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:7} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:7} ns", histogram.value_at_quantile(0.999));
    println!("P99.99: {:7} ns", histogram.value_at_quantile(0.9999));
    println!("Max:    {:7} ns", histogram.max());
}
