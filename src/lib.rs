//! # matchbook
//!
//! A single-symbol, in-process limit order book: the matching core of an
//! electronic trading venue.
//!
//! ## Design
//!
//! - **Single writer**: one matching thread owns the book exclusively; no
//!   locks around the data structure, ever.
//! - **Sharded ingestion**: producers push commands onto per-thread SPSC
//!   rings; pushes are wait-free and allocation-free.
//! - **Arena orders**: resting orders live in a pre-allocated slab and are
//!   addressed by 32-bit handles; levels link them into FIFO queues with
//!   O(1) insert, cancel and pop.
//! - **Price-time priority**: aggressive orders cross the opposite side
//!   best-outward, fill makers head-first, and trade at the maker's price.
//!
//! ```text
//! [producer threads] --> [sharded SPSC rings] --> [matching thread]
//!                                                       |
//!                                        [risk port]  [publisher port]
//! ```
//!
//! The FIX session, WebSocket fan-out, risk engine and loggers are
//! collaborators behind the [`ports`] traits; the core speaks only native
//! command structs.

pub mod arena;
pub mod command;
pub mod config;
pub mod engine;
pub mod feed;
pub mod ladder;
pub mod matching;
pub mod order_book;
pub mod ports;
pub mod price_level;
pub mod queue;
pub mod risk;
pub mod types;

pub use arena::{Arena, ArenaIndex, OrderNode, NULL_INDEX};
pub use command::{
    AddOrder, BestPrices, BookUpdate, BookUpdateKind, CancelOrder, Command, DepthLevel, ExecType,
    ExecutionReport, MarketDepth, MarketUpdate, ModifyOrder, RejectReason, Trade,
};
pub use config::{ConfigError, EngineConfig, RiskConfig};
pub use engine::{Engine, RingPublisher};
pub use matching::MatchingEngine;
pub use order_book::{InvariantViolation, OrderBook, OrderLocator};
pub use ports::{
    FanOutPublisher, NullPublisher, Portfolio, PublishError, PublishedEvent, Publisher,
    RecordingPublisher, RiskCheck, RiskPort, SharedPublisher,
};
pub use price_level::PriceLevel;
pub use queue::{Doorbell, QueueFull, ShardedQueue, SpscRing};
pub use risk::{LimitRiskManager, RiskLimits};
pub use types::{
    now_nanos, Account, OrderId, OrderKind, OrderStatus, Price, Quantity, Side, Symbol,
    TimeInForce, TradeId, MAX_QUANTITY, PRICE_SCALE,
};
