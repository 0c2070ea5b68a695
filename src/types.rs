//! Core identifier and value types.
//!
//! Prices are scaled integers (4 implied decimal places) so they are
//! totally ordered and hashable; floating point never enters the book.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of price ticks per whole currency unit.
pub const PRICE_SCALE: u64 = 10_000;

/// Largest admissible quantity. Anything above this is a validation error,
/// which keeps per-level totals safely below `u64::MAX` and positions
/// representable as `i64`.
pub const MAX_QUANTITY: u64 = 1 << 62;

/// Share/contract count.
pub type Quantity = u64;

/// Fixed-point price in ticks of 1/10_000 of a currency unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Price(pub u64);

impl Price {
    pub const ZERO: Price = Price(0);

    /// Build a price from whole currency units (convenience for tests).
    #[inline]
    pub const fn from_units(units: u64) -> Self {
        Price(units * PRICE_SCALE)
    }

    /// Raw tick count.
    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:04}", self.0 / PRICE_SCALE, self.0 % PRICE_SCALE)
    }
}

/// Client-assigned order identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Book-assigned trade identifier. Dense and monotonic per book.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TradeId(pub u64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

impl Side {
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        })
    }
}

/// Price-bounded or price-unbounded order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrderKind {
    #[default]
    Limit = 0,
    Market = 1,
}

/// Time in force.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TimeInForce {
    /// Good till cancelled: the residual rests.
    #[default]
    Gtc = 0,
    /// Immediate or cancel: one matching pass, the residual is cancelled.
    Ioc = 1,
    /// Fill or kill: executes only if fully fillable at acceptance time.
    Fok = 2,
}

/// Order lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum OrderStatus {
    #[default]
    New = 0,
    PartiallyFilled = 1,
    Filled = 2,
    Cancelled = 3,
    Rejected = 4,
}

impl OrderStatus {
    /// Terminal orders must be out of every index before the command that
    /// produced the transition returns.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Fixed-width instrument symbol; NUL-padded so commands stay `Copy` and
/// enqueue without allocating.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol([u8; 16]);

/// Fixed-width account identifier, same representation as [`Symbol`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Account([u8; 16]);

macro_rules! fixed_str_impl {
    ($ty:ident) => {
        impl $ty {
            pub fn new(s: &str) -> Self {
                let mut buf = [0u8; 16];
                let bytes = s.as_bytes();
                let n = bytes.len().min(16);
                buf[..n].copy_from_slice(&bytes[..n]);
                Self(buf)
            }

            pub fn as_str(&self) -> &str {
                let end = self.0.iter().position(|&b| b == 0).unwrap_or(16);
                std::str::from_utf8(&self.0[..end]).unwrap_or("")
            }

            pub fn is_empty(&self) -> bool {
                self.0[0] == 0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($ty), "({})"), self.as_str())
            }
        }

        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

fixed_str_impl!(Symbol);
fixed_str_impl!(Account);

impl Default for Symbol {
    fn default() -> Self {
        Symbol([0u8; 16])
    }
}

/// Wall-clock nanoseconds since the Unix epoch.
#[inline]
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_display_carries_four_decimals() {
        assert_eq!(Price::from_units(101).to_string(), "101.0000");
        assert_eq!(Price(1_005_000).to_string(), "100.5000");
        assert_eq!(Price(7).to_string(), "0.0007");
    }

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn status_terminality() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
    }

    #[test]
    fn symbol_round_trip() {
        let sym = Symbol::new("AAPL");
        assert_eq!(sym.as_str(), "AAPL");
        assert_eq!(sym, Symbol::new("AAPL"));
        assert_ne!(sym, Symbol::new("MSFT"));
    }

    #[test]
    fn symbol_truncates_long_input() {
        let sym = Symbol::new("ABCDEFGHIJKLMNOPQRSTU");
        assert_eq!(sym.as_str(), "ABCDEFGHIJKLMNOP");
    }

    #[test]
    fn empty_account() {
        assert!(Account::default().is_empty());
        assert!(!Account::new("A").is_empty());
    }
}
