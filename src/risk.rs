//! Reference risk manager: static size and price bounds plus per-account
//! position limits.

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::arena::OrderNode;
use crate::command::{RejectReason, Trade};
use crate::ports::{Portfolio, RiskCheck, RiskPort};
use crate::types::{Account, OrderId, OrderKind, Price, Side, Symbol};

/// Static limits, read from configuration at startup.
#[derive(Clone, Copy, Debug)]
pub struct RiskLimits {
    pub max_order_size: u64,
    pub min_price: Price,
    pub max_price: Price,
    pub min_position: i64,
    pub max_position: i64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_order_size: 10_000,
            min_price: Price(1),
            max_price: Price::from_units(1_000_000),
            min_position: -100_000,
            max_position: 100_000,
        }
    }
}

pub struct LimitRiskManager {
    symbol: Symbol,
    limits: RiskLimits,
    portfolios: FxHashMap<Account, Portfolio>,
    order_accounts: FxHashMap<OrderId, Account>,
    bypass: bool,
}

impl LimitRiskManager {
    pub fn new(symbol: Symbol, limits: RiskLimits) -> Self {
        Self {
            symbol,
            limits,
            portfolios: FxHashMap::default(),
            order_accounts: FxHashMap::default(),
            bypass: false,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    fn portfolio_mut(&mut self, account: Account) -> &mut Portfolio {
        self.portfolios
            .entry(account)
            .or_insert_with(|| Portfolio::new(account))
    }

    /// Position the account would hold if the order filled completely.
    fn projected_position(&self, order: &OrderNode) -> i64 {
        let current = self
            .portfolios
            .get(&order.account)
            .map(|p| p.position(&self.symbol))
            .unwrap_or(0);
        let delta = order.remaining() as i64;
        match order.side {
            Side::Buy => current + delta,
            Side::Sell => current - delta,
        }
    }
}

impl RiskPort for LimitRiskManager {
    fn validate_order(&mut self, order: &OrderNode) -> RiskCheck {
        if self.bypass {
            return RiskCheck::Approved;
        }

        if order.original_quantity > self.limits.max_order_size {
            return RiskCheck::Rejected(RejectReason::OrderTooLarge(
                order.original_quantity,
                self.limits.max_order_size,
            ));
        }

        if order.kind == OrderKind::Limit
            && (order.price < self.limits.min_price || order.price > self.limits.max_price)
        {
            return RiskCheck::Rejected(RejectReason::PriceOutOfBounds);
        }

        let projected = self.projected_position(order);
        if projected > self.limits.max_position || projected < self.limits.min_position {
            return RiskCheck::Rejected(RejectReason::PositionLimit);
        }

        RiskCheck::Approved
    }

    fn update_position(&mut self, trade: &Trade) {
        if self.bypass {
            return;
        }
        let qty = trade.quantity as i64;
        let (buy_order, sell_order) = match trade.taker_side {
            Side::Buy => (trade.taker_order_id, trade.maker_order_id),
            Side::Sell => (trade.maker_order_id, trade.taker_order_id),
        };
        if let Some(&account) = self.order_accounts.get(&buy_order) {
            self.portfolio_mut(account)
                .apply_fill(trade.symbol, qty, trade.price);
        }
        if let Some(&account) = self.order_accounts.get(&sell_order) {
            self.portfolio_mut(account)
                .apply_fill(trade.symbol, -qty, trade.price);
        }
    }

    fn associate_order(&mut self, order: OrderId, account: Account) {
        self.order_accounts.insert(order, account);
    }

    fn portfolio_for(&self, account: &Account) -> Option<Portfolio> {
        self.portfolios.get(account).cloned()
    }

    fn set_bypass(&mut self, bypass: bool) {
        if bypass {
            warn!("risk checks bypassed");
        }
        self.bypass = bypass;
    }

    fn is_bypassed(&self) -> bool {
        self.bypass
    }
}
