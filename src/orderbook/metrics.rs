//! Order book metrics calculation

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Level;

/// Computed metrics for an order book
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookMetrics {
    /// Mid price (average of best bid and ask)
    pub mid_price: Option<Decimal>,

    /// Spread in basis points
    pub spread_bps: Option<Decimal>,

    /// Simple imbalance: (bid_vol - ask_vol) / (bid_vol + ask_vol)
    pub imbalance: Option<Decimal>,

    /// Bid volume over the reported depth
    pub bid_depth: Decimal,

    /// Ask volume over the reported depth
    pub ask_depth: Decimal,

    /// Number of bid levels in the book
    pub bid_levels: usize,

    /// Number of ask levels in the book
    pub ask_levels: usize,

    /// Number of resting orders on both sides
    pub resting_orders: usize,
}

impl OrderBookMetrics {
    /// Derive metrics from the top of book and best-first depth on each side
    pub fn compute(
        best_bid: Option<Level>,
        best_ask: Option<Level>,
        bids: &[Level],
        asks: &[Level],
    ) -> Self {
        let mid_price = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::from(2)),
            _ => None,
        };

        let spread_bps = match (best_bid, best_ask, mid_price) {
            (Some(bid), Some(ask), Some(mid)) if mid > Decimal::ZERO => {
                Some((ask.price - bid.price) / mid * Decimal::from(10000))
            }
            _ => None,
        };

        let bid_depth: Decimal = bids.iter().map(|l| l.size).sum();
        let ask_depth: Decimal = asks.iter().map(|l| l.size).sum();
        let total = bid_depth + ask_depth;
        let imbalance = if total > Decimal::ZERO {
            Some((bid_depth - ask_depth) / total)
        } else {
            None
        };

        Self {
            mid_price,
            spread_bps,
            imbalance,
            bid_depth,
            ask_depth,
            bid_levels: 0,
            ask_levels: 0,
            resting_orders: 0,
        }
    }

    /// Check if the order book is healthy (has valid data)
    pub fn is_healthy(&self) -> bool {
        self.mid_price.is_some()
            && self.spread_bps.is_some()
            && self.bid_levels > 0
            && self.ask_levels > 0
    }
}
