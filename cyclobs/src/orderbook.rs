//! Order book management with full depth tracking.
//!
//! Maintains the local two-sided book of one market from the feed's full
//! snapshots and incremental price changes. Both sides are ordered maps so
//! point updates, deletes and best-price lookups stay logarithmic.

use crate::order::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of levels printed per side when the book fails validation.
const DIAGNOSTIC_LEVELS: usize = 5;

/// A single price level in the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}

impl Level {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Full-depth order book for a single market.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    /// Bid levels keyed by price (best bid is the last key)
    bids: BTreeMap<Decimal, Decimal>,
    /// Ask levels keyed by price (best ask is the first key)
    asks: BTreeMap<Decimal, Decimal>,
}

impl OrderBook {
    /// Create a new empty order book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both sides wholesale from a full book event.
    pub fn apply_snapshot(&mut self, bids: &[Level], asks: &[Level]) {
        self.bids.clear();
        self.asks.clear();
        for level in bids.iter().filter(|l| l.size > Decimal::ZERO) {
            self.bids.insert(level.price, level.size);
        }
        for level in asks.iter().filter(|l| l.size > Decimal::ZERO) {
            self.asks.insert(level.price, level.size);
        }
    }

    /// Apply a single price change.
    ///
    /// A positive size upserts the level and sweeps every level on the
    /// opposite side that the new level crosses. A zero size removes the
    /// price from both sides, since the exchange does not always report a
    /// removal on the side it happened on. A negative size is invalid and
    /// handled like a removal.
    pub fn apply_delta(&mut self, side: Side, price: Decimal, size: Decimal) {
        if size > Decimal::ZERO {
            match side {
                Side::Buy => {
                    self.bids.insert(price, size);
                    self.asks.retain(|ask, _| *ask > price);
                }
                Side::Sell => {
                    self.asks.insert(price, size);
                    self.bids.retain(|bid, _| *bid < price);
                }
            }
            return;
        }
        if size < Decimal::ZERO {
            tracing::warn!(price = %price, size = %size, side = ?side, "Negative price change");
        }
        self.bids.remove(&price);
        self.asks.remove(&price);
    }

    /// Check that both sides are populated and the book is not crossed.
    ///
    /// An empty side is reported as invalid without logging. A crossed book
    /// is logged with the top levels of each side.
    pub fn validate(&self) -> bool {
        let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) else {
            return false;
        };
        if ask.price > bid.price {
            return true;
        }
        tracing::warn!(
            best_bid = %bid.price,
            best_ask = %ask.price,
            bids = ?self.top_bids(DIAGNOSTIC_LEVELS),
            asks = ?self.top_asks(DIAGNOSTIC_LEVELS),
            "Invalid order book state"
        );
        false
    }

    /// Best bid price and size.
    pub fn best_bid(&self) -> Option<Level> {
        self.bids.iter().next_back().map(|(p, s)| Level::new(*p, *s))
    }

    /// Best ask price and size.
    pub fn best_ask(&self) -> Option<Level> {
        self.asks.iter().next().map(|(p, s)| Level::new(*p, *s))
    }

    /// Mid price (average of best bid and ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// Spread (best ask - best bid).
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Bid levels, best first.
    pub fn top_bids(&self, n: usize) -> Vec<Level> {
        self.bids
            .iter()
            .rev()
            .take(n)
            .map(|(p, s)| Level::new(*p, *s))
            .collect()
    }

    /// Ask levels, best first.
    pub fn top_asks(&self, n: usize) -> Vec<Level> {
        self.asks
            .iter()
            .take(n)
            .map(|(p, s)| Level::new(*p, *s))
            .collect()
    }

    /// Notional (price * size) resting within `range` of `price`, per side.
    ///
    /// Returns `(bid_notional, ask_notional)`.
    pub fn liquidity_near(&self, price: Decimal, range: Decimal) -> (Decimal, Decimal) {
        let low = price - range;
        let high = price + range;
        let notional = |book: &BTreeMap<Decimal, Decimal>| -> Decimal {
            book.range(low..=high).map(|(p, s)| *p * *s).sum()
        };
        (notional(&self.bids), notional(&self.asks))
    }

    /// Number of bid levels.
    pub fn bid_count(&self) -> usize {
        self.bids.len()
    }

    /// Number of ask levels.
    pub fn ask_count(&self) -> usize {
        self.asks.len()
    }

    /// Check whether either side is empty.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() || self.asks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_book() -> OrderBook {
        let mut book = OrderBook::new();
        book.apply_snapshot(
            &[
                Level::new(dec!(0.50), dec!(100)),
                Level::new(dec!(0.49), dec!(200)),
                Level::new(dec!(0.48), dec!(300)),
            ],
            &[
                Level::new(dec!(0.51), dec!(100)),
                Level::new(dec!(0.52), dec!(200)),
                Level::new(dec!(0.53), dec!(300)),
            ],
        );
        book
    }

    fn assert_not_crossed(book: &OrderBook) {
        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            assert!(bid.price < ask.price, "crossed: {} >= {}", bid.price, ask.price);
        }
    }

    #[test]
    fn test_best_bid_ask() {
        let book = make_book();
        assert_eq!(book.best_bid().unwrap().price, dec!(0.50));
        assert_eq!(book.best_ask().unwrap().price, dec!(0.51));
    }

    #[test]
    fn test_mid_price_and_spread() {
        let book = make_book();
        assert_eq!(book.mid_price(), Some(dec!(0.505)));
        assert_eq!(book.spread(), Some(dec!(0.01)));
    }

    #[test]
    fn test_snapshot_replaces_sides() {
        let mut book = make_book();
        book.apply_snapshot(&[Level::new(dec!(0.30), dec!(5))], &[Level::new(dec!(0.40), dec!(7))]);
        assert_eq!(book.bid_count(), 1);
        assert_eq!(book.ask_count(), 1);
        assert_eq!(book.best_bid(), Some(Level::new(dec!(0.30), dec!(5))));
    }

    #[test]
    fn test_bid_delta_sweeps_crossed_asks() {
        let mut book = OrderBook::new();
        book.apply_snapshot(
            &[Level::new(dec!(0.55), dec!(10))],
            &[Level::new(dec!(0.60), dec!(10)), Level::new(dec!(0.70), dec!(10))],
        );
        book.apply_delta(Side::Buy, dec!(0.65), dec!(20));
        assert_eq!(book.best_bid().unwrap().price, dec!(0.65));
        assert_eq!(book.best_ask().unwrap().price, dec!(0.70));
        assert_eq!(book.ask_count(), 1);
        assert_not_crossed(&book);
    }

    #[test]
    fn test_ask_delta_sweeps_crossed_bids() {
        let mut book = make_book();
        book.apply_delta(Side::Sell, dec!(0.49), dec!(50));
        assert_eq!(book.best_ask().unwrap().price, dec!(0.49));
        assert_eq!(book.best_bid().unwrap().price, dec!(0.48));
        assert_not_crossed(&book);
    }

    #[test]
    fn test_zero_size_removes_from_both_sides() {
        let mut book = make_book();
        // Posted on the sell side but the level lives on the bid side
        book.apply_delta(Side::Sell, dec!(0.50), dec!(0));
        assert_eq!(book.best_bid().unwrap().price, dec!(0.49));
        book.apply_delta(Side::Buy, dec!(0.51), dec!(0));
        assert_eq!(book.best_ask().unwrap().price, dec!(0.52));
    }

    #[test]
    fn test_negative_size_removes_level() {
        let mut book = make_book();
        book.apply_delta(Side::Buy, dec!(0.50), dec!(-3));
        assert_eq!(book.best_bid().unwrap().price, dec!(0.49));
    }

    #[test]
    fn test_validate() {
        assert!(make_book().validate());
        assert!(!OrderBook::new().validate());

        let mut one_sided = OrderBook::new();
        one_sided.apply_snapshot(&[Level::new(dec!(0.5), dec!(1))], &[]);
        assert!(!one_sided.validate());

        let mut crossed = OrderBook::new();
        crossed.apply_snapshot(&[Level::new(dec!(0.6), dec!(1))], &[Level::new(dec!(0.5), dec!(1))]);
        assert!(!crossed.validate());
    }

    #[test]
    fn test_delta_sequence_never_crosses() {
        let mut book = make_book();
        let deltas = [
            (Side::Buy, dec!(0.52), dec!(10)),
            (Side::Sell, dec!(0.47), dec!(5)),
            (Side::Buy, dec!(0.60), dec!(1)),
            (Side::Sell, dec!(0.61), dec!(0)),
            (Side::Sell, dec!(0.62), dec!(8)),
            (Side::Buy, dec!(0.30), dec!(2)),
        ];
        for (side, price, size) in deltas {
            book.apply_delta(side, price, size);
            assert_not_crossed(&book);
        }
    }

    #[test]
    fn test_liquidity_near() {
        let book = make_book();
        let (bids, asks) = book.liquidity_near(dec!(0.50), dec!(0.01));
        // 0.50*100 + 0.49*200
        assert_eq!(bids, dec!(148));
        // 0.51*100
        assert_eq!(asks, dec!(51));
    }

    #[test]
    fn test_top_levels() {
        let book = make_book();
        let bids = book.top_bids(2);
        assert_eq!(bids[0].price, dec!(0.50));
        assert_eq!(bids[1].price, dec!(0.49));
        let asks = book.top_asks(5);
        assert_eq!(asks.len(), 3);
        assert_eq!(asks[0].price, dec!(0.51));
    }
}
