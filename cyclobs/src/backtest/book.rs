//! Simulated cash and positions of one backtest run.

use super::index::{hour_of, HistoryIndex};
use super::performance::{EquityCurveSample, PerformanceTracker};
use super::pricing::{bid_ask, OutcomeSide, MAX_PRICE_OFFSET_HOURS, RECENT_TRADES_LIMIT};
use super::BacktestError;
use crate::store::PriceHistory;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// An open simulated position.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestPosition {
    pub slug: String,
    pub side: OutcomeSide,
    pub opened: DateTime<Utc>,
    /// Fill price paid per unit
    pub price: f64,
    pub size: f64,
}

/// A closed trade kept for the summary.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestTrade {
    pub opened: DateTime<Utc>,
    pub slug: String,
    pub profit: f64,
}

/// Cash, open positions and statistics of a run.
///
/// Positions open at the synthetic ask and close at the synthetic bid.
/// Resolved markets pay exactly 1 or 0 per unit.
pub struct BacktestPositionBook<'a> {
    index: &'a HistoryIndex,
    strict: bool,
    now: DateTime<Utc>,
    cash: f64,
    max_net_worth: f64,
    max_drawdown: f64,
    trades: usize,
    positions: Vec<BacktestPosition>,
    equity_curve: Vec<EquityCurveSample>,
    performance: PerformanceTracker,
    recent_trades: VecDeque<BacktestTrade>,
}

impl<'a> BacktestPositionBook<'a> {
    pub fn new(index: &'a HistoryIndex, now: DateTime<Utc>, cash: f64, strict: bool) -> Self {
        Self {
            index,
            strict,
            now,
            cash,
            max_net_worth: cash,
            max_drawdown: 0.0,
            trades: 0,
            positions: Vec::new(),
            equity_curve: Vec::new(),
            performance: PerformanceTracker::default(),
            recent_trades: VecDeque::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub(crate) fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn trades(&self) -> usize {
        self.trades
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn positions(&self) -> &[BacktestPosition] {
        &self.positions
    }

    pub fn has_position(&self, slug: &str) -> bool {
        self.positions.iter().any(|p| p.slug == slug)
    }

    pub fn equity_curve(&self) -> &[EquityCurveSample] {
        &self.equity_curve
    }

    pub fn performance(&self) -> &PerformanceTracker {
        &self.performance
    }

    pub fn recent_trades(&self) -> impl Iterator<Item = &BacktestTrade> {
        self.recent_trades.iter()
    }

    /// Markets with data on the current date matching `tags`.
    pub fn markets(&self, tags: &[String]) -> Vec<&'a PriceHistory> {
        self.index.markets_on(self.now.date_naive(), tags)
    }

    /// Last hourly price at or before now within the look-back window.
    pub fn price(&self, slug: &str) -> Option<f64> {
        let hour = hour_of(self.now);
        (0..MAX_PRICE_OFFSET_HOURS).find_map(|offset| self.index.price_at_hour(slug, hour - Duration::hours(offset)))
    }

    /// Price used for closing and valuation. A miss fails the run when
    /// strict, otherwise the latest known sample is used.
    pub fn require_price(&self, slug: &str) -> Result<f64, BacktestError> {
        if let Some(price) = self.price(slug) {
            return Ok(price);
        }
        let history = self
            .index
            .history(slug)
            .ok_or_else(|| BacktestError::UnknownMarket(slug.to_string()))?;
        if self.strict {
            let samples = &history.history;
            tracing::error!(
                slug = %slug,
                now = %self.now,
                samples = samples.len(),
                first = ?samples.first().map(|s| s.timestamp),
                last = ?samples.last().map(|s| s.timestamp),
                "No price within look-back window"
            );
            return Err(BacktestError::MissingPrice {
                slug: slug.to_string(),
                at: self.now,
            });
        }
        let sample = self
            .index
            .latest_sample(slug, self.now)
            .ok_or_else(|| BacktestError::MissingPrice {
                slug: slug.to_string(),
                at: self.now,
            })?;
        tracing::warn!(slug = %slug, now = %self.now, sample = %sample.timestamp, "Using stale price");
        Ok(sample.price)
    }

    /// Buy `size` units of `side` at the ask. Returns false when there is
    /// no price or not enough cash.
    pub fn open_position(&mut self, slug: &str, side: OutcomeSide, size: f64) -> bool {
        let Some(price) = self.price(slug) else {
            return false;
        };
        let (_, ask) = bid_ask(price, side);
        let cost = size * ask;
        if cost > self.cash {
            return false;
        }
        self.cash -= cost;
        self.positions.push(BacktestPosition {
            slug: slug.to_string(),
            side,
            opened: self.now,
            price: ask,
            size,
        });
        tracing::debug!(slug = %slug, side = %side, price = ask, size = size, cash = self.cash, "Opened position");
        true
    }

    /// Sell every position on `slug` at the bid. Returns whether any was
    /// closed.
    pub fn close_positions(&mut self, slug: &str) -> Result<bool, BacktestError> {
        if !self.has_position(slug) {
            return Ok(false);
        }
        let price = self.require_price(slug)?;
        let (closing, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.positions)
            .into_iter()
            .partition(|p| p.slug == slug);
        self.positions = kept;
        for position in closing {
            let (bid, _) = bid_ask(price, position.side);
            self.cash += position.size * bid;
            let profit = position.size * (bid - position.price);
            tracing::debug!(slug = %slug, side = %position.side, price = bid, cash = self.cash, "Closed position");
            self.record_trade(&position, profit);
        }
        Ok(true)
    }

    pub fn close_all_positions(&mut self) -> Result<(), BacktestError> {
        while let Some(slug) = self.positions.first().map(|p| p.slug.clone()) {
            self.close_positions(&slug)?;
        }
        Ok(())
    }

    /// Settle or close positions on markets whose final sample hour has
    /// passed.
    pub fn resolve_markets(&mut self) -> Result<(), BacktestError> {
        let index = self.index;
        let mut matured: Vec<&PriceHistory> = Vec::new();
        for position in &self.positions {
            let history = index
                .history(&position.slug)
                .ok_or_else(|| BacktestError::UnknownMarket(position.slug.clone()))?;
            let Some(last) = history.history.last() else {
                continue;
            };
            if self.now >= hour_of(last.timestamp) && !matured.iter().any(|h| h.slug == history.slug) {
                matured.push(history);
            }
        }

        for history in matured {
            match (history.closed, history.outcome) {
                (true, Some(outcome)) => self.settle(&history.slug, outcome),
                _ => {
                    self.close_positions(&history.slug)?;
                }
            }
        }
        Ok(())
    }

    fn settle(&mut self, slug: &str, yes_won: bool) {
        let (settled, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.positions)
            .into_iter()
            .partition(|p| p.slug == slug);
        self.positions = kept;
        for position in settled {
            let payout = if (position.side == OutcomeSide::Yes) == yes_won { 1.0 } else { 0.0 };
            self.cash += position.size * payout;
            let profit = position.size * (payout - position.price);
            tracing::debug!(slug = %slug, side = %position.side, payout = payout, cash = self.cash, "Settled position");
            self.record_trade(&position, profit);
        }
    }

    fn record_trade(&mut self, position: &BacktestPosition, profit: f64) {
        self.trades += 1;
        if let Some(history) = self.index.history(&position.slug) {
            self.performance
                .record(&history.tags, position.opened, position.price, position.size, profit);
        }
        self.recent_trades.push_back(BacktestTrade {
            opened: position.opened,
            slug: position.slug.clone(),
            profit,
        });
        while self.recent_trades.len() > RECENT_TRADES_LIMIT {
            self.recent_trades.pop_front();
        }
    }

    /// Cash plus open positions valued at the bid.
    pub fn net_worth(&self) -> Result<f64, BacktestError> {
        let mut net_worth = self.cash;
        for position in &self.positions {
            let (bid, _) = bid_ask(self.require_price(&position.slug)?, position.side);
            net_worth += position.size * bid;
        }
        Ok(net_worth)
    }

    /// Update drawdown and append the current net worth to the curve.
    pub fn update_stats(&mut self) -> Result<(), BacktestError> {
        let net_worth = self.net_worth()?;
        self.max_net_worth = self.max_net_worth.max(net_worth);
        let drawdown = 1.0 - net_worth / self.max_net_worth;
        self.max_drawdown = self.max_drawdown.max(drawdown);
        self.record_equity(self.now, net_worth);
        Ok(())
    }

    pub fn record_equity(&mut self, timestamp: DateTime<Utc>, cash: f64) {
        self.equity_curve.push(EquityCurveSample { timestamp, cash });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PriceSample;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    fn index(outcome: Option<bool>, prices: &[f64]) -> HistoryIndex {
        HistoryIndex::new(vec![PriceHistory {
            slug: "m".to_string(),
            neg_risk: false,
            closed: outcome.is_some(),
            start_date: None,
            end_date: None,
            volume: 500_000.0,
            outcome,
            tags: vec!["politics".to_string()],
            history: prices
                .iter()
                .enumerate()
                .map(|(i, &price)| PriceSample {
                    timestamp: t0() + Duration::hours(i as i64),
                    price,
                })
                .collect(),
        }])
    }

    #[test]
    fn test_open_uses_ask_and_checks_cash() {
        let index = index(None, &[0.5; 4]);
        let mut book = BacktestPositionBook::new(&index, t0(), 100.0, true);
        assert!(book.open_position("m", OutcomeSide::Yes, 100.0));
        assert!((book.cash() - (100.0 - 51.5)).abs() < 1e-9);
        assert!(!book.open_position("m", OutcomeSide::Yes, 1000.0));
        assert!(!book.open_position("missing", OutcomeSide::Yes, 1.0));
    }

    #[test]
    fn test_close_at_bid() {
        let index = index(None, &[0.5, 0.6, 0.6]);
        let mut book = BacktestPositionBook::new(&index, t0(), 1000.0, true);
        book.open_position("m", OutcomeSide::Yes, 10.0);
        book.advance(Duration::hours(1));
        assert!(book.close_positions("m").unwrap());
        assert!(!book.close_positions("m").unwrap());
        // bought at 0.515, sold at 0.585
        assert!((book.cash() - (1000.0 + 10.0 * 0.07)).abs() < 1e-9);
        assert_eq!(book.trades(), 1);
        assert_eq!(book.recent_trades().count(), 1);
    }

    #[test]
    fn test_resolution_pays_out() {
        let index = index(Some(true), &[0.2, 0.3]);
        let mut book = BacktestPositionBook::new(&index, t0(), 1000.0, true);
        book.open_position("m", OutcomeSide::No, 10.0);
        book.resolve_markets().unwrap();
        assert_eq!(book.positions().len(), 1);
        book.advance(Duration::hours(1));
        book.resolve_markets().unwrap();
        assert!(book.positions().is_empty());
        assert!((book.cash() - (1000.0 - 8.15)).abs() < 1e-9);
        let tags = book.performance().by_tag();
        assert!((tags[0].profit + 8.15).abs() < 1e-9);
    }

    #[test]
    fn test_strict_miss_is_an_error() {
        let index = index(None, &[0.5]);
        let mut book = BacktestPositionBook::new(&index, t0(), 1000.0, true);
        book.open_position("m", OutcomeSide::Yes, 1.0);
        book.advance(Duration::hours(MAX_PRICE_OFFSET_HOURS + 1));
        assert!(matches!(book.net_worth(), Err(BacktestError::MissingPrice { .. })));
    }

    #[test]
    fn test_lenient_miss_uses_latest_sample() {
        let index = index(None, &[0.5]);
        let mut book = BacktestPositionBook::new(&index, t0(), 1000.0, false);
        book.open_position("m", OutcomeSide::Yes, 1.0);
        book.advance(Duration::hours(MAX_PRICE_OFFSET_HOURS + 1));
        assert_eq!(book.require_price("m").unwrap(), 0.5);
    }

    #[test]
    fn test_drawdown_tracks_running_max() {
        let index = index(None, &[0.5, 0.5]);
        let mut book = BacktestPositionBook::new(&index, t0(), 1000.0, true);
        book.open_position("m", OutcomeSide::Yes, 100.0);
        book.update_stats().unwrap();
        // spread paid twice: 100 * 0.03
        assert!((book.max_drawdown() - 0.003).abs() < 1e-9);
        assert_eq!(book.equity_curve().len(), 1);
    }
}
