//! Entry and exit trigger evaluation.
//!
//! Entry triggers look at the recent price move inside a [`PriceWindow`];
//! exit triggers (take profit / stop loss) look at each trade print. Every
//! trigger is one-shot: once fired it stays fired.

use crate::order::Side;
use crate::orderbook::OrderBook;
use crate::window::PriceWindow;
use chrono::Duration;
use rust_decimal::Decimal;
use serde::Deserialize;

/// Windowed entry trigger for one market.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TriggerDefinition {
    pub slug: String,
    /// Look-back for the reference price, in seconds
    pub time_span: u64,
    /// Minimum rise from the reference price to the last print
    pub min_delta: Decimal,
    /// Inclusive lower bound for the last price
    pub min_price: Decimal,
    /// Exclusive upper bound for the last price
    pub max_price: Decimal,
    /// Added to the last price to get the order limit
    pub limit_offset: Decimal,
    /// Order size in contracts
    pub size: Decimal,
    /// Order lifetime in seconds, 0 for good-till-cancelled
    #[serde(default)]
    pub expiration: u64,
    /// Half-width of the price band used for the liquidity check
    #[serde(default)]
    pub liquidity_range: Option<Decimal>,
    /// Notional required on each side within the band
    #[serde(default)]
    pub min_liquidity: Option<Decimal>,
}

impl TriggerDefinition {
    fn span(&self) -> Duration {
        Duration::seconds(self.time_span as i64)
    }
}

/// One-shot trigger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    #[default]
    Armed,
    Fired,
}

/// A definition that passed every check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerMatch {
    /// Index into the evaluator's definitions
    pub index: usize,
    pub first_price: Decimal,
    pub last_price: Decimal,
    pub delta: Decimal,
}

/// Why a definition did not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InsufficientHistory,
    DeltaTooSmall,
    OutsidePriceBand,
    Illiquid,
    InvalidBook,
}

/// Evaluates the entry triggers configured for one market.
#[derive(Debug, Clone, Default)]
pub struct TriggerEvaluator {
    definitions: Vec<TriggerDefinition>,
    states: Vec<TriggerState>,
}

impl TriggerEvaluator {
    pub fn new(definitions: Vec<TriggerDefinition>) -> Self {
        let states = vec![TriggerState::Armed; definitions.len()];
        Self { definitions, states }
    }

    pub fn definitions(&self) -> &[TriggerDefinition] {
        &self.definitions
    }

    pub fn state(&self, index: usize) -> Option<TriggerState> {
        self.states.get(index).copied()
    }

    /// True once every definition has fired.
    pub fn is_exhausted(&self) -> bool {
        self.states.iter().all(|s| *s == TriggerState::Fired)
    }

    /// Find the first armed definition whose conditions hold.
    ///
    /// Does not change state; the caller fires the match with
    /// [`TriggerEvaluator::mark_fired`].
    pub fn evaluate(&self, window: &PriceWindow, book: &OrderBook) -> Option<TriggerMatch> {
        for (index, definition) in self.definitions.iter().enumerate() {
            if self.states[index] == TriggerState::Fired {
                continue;
            }
            match check(definition, window, book) {
                Ok((first_price, last_price)) => {
                    return Some(TriggerMatch {
                        index,
                        first_price,
                        last_price,
                        delta: last_price - first_price,
                    });
                }
                Err(reason) => {
                    tracing::debug!(slug = %definition.slug, reason = ?reason, "Trigger skipped");
                }
            }
        }
        None
    }

    /// Transition a definition from armed to fired. Returns false if it
    /// had already fired or does not exist.
    pub fn mark_fired(&mut self, index: usize) -> bool {
        match self.states.get_mut(index) {
            Some(state @ TriggerState::Armed) => {
                *state = TriggerState::Fired;
                true
            }
            Some(TriggerState::Fired) => {
                tracing::error!(index, "Trigger fired twice");
                false
            }
            None => {
                tracing::error!(index, "Fired a trigger that does not exist");
                false
            }
        }
    }
}

fn check(
    definition: &TriggerDefinition,
    window: &PriceWindow,
    book: &OrderBook,
) -> Result<(Decimal, Decimal), SkipReason> {
    if window.len() < 2 {
        return Err(SkipReason::InsufficientHistory);
    }
    let last = window.last().ok_or(SkipReason::InsufficientHistory)?;
    let first = window
        .first_within(definition.span())
        .ok_or(SkipReason::InsufficientHistory)?;
    let delta = last.price - first.price;
    if delta < definition.min_delta {
        return Err(SkipReason::DeltaTooSmall);
    }
    if last.price < definition.min_price || last.price >= definition.max_price {
        return Err(SkipReason::OutsidePriceBand);
    }
    if let (Some(range), Some(min_liquidity)) = (definition.liquidity_range, definition.min_liquidity) {
        let (bids, asks) = book.liquidity_near(last.price, range);
        if bids < min_liquidity || asks < min_liquidity {
            return Err(SkipReason::Illiquid);
        }
    }
    if !book.validate() {
        return Err(SkipReason::InvalidBook);
    }
    Ok((first.price, last.price))
}

/// Take-profit / stop-loss levels for a held position.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExitTrigger {
    pub slug: String,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub take_profit_limit: Option<Decimal>,
    pub stop_loss: Decimal,
    pub stop_loss_limit: Decimal,
}

/// Which exit level a print crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    TakeProfit,
    StopLoss,
}

/// Exit decision with the limit to sell at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitSignal {
    pub kind: ExitKind,
    pub limit: Decimal,
}

impl ExitTrigger {
    /// Check a trade print against the exit levels.
    ///
    /// Take profit fires on a buy print at or above the level; stop loss
    /// on a sell print at or below it.
    pub fn evaluate(&self, price: Decimal, side: Side) -> Option<ExitSignal> {
        match side {
            Side::Buy => match (self.take_profit, self.take_profit_limit) {
                (Some(level), Some(limit)) if price >= level => Some(ExitSignal {
                    kind: ExitKind::TakeProfit,
                    limit,
                }),
                _ => None,
            },
            Side::Sell if price <= self.stop_loss => Some(ExitSignal {
                kind: ExitKind::StopLoss,
                limit: self.stop_loss_limit,
            }),
            Side::Sell => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::Level;
    use crate::window::PriceEvent;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn definition() -> TriggerDefinition {
        TriggerDefinition {
            slug: "test-market".to_string(),
            time_span: 600,
            min_delta: dec!(0.05),
            min_price: dec!(0.50),
            max_price: dec!(0.90),
            limit_offset: dec!(0.01),
            size: dec!(10),
            expiration: 300,
            liquidity_range: None,
            min_liquidity: None,
        }
    }

    fn book() -> OrderBook {
        let mut book = OrderBook::new();
        book.apply_snapshot(
            &[Level::new(dec!(0.58), dec!(1000))],
            &[Level::new(dec!(0.60), dec!(1000))],
        );
        book
    }

    fn window(prices: &[(i64, Decimal)]) -> PriceWindow {
        let mut window = PriceWindow::new(Duration::seconds(3600));
        for (secs, price) in prices {
            window.add(PriceEvent {
                timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
                price: *price,
                size: dec!(5),
                side: Side::Buy,
            });
        }
        window
    }

    #[test]
    fn test_matches_on_rise() {
        let evaluator = TriggerEvaluator::new(vec![definition()]);
        let w = window(&[(0, dec!(0.50)), (300, dec!(0.59))]);
        let m = evaluator.evaluate(&w, &book()).unwrap();
        assert_eq!(m.index, 0);
        assert_eq!(m.delta, dec!(0.09));
    }

    #[test]
    fn test_reference_price_respects_span() {
        let evaluator = TriggerEvaluator::new(vec![definition()]);
        // The 0.40 print is older than the 600s span, so the reference is 0.57
        let w = window(&[(0, dec!(0.40)), (700, dec!(0.57)), (800, dec!(0.59))]);
        assert!(evaluator.evaluate(&w, &book()).is_none());
    }

    #[test]
    fn test_insufficient_history() {
        let evaluator = TriggerEvaluator::new(vec![definition()]);
        let w = window(&[(0, dec!(0.59))]);
        assert!(evaluator.evaluate(&w, &book()).is_none());
    }

    #[test]
    fn test_price_band_is_half_open() {
        let mut def = definition();
        def.max_price = dec!(0.59);
        let evaluator = TriggerEvaluator::new(vec![def]);
        let w = window(&[(0, dec!(0.50)), (10, dec!(0.59))]);
        assert!(evaluator.evaluate(&w, &book()).is_none());
    }

    #[test]
    fn test_liquidity_check() {
        let mut def = definition();
        def.liquidity_range = Some(dec!(0.02));
        def.min_liquidity = Some(dec!(700));
        let evaluator = TriggerEvaluator::new(vec![def.clone()]);
        let w = window(&[(0, dec!(0.50)), (10, dec!(0.59))]);
        // 0.58 * 1000 = 580 on the bid side
        assert!(evaluator.evaluate(&w, &book()).is_none());

        def.min_liquidity = Some(dec!(500));
        let evaluator = TriggerEvaluator::new(vec![def]);
        assert!(evaluator.evaluate(&w, &book()).is_some());
    }

    #[test]
    fn test_requires_valid_book() {
        let evaluator = TriggerEvaluator::new(vec![definition()]);
        let w = window(&[(0, dec!(0.50)), (10, dec!(0.59))]);
        assert!(evaluator.evaluate(&w, &OrderBook::new()).is_none());
    }

    #[test]
    fn test_one_shot() {
        let mut second = definition();
        second.min_delta = dec!(0.01);
        let mut evaluator = TriggerEvaluator::new(vec![definition(), second]);
        let w = window(&[(0, dec!(0.50)), (10, dec!(0.59))]);

        let m = evaluator.evaluate(&w, &book()).unwrap();
        assert_eq!(m.index, 0);
        assert!(evaluator.mark_fired(0));
        assert!(!evaluator.mark_fired(0));

        let m = evaluator.evaluate(&w, &book()).unwrap();
        assert_eq!(m.index, 1);
        assert!(evaluator.mark_fired(1));
        assert!(evaluator.is_exhausted());
        assert!(evaluator.evaluate(&w, &book()).is_none());
    }

    #[test]
    fn test_exit_take_profit_on_buy_print() {
        let exit = ExitTrigger {
            slug: "x".to_string(),
            take_profit: Some(dec!(0.80)),
            take_profit_limit: Some(dec!(0.78)),
            stop_loss: dec!(0.30),
            stop_loss_limit: dec!(0.28),
        };
        assert_eq!(
            exit.evaluate(dec!(0.81), Side::Buy),
            Some(ExitSignal { kind: ExitKind::TakeProfit, limit: dec!(0.78) })
        );
        assert_eq!(exit.evaluate(dec!(0.81), Side::Sell), None);
        assert_eq!(exit.evaluate(dec!(0.79), Side::Buy), None);
    }

    #[test]
    fn test_exit_stop_loss_on_sell_print() {
        let exit = ExitTrigger {
            slug: "x".to_string(),
            take_profit: None,
            take_profit_limit: None,
            stop_loss: dec!(0.30),
            stop_loss_limit: dec!(0.28),
        };
        assert_eq!(
            exit.evaluate(dec!(0.30), Side::Sell),
            Some(ExitSignal { kind: ExitKind::StopLoss, limit: dec!(0.28) })
        );
        assert_eq!(exit.evaluate(dec!(0.99), Side::Buy), None);
        assert_eq!(exit.evaluate(dec!(0.20), Side::Buy), None);
    }
}
