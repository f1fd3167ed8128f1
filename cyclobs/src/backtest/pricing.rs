//! Synthetic fill pricing and simulation constants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Starting cash of every run.
pub const INITIAL_CASH: f64 = 2000.0;
/// Lowest fill price.
pub const PRICE_FLOOR: f64 = 0.001;
/// Highest fill price.
pub const PRICE_CEILING: f64 = 0.999;
/// Hours searched backwards for a price.
pub const MAX_PRICE_OFFSET_HOURS: i64 = 10 * 24;
/// Annual risk-free rate used by the Sharpe ratio.
pub const RISK_FREE_RATE: f64 = 0.045;
/// Monthly returns required for a Sharpe ratio.
pub const SHARPE_MIN_SAMPLES: usize = 5;
/// Multiplier applied to the base spread.
pub const SPREAD_FACTOR: f64 = 1.5;
/// Volume floor for histories loaded into a run.
pub const MIN_VOLUME: f64 = 100_000.0;
/// Closed trades kept for the summary.
pub const RECENT_TRADES_LIMIT: usize = 10;

const BASE_SPREAD: f64 = 0.01;
const TIGHT_SPREAD: f64 = 0.001;
const TIGHT_SPREAD_LOW: f64 = 0.06;
const TIGHT_SPREAD_HIGH: f64 = 0.94;

/// Outcome held by a simulated position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeSide {
    Yes,
    No,
}

impl OutcomeSide {
    /// Price of this outcome given the YES price.
    pub fn convert(&self, yes_price: f64) -> f64 {
        match self {
            OutcomeSide::Yes => yes_price,
            OutcomeSide::No => 1.0 - yes_price,
        }
    }
}

impl fmt::Display for OutcomeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeSide::Yes => write!(f, "yes"),
            OutcomeSide::No => write!(f, "no"),
        }
    }
}

fn normalize(price: f64) -> f64 {
    price.clamp(PRICE_FLOOR, PRICE_CEILING)
}

/// Synthetic bid and ask for `side` around the raw YES probability `price`.
/// The spread tightens at or beyond 0.06 / 0.94.
pub fn bid_ask(price: f64, side: OutcomeSide) -> (f64, f64) {
    let price = price.clamp(0.0, 1.0);
    let base = if price <= TIGHT_SPREAD_LOW || price >= TIGHT_SPREAD_HIGH {
        TIGHT_SPREAD
    } else {
        BASE_SPREAD
    };
    let spread = base * SPREAD_FACTOR;
    let price = side.convert(price);
    (normalize(price - spread), normalize(price + spread))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_mid_range_spread() {
        for p in [0.07, 0.2, 0.5, 0.8, 0.93] {
            for side in [OutcomeSide::Yes, OutcomeSide::No] {
                let (bid, ask) = bid_ask(p, side);
                assert!(close(ask - bid, 2.0 * 0.01 * 1.5), "p={} side={}", p, side);
            }
        }
    }

    #[test]
    fn test_tight_spread_at_extremes() {
        for p in [0.03, 0.06, 0.94, 0.97] {
            let (bid, ask) = bid_ask(p, OutcomeSide::Yes);
            assert!(close(ask - bid, 2.0 * 0.001 * 1.5), "p={}", p);
        }
    }

    #[test]
    fn test_no_side_mirrors_price() {
        let (bid, ask) = bid_ask(0.2, OutcomeSide::No);
        assert!(close(bid, 0.785));
        assert!(close(ask, 0.815));
    }

    #[test]
    fn test_clamped_to_bounds() {
        let (bid, ask) = bid_ask(1.0, OutcomeSide::Yes);
        assert!(close(bid, 0.9985));
        assert!(close(ask, PRICE_CEILING));
        let (bid, _) = bid_ask(0.0, OutcomeSide::Yes);
        assert!(close(bid, PRICE_FLOOR));
    }

    #[test]
    fn test_side_serde() {
        assert_eq!(serde_json::to_string(&OutcomeSide::No).unwrap(), "\"no\"");
        let side: OutcomeSide = serde_json::from_str("\"yes\"").unwrap();
        assert_eq!(side, OutcomeSide::Yes);
    }
}
