//! Hourly backtest simulator.
//!
//! Replays a [`StrategyPolicy`] over stored hourly price histories:
//!
//! ```text
//! for each hour in [start, end):
//!     strategy.on_tick    open / close positions
//!     resolve_markets     settle markets past their last sample
//!     update_stats        mark to market, drawdown, equity sample
//! close all positions, final equity sample at `end`
//! ```
//!
//! Fills use a synthetic spread around the stored YES price (see
//! [`bid_ask`]). Runs are single threaded and deterministic; sweeps run
//! many of them in parallel.

pub mod book;
pub mod index;
pub mod performance;
pub mod pricing;
pub mod simulator;
pub mod strategy;

pub use book::{BacktestPosition, BacktestPositionBook, BacktestTrade};
pub use index::HistoryIndex;
pub use performance::{daily_equity_curve, sharpe_ratio, EquityCurveSample, PerformanceBucket};
pub use pricing::{bid_ask, OutcomeSide};
pub use simulator::{BacktestResult, BacktestSimulator, SweepResult};
pub use strategy::{DecayParams, JumpParams, MentionParams, StrategyConfig, StrategyPolicy, ThresholdParams};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Backtest errors.
#[derive(Debug, Error)]
pub enum BacktestError {
    /// No price within the look-back window in strict mode
    #[error("No price for {slug} at {at}")]
    MissingPrice { slug: String, at: DateTime<Utc> },

    #[error("Unknown market: {0}")]
    UnknownMarket(String),

    #[error("Worker failed: {0}")]
    Worker(String),
}
