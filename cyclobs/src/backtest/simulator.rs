//! Hour-stepped replay loop and parameter sweeps.

use super::book::{BacktestPositionBook, BacktestTrade};
use super::index::HistoryIndex;
use super::performance::{rate_of_change, sharpe_ratio, EquityCurveSample, PerformanceBucket};
use super::pricing::INITIAL_CASH;
use super::strategy::{DecayParams, StrategyConfig, StrategyPolicy};
use super::BacktestError;
use chrono::{DateTime, Duration, Utc, Weekday};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Price bands per tag in a decay sweep.
const SWEEP_STEPS: usize = 10;
const SWEEP_POSITION_SIZE: f64 = 20.0;
const SWEEP_HOLDING_HOURS: i64 = 7 * 24;
/// Tag rows shown in the summary.
const MAX_TAG_ROWS: usize = 25;

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub strategy: &'static str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cash: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub trades: usize,
    pub equity_curve: Vec<EquityCurveSample>,
    pub tag_performance: Vec<PerformanceBucket<String>>,
    pub hour_performance: Vec<PerformanceBucket<u32>>,
    pub weekday_performance: Vec<PerformanceBucket<u32>>,
    pub price_performance: Vec<PerformanceBucket<u32>>,
    pub recent_trades: Vec<BacktestTrade>,
}

/// Sharpe ratio of one sweep cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
    pub tag: String,
    pub parameter: String,
    pub sharpe_ratio: f64,
}

/// Deterministic replay of a strategy over `[start, end)`.
#[derive(Debug, Clone)]
pub struct BacktestSimulator {
    index: Arc<HistoryIndex>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    strict: bool,
}

impl BacktestSimulator {
    pub fn new(index: Arc<HistoryIndex>, start: DateTime<Utc>, end: DateTime<Utc>, strict: bool) -> Self {
        Self {
            index,
            start,
            end,
            strict,
        }
    }

    /// Run `policy` to completion.
    pub fn run(&self, policy: &mut StrategyPolicy) -> Result<BacktestResult, BacktestError> {
        let mut book = BacktestPositionBook::new(&self.index, self.start, INITIAL_CASH, self.strict);
        let first_day = self.start.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();
        book.record_equity(first_day, INITIAL_CASH);

        while book.now() < self.end {
            policy.on_tick(&mut book)?;
            book.resolve_markets()?;
            book.update_stats()?;
            book.advance(Duration::hours(1));
        }
        book.close_all_positions()?;
        book.record_equity(self.end, book.cash());

        let performance = book.performance();
        Ok(BacktestResult {
            strategy: policy.name(),
            start: self.start,
            end: self.end,
            cash: book.cash(),
            total_return: rate_of_change(book.cash(), INITIAL_CASH),
            max_drawdown: book.max_drawdown(),
            sharpe_ratio: sharpe_ratio(book.equity_curve()),
            trades: book.trades(),
            equity_curve: book.equity_curve().to_vec(),
            tag_performance: performance.by_tag(),
            hour_performance: performance.by_hour(),
            weekday_performance: performance.by_weekday(),
            price_performance: performance.by_price(),
            recent_trades: book.recent_trades().cloned().collect(),
        })
    }

    /// Run every policy on the blocking pool, at most one per available
    /// core at a time. Results come back in input order.
    pub async fn run_parallel(
        self: Arc<Self>,
        policies: Vec<StrategyPolicy>,
    ) -> Vec<Result<BacktestResult, BacktestError>> {
        let workers = std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4);
        let semaphore = Arc::new(Semaphore::new(workers));
        tracing::info!(runs = policies.len(), workers = workers, "Starting parallel backtests");

        let futures = policies.into_iter().map(|mut policy| {
            let simulator = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| BacktestError::Worker(e.to_string()))?;
                tokio::task::spawn_blocking(move || simulator.run(&mut policy))
                    .await
                    .map_err(|e| BacktestError::Worker(e.to_string()))?
            }
        });
        join_all(futures).await
    }

    /// Decay strategy over ten YES price bands for each tag.
    pub async fn decay_sweep(self: Arc<Self>, tags: &[String]) -> Result<Vec<SweepResult>, BacktestError> {
        let mut cells = Vec::new();
        let mut policies = Vec::new();
        for tag in tags {
            for step in 0..SWEEP_STEPS {
                let min_price = step as f64 / SWEEP_STEPS as f64;
                let max_price = (step + 1) as f64 / SWEEP_STEPS as f64;
                cells.push((tag.clone(), format!("{:.1} - {:.1}", min_price, max_price)));
                policies.push(StrategyPolicy::from(StrategyConfig::Decay(DecayParams {
                    tags: vec![tag.clone()],
                    min_price,
                    max_price,
                    position_size: SWEEP_POSITION_SIZE,
                    holding_hours: SWEEP_HOLDING_HOURS,
                    price_range_check: false,
                })));
            }
        }

        let started = std::time::Instant::now();
        let results = self.run_parallel(policies).await;
        tracing::info!(elapsed_secs = started.elapsed().as_secs_f64(), "Sweep finished");

        cells
            .into_iter()
            .zip(results)
            .map(|((tag, parameter), result)| {
                Ok(SweepResult {
                    tag,
                    parameter,
                    sharpe_ratio: result?.sharpe_ratio,
                })
            })
            .collect()
    }
}

fn weekday_name(day: u32) -> String {
    match day {
        0 => Weekday::Sun,
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        _ => Weekday::Sat,
    }
    .to_string()
}

fn money(value: f64) -> String {
    if value < 0.0 {
        format!("-${:.2}", -value)
    } else {
        format!("${:.2}", value)
    }
}

impl fmt::Display for BacktestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Backtest ({})", self.strategy)?;
        writeln!(f, "\tStart: {}", self.start.format("%Y-%m-%d"))?;
        writeln!(f, "\tEnd: {}", self.end.format("%Y-%m-%d"))?;
        writeln!(f, "\tCash: {}", money(self.cash))?;
        writeln!(f, "\tTotal return: {:+.1}%", 100.0 * self.total_return)?;
        writeln!(f, "\tMax drawdown: {:.2}%", 100.0 * self.max_drawdown)?;
        writeln!(f, "\tSharpe ratio: {:.2}", self.sharpe_ratio)?;
        writeln!(f, "\tTrades: {}", self.trades)?;

        if !self.tag_performance.is_empty() {
            writeln!(f, "\n\tProfit by tag:")?;
            for (i, bucket) in self.tag_performance.iter().take(MAX_TAG_ROWS).enumerate() {
                writeln!(f, "\t\t{}. {}: {} ({} trades)", i + 1, bucket.key, money(bucket.profit), bucket.trades)?;
            }
        }
        if !self.hour_performance.is_empty() {
            writeln!(f, "\n\tProfit by hour:")?;
            for bucket in &self.hour_performance {
                writeln!(
                    f,
                    "\t\t{:02}:00 - {:02}:00: {:.2} RAR, {}/trade, {} trades",
                    4 * bucket.key,
                    4 * (bucket.key + 1),
                    bucket.risk_adjusted_return(),
                    money(bucket.profit_per_trade()),
                    bucket.trades
                )?;
            }
        }
        if !self.weekday_performance.is_empty() {
            writeln!(f, "\n\tProfit by weekday:")?;
            for bucket in &self.weekday_performance {
                writeln!(
                    f,
                    "\t\t{}: {:.2} RAR, {}/trade, {} trades",
                    weekday_name(bucket.key),
                    bucket.risk_adjusted_return(),
                    money(bucket.profit_per_trade()),
                    bucket.trades
                )?;
            }
        }
        if !self.price_performance.is_empty() {
            writeln!(f, "\n\tProfit by initial price:")?;
            for bucket in &self.price_performance {
                writeln!(
                    f,
                    "\t\t{:.1} - {:.1}: {:.2} RAR, {}/trade, {} trades",
                    bucket.key as f64 / 10.0,
                    (bucket.key + 1) as f64 / 10.0,
                    bucket.risk_adjusted_return(),
                    money(bucket.profit_per_trade()),
                    bucket.trades
                )?;
            }
        }
        if !self.recent_trades.is_empty() {
            writeln!(f, "\n\tRecent trades:")?;
            for trade in &self.recent_trades {
                writeln!(
                    f,
                    "\t\t{} {}: {}",
                    trade.opened.format("%Y-%m-%d %H:%M"),
                    trade.slug,
                    money(trade.profit)
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::pricing::OutcomeSide;
    use crate::backtest::strategy::ThresholdParams;
    use crate::store::{PriceHistory, PriceSample};
    use chrono::TimeZone;

    #[test]
    fn test_money_and_weekday() {
        assert_eq!(money(-8.15), "-$8.15");
        assert_eq!(money(2000.0), "$2000.00");
        assert_eq!(weekday_name(0), "Sun");
        assert_eq!(weekday_name(6), "Sat");
    }

    #[test]
    fn test_summary_lists_trades() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let history = PriceHistory {
            slug: "m".to_string(),
            neg_risk: false,
            closed: true,
            start_date: Some(start),
            end_date: None,
            volume: 250_000.0,
            outcome: Some(true),
            tags: vec!["politics".to_string()],
            history: (0..4)
                .map(|h| PriceSample {
                    timestamp: start + Duration::hours(h),
                    price: 0.2,
                })
                .collect(),
        };
        let simulator = BacktestSimulator::new(
            Arc::new(HistoryIndex::new(vec![history])),
            start,
            start + Duration::days(1),
            true,
        );
        let mut policy = StrategyPolicy::from(StrategyConfig::Threshold(ThresholdParams {
            tags: Vec::new(),
            threshold: 0.5,
            greater_than: false,
            position_size: 8.0,
            side: OutcomeSide::No,
        }));
        let summary = simulator.run(&mut policy).unwrap().to_string();
        assert!(summary.starts_with("Backtest (threshold)"));
        assert!(summary.contains("Trades: 1"));
        assert!(summary.contains("1. politics: -$8.15 (1 trades)"));
        assert!(summary.contains("2025-03-01 00:00 m: -$8.15"));
    }
}
