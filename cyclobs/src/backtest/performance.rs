//! Run statistics: per-dimension profit buckets, equity curve and Sharpe
//! ratio.

use super::pricing::{RISK_FREE_RATE, SHARPE_MIN_SAMPLES};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

const MONTHS_PER_YEAR: f64 = 12.0;

/// Net worth at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityCurveSample {
    #[serde(rename = "date")]
    pub timestamp: DateTime<Utc>,
    pub cash: f64,
}

/// Accumulated results for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceBucket<K> {
    pub key: K,
    pub profit: f64,
    pub trades: usize,
    pub returns: Vec<f64>,
}

impl<K> PerformanceBucket<K> {
    fn new(key: K) -> Self {
        Self {
            key,
            profit: 0.0,
            trades: 0,
            returns: Vec::new(),
        }
    }

    /// Average profit per trade.
    pub fn profit_per_trade(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        self.profit / self.trades as f64
    }

    /// Mean return over its sample standard deviation, 0 when undefined.
    pub fn risk_adjusted_return(&self) -> f64 {
        finite_or_zero(mean(&self.returns) / sample_std_dev(&self.returns))
    }
}

fn add<K: Clone + Eq + Hash>(map: &mut HashMap<K, PerformanceBucket<K>>, key: K, profit: f64, ret: f64) {
    let bucket = map
        .entry(key.clone())
        .or_insert_with(|| PerformanceBucket::new(key));
    bucket.profit += profit;
    bucket.trades += 1;
    bucket.returns.push(ret);
}

/// Profit breakdown by tag, 4-hour entry bucket, entry weekday and entry
/// price decile.
#[derive(Debug, Clone, Default)]
pub struct PerformanceTracker {
    tags: HashMap<String, PerformanceBucket<String>>,
    hours: HashMap<u32, PerformanceBucket<u32>>,
    weekdays: HashMap<u32, PerformanceBucket<u32>>,
    prices: HashMap<u32, PerformanceBucket<u32>>,
}

impl PerformanceTracker {
    /// Record a closed trade entered at `entered` for `entry_price`.
    pub fn record(&mut self, tags: &[String], entered: DateTime<Utc>, entry_price: f64, size: f64, profit: f64) {
        let cost = entry_price * size;
        let ret = if cost > 0.0 { profit / cost } else { 0.0 };
        for tag in tags {
            add(&mut self.tags, tag.clone(), profit, ret);
        }
        add(&mut self.hours, entered.hour() / 4, profit, ret);
        add(&mut self.weekdays, entered.weekday().num_days_from_sunday(), profit, ret);
        add(&mut self.prices, (10.0 * entry_price) as u32, profit, ret);
    }

    /// Tag buckets, most traded first.
    pub fn by_tag(&self) -> Vec<PerformanceBucket<String>> {
        let mut buckets: Vec<_> = self.tags.values().cloned().collect();
        buckets.sort_by(|a, b| b.trades.cmp(&a.trades).then_with(|| a.key.cmp(&b.key)));
        buckets
    }

    pub fn by_hour(&self) -> Vec<PerformanceBucket<u32>> {
        sorted_by_key(&self.hours)
    }

    /// Weekday buckets, Sunday = 0.
    pub fn by_weekday(&self) -> Vec<PerformanceBucket<u32>> {
        sorted_by_key(&self.weekdays)
    }

    pub fn by_price(&self) -> Vec<PerformanceBucket<u32>> {
        sorted_by_key(&self.prices)
    }
}

fn sorted_by_key(map: &HashMap<u32, PerformanceBucket<u32>>) -> Vec<PerformanceBucket<u32>> {
    map.iter()
        .map(|(k, v)| (*k, v.clone()))
        .collect::<BTreeMap<_, _>>()
        .into_values()
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with Bessel's correction. NaN below two values.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Relative change from `previous` to `current`.
pub fn rate_of_change(current: f64, previous: f64) -> f64 {
    current / previous - 1.0
}

/// Annualized Sharpe ratio of the monthly returns of `curve`.
///
/// A sample is taken whenever the calendar month changes relative to the
/// last taken sample. Fewer than [`SHARPE_MIN_SAMPLES`] returns, or a
/// non-finite result, yield 0.
pub fn sharpe_ratio(curve: &[EquityCurveSample]) -> f64 {
    let Some((first, rest)) = curve.split_first() else {
        return 0.0;
    };
    let mut previous = first;
    let mut returns = Vec::new();
    for sample in rest {
        let month = (sample.timestamp.year(), sample.timestamp.month());
        if month != (previous.timestamp.year(), previous.timestamp.month()) {
            returns.push(rate_of_change(sample.cash, previous.cash));
            previous = sample;
        }
    }
    if returns.len() < SHARPE_MIN_SAMPLES {
        return 0.0;
    }
    let monthly_rate = (1.0 + RISK_FREE_RATE).powf(1.0 / MONTHS_PER_YEAR) - 1.0;
    let sharpe = (mean(&returns) - monthly_rate) / sample_std_dev(&returns);
    finite_or_zero(MONTHS_PER_YEAR.sqrt() * sharpe)
}

/// First sample of every calendar date.
pub fn daily_equity_curve(curve: &[EquityCurveSample]) -> Vec<EquityCurveSample> {
    let mut daily: Vec<EquityCurveSample> = Vec::new();
    for sample in curve {
        match daily.last() {
            Some(last) if last.timestamp.date_naive() == sample.timestamp.date_naive() => {}
            _ => daily.push(*sample),
        }
    }
    daily
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(year: i32, month: u32, day: u32, cash: f64) -> EquityCurveSample {
        EquityCurveSample {
            timestamp: Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap(),
            cash,
        }
    }

    #[test]
    fn test_sharpe_needs_five_months() {
        let curve: Vec<_> = (1..=5).map(|m| sample(2025, m, 1, 2000.0 + m as f64 * 10.0)).collect();
        assert_eq!(sharpe_ratio(&curve), 0.0);
        assert_eq!(sharpe_ratio(&[]), 0.0);
    }

    #[test]
    fn test_sharpe_zero_variance_is_zero() {
        let curve: Vec<_> = (1..=8).map(|m| sample(2025, m, 1, 2000.0)).collect();
        assert_eq!(sharpe_ratio(&curve), 0.0);
    }

    #[test]
    fn test_sharpe_positive_for_steady_growth() {
        let mut cash = 2000.0;
        let mut curve = Vec::new();
        for m in 1..=12 {
            curve.push(sample(2025, m, 1, cash));
            cash *= if m % 2 == 0 { 1.05 } else { 1.03 };
        }
        let sharpe = sharpe_ratio(&curve);
        assert!(sharpe.is_finite() && sharpe > 0.0);
    }

    #[test]
    fn test_same_month_of_next_year_counts() {
        let curve = vec![
            sample(2024, 1, 1, 100.0),
            sample(2025, 1, 1, 110.0),
            sample(2026, 1, 1, 121.0),
            sample(2027, 1, 1, 133.1),
            sample(2028, 1, 1, 140.0),
            sample(2029, 1, 1, 150.0),
        ];
        assert_ne!(sharpe_ratio(&curve), 0.0);
    }

    #[test]
    fn test_daily_curve_keeps_first_of_day() {
        let curve = vec![
            sample(2025, 1, 1, 1.0),
            EquityCurveSample {
                timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 5, 0, 0).unwrap(),
                cash: 2.0,
            },
            sample(2025, 1, 2, 3.0),
        ];
        let daily = daily_equity_curve(&curve);
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].cash, 1.0);
        assert_eq!(daily[1].cash, 3.0);
    }

    #[test]
    fn test_tracker_keys() {
        let mut tracker = PerformanceTracker::default();
        // Wednesday 2025-01-01 13:00
        let entered = Utc.with_ymd_and_hms(2025, 1, 1, 13, 0, 0).unwrap();
        tracker.record(&["a".to_string(), "b".to_string()], entered, 0.815, 10.0, -8.15);
        tracker.record(&["a".to_string()], entered, 0.5, 10.0, 1.0);

        let tags = tracker.by_tag();
        assert_eq!(tags[0].key, "a");
        assert_eq!(tags[0].trades, 2);
        assert_eq!(tracker.by_hour()[0].key, 3);
        assert_eq!(tracker.by_weekday()[0].key, 3);
        let prices: Vec<_> = tracker.by_price().iter().map(|b| b.key).collect();
        assert_eq!(prices, vec![5, 8]);
        assert!((tags[0].profit_per_trade() - (-3.575)).abs() < 1e-9);
        assert_eq!(tags[1].risk_adjusted_return(), 0.0);
    }
}
