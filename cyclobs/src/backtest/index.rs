//! Lookup structures over stored price histories.

use super::pricing::MIN_VOLUME;
use crate::store::{HistoryStore, PriceHistory, PriceSample, StoreError};
use chrono::{DateTime, DurationRound, NaiveDate, TimeDelta, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Truncate to the start of the hour.
pub fn hour_of(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(TimeDelta::hours(1))
        .unwrap_or(timestamp)
}

/// Read-only price data shared by every run.
#[derive(Debug, Default)]
pub struct HistoryIndex {
    histories: HashMap<String, PriceHistory>,
    daily: BTreeMap<NaiveDate, BTreeSet<String>>,
    prices: HashMap<String, BTreeMap<DateTime<Utc>, f64>>,
}

impl HistoryIndex {
    pub fn new(histories: Vec<PriceHistory>) -> Self {
        let mut index = Self::default();
        for history in histories {
            let prices = index.prices.entry(history.slug.clone()).or_default();
            for sample in &history.history {
                index
                    .daily
                    .entry(sample.timestamp.date_naive())
                    .or_default()
                    .insert(history.slug.clone());
                prices.insert(hour_of(sample.timestamp), sample.price);
            }
            index.histories.insert(history.slug.clone(), history);
        }
        index
    }

    /// Load the non negative-risk histories above the volume floor.
    pub fn load(store: &HistoryStore) -> Result<Self, StoreError> {
        let histories = store.load(false, MIN_VOLUME)?;
        tracing::info!(markets = histories.len(), "Loaded price histories");
        Ok(Self::new(histories))
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    pub fn history(&self, slug: &str) -> Option<&PriceHistory> {
        self.histories.get(slug)
    }

    /// Markets with a sample on `date` carrying any of `tags` (all markets
    /// when `tags` is empty), in slug order.
    pub fn markets_on(&self, date: NaiveDate, tags: &[String]) -> Vec<&PriceHistory> {
        let Some(slugs) = self.daily.get(&date) else {
            return Vec::new();
        };
        slugs
            .iter()
            .filter_map(|slug| self.histories.get(slug))
            .filter(|h| tags.is_empty() || h.tags.iter().any(|t| tags.contains(t)))
            .collect()
    }

    /// Price recorded for the hour `at`.
    pub fn price_at_hour(&self, slug: &str, at: DateTime<Utc>) -> Option<f64> {
        self.prices.get(slug)?.get(&at).copied()
    }

    /// Latest sample at or before `now`, or the first sample when the
    /// history starts later.
    pub fn latest_sample(&self, slug: &str, now: DateTime<Utc>) -> Option<PriceSample> {
        let history = self.histories.get(slug)?;
        history
            .history
            .iter()
            .rev()
            .find(|s| s.timestamp <= now)
            .or_else(|| history.history.first())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: i64, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, m, 0).unwrap() + TimeDelta::hours(h)
    }

    fn history(slug: &str, tags: &[&str], samples: &[(DateTime<Utc>, f64)]) -> PriceHistory {
        PriceHistory {
            slug: slug.to_string(),
            neg_risk: false,
            closed: true,
            start_date: None,
            end_date: None,
            volume: 200_000.0,
            outcome: Some(true),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            history: samples
                .iter()
                .map(|&(timestamp, price)| PriceSample { timestamp, price })
                .collect(),
        }
    }

    #[test]
    fn test_last_sample_in_hour_wins() {
        let index = HistoryIndex::new(vec![history("a", &[], &[(at(1, 5), 0.4), (at(1, 40), 0.45)])]);
        assert_eq!(index.price_at_hour("a", at(1, 0)), Some(0.45));
        assert_eq!(index.price_at_hour("a", at(2, 0)), None);
    }

    #[test]
    fn test_markets_on_date_sorted_and_filtered() {
        let index = HistoryIndex::new(vec![
            history("zeta", &["politics"], &[(at(0, 0), 0.5)]),
            history("alpha", &["sports"], &[(at(0, 0), 0.5)]),
            history("mid", &["politics"], &[(at(30, 0), 0.5)]),
        ]);
        let day = at(0, 0).date_naive();
        let all: Vec<_> = index.markets_on(day, &[]).iter().map(|h| h.slug.as_str()).collect();
        assert_eq!(all, vec!["alpha", "zeta"]);
        let politics: Vec<_> = index
            .markets_on(day, &["politics".to_string()])
            .iter()
            .map(|h| h.slug.as_str())
            .collect();
        assert_eq!(politics, vec!["zeta"]);
    }

    #[test]
    fn test_latest_sample() {
        let index = HistoryIndex::new(vec![history("a", &[], &[(at(5, 0), 0.3), (at(8, 0), 0.6)])]);
        assert_eq!(index.latest_sample("a", at(9, 0)).map(|s| s.price), Some(0.6));
        assert_eq!(index.latest_sample("a", at(6, 0)).map(|s| s.price), Some(0.3));
        assert_eq!(index.latest_sample("a", at(1, 0)).map(|s| s.price), Some(0.3));
        assert!(index.latest_sample("b", at(1, 0)).is_none());
    }
}
