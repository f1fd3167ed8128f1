//! Rolling window of trade prints per market.

use crate::order::Side;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// A single trade print.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceEvent {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
}

/// Time-bounded FIFO of trade prints.
///
/// Timestamps are assumed non-decreasing. Events older than `retention`
/// relative to the newest event are evicted from the front.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    retention: Duration,
    events: VecDeque<PriceEvent>,
}

impl PriceWindow {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            events: VecDeque::new(),
        }
    }

    /// Append a print. Prices outside the open unit interval are rejected.
    pub fn add(&mut self, event: PriceEvent) -> bool {
        if event.price <= Decimal::ZERO || event.price >= Decimal::ONE {
            tracing::warn!(price = %event.price, "Rejected out-of-range trade price");
            return false;
        }
        self.events.push_back(event);
        let newest = event.timestamp;
        while let Some(front) = self.events.front() {
            if newest - front.timestamp > self.retention {
                self.events.pop_front();
            } else {
                break;
            }
        }
        true
    }

    /// Most recent print.
    pub fn last(&self) -> Option<&PriceEvent> {
        self.events.back()
    }

    /// Earliest print strictly younger than `span` relative to the newest.
    pub fn first_within(&self, span: Duration) -> Option<&PriceEvent> {
        let newest = self.last()?.timestamp;
        self.events.iter().find(|e| newest - e.timestamp < span)
    }

    /// Traded notional (price * size) across the window.
    pub fn volume(&self) -> Decimal {
        self.events.iter().map(|e| e.price * e.size).sum()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceEvent> {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn event(secs: i64, price: Decimal) -> PriceEvent {
        PriceEvent {
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            price,
            size: dec!(10),
            side: Side::Buy,
        }
    }

    #[test]
    fn test_eviction_boundary() {
        let mut window = PriceWindow::new(Duration::seconds(60));
        for secs in [0, 30, 61, 90] {
            assert!(window.add(event(secs, dec!(0.5))));
        }
        let kept: Vec<i64> = window
            .iter()
            .map(|e| e.timestamp.timestamp() - 1_700_000_000)
            .collect();
        // 90 - 30 == 60 is not strictly greater than the retention
        assert_eq!(kept, vec![30, 61, 90]);
    }

    #[test]
    fn test_rejects_prices_outside_unit_interval() {
        let mut window = PriceWindow::new(Duration::seconds(60));
        assert!(!window.add(event(0, dec!(0))));
        assert!(!window.add(event(0, dec!(1))));
        assert!(!window.add(event(0, dec!(1.2))));
        assert!(window.is_empty());
    }

    #[test]
    fn test_first_within() {
        let mut window = PriceWindow::new(Duration::seconds(3600));
        window.add(event(0, dec!(0.40)));
        window.add(event(100, dec!(0.45)));
        window.add(event(200, dec!(0.52)));
        let first = window.first_within(Duration::seconds(150)).unwrap();
        assert_eq!(first.price, dec!(0.45));
        let first = window.first_within(Duration::seconds(1000)).unwrap();
        assert_eq!(first.price, dec!(0.40));
    }

    #[test]
    fn test_volume() {
        let mut window = PriceWindow::new(Duration::seconds(3600));
        window.add(event(0, dec!(0.40)));
        window.add(event(1, dec!(0.60)));
        assert_eq!(window.volume(), dec!(10));
    }
}
