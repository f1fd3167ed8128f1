//! Jump alerts.
//!
//! Watches the YES price of each subscribed market over the last hour and
//! alerts once when it jumps from at or below `threshold1` into
//! `[threshold2, threshold3)`. No orders are placed.

use crate::config::JumpConfig;
use crate::discovery::SubscribedMarket;
use crate::feed::{parse_timestamp, FeedMessage, LastTradeEvent, PriceChangeEvent};
use crate::order::Side;
use crate::orderbook::OrderBook;
use crate::processor::{FeedHandler, OrderIntent};
use crate::window::{PriceEvent, PriceWindow};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug)]
struct JumpState {
    slug: String,
    asset_id: String,
    window: PriceWindow,
    spread: Option<Decimal>,
    alerted: bool,
}

/// A detected jump.
#[derive(Debug, Clone, PartialEq)]
pub struct JumpAlert {
    pub slug: String,
    pub first_price: Decimal,
    pub price: Decimal,
    pub spread: Option<Decimal>,
}

/// Alerting feed handler for jump mode.
pub struct JumpDetector {
    threshold1: Decimal,
    threshold2: Decimal,
    threshold3: Decimal,
    states: HashMap<String, JumpState>,
    alerts: Vec<JumpAlert>,
}

impl JumpDetector {
    pub fn new(config: &JumpConfig) -> Self {
        Self {
            threshold1: config.threshold1,
            threshold2: config.threshold2,
            threshold3: config.threshold3,
            states: HashMap::new(),
            alerts: Vec::new(),
        }
    }

    /// Alerts raised so far, oldest first.
    pub fn alerts(&self) -> &[JumpAlert] {
        &self.alerts
    }

    /// Last known spread of a market.
    pub fn spread(&self, condition_id: &str) -> Option<Decimal> {
        self.states.get(condition_id)?.spread
    }

    fn on_price_change(&mut self, event: &PriceChangeEvent) {
        let Some(state) = self.states.get_mut(&event.market) else {
            tracing::warn!(market = %event.market, "Event for unknown market");
            return;
        };
        for change in event.all_changes() {
            if change.asset_id.as_deref() != Some(state.asset_id.as_str()) {
                continue;
            }
            if let Some((bid, ask)) = change.best_prices() {
                state.spread = Some(ask - bid);
            }
        }
    }

    fn on_last_trade(&mut self, event: &LastTradeEvent, now: DateTime<Utc>) {
        let Some(state) = self.states.get_mut(&event.market) else {
            tracing::warn!(market = %event.market, "Event for unknown market");
            return;
        };
        if event.asset_id != state.asset_id {
            return;
        }
        let (Ok(price), Ok(size)) = (event.price.parse::<Decimal>(), event.size.parse::<Decimal>()) else {
            tracing::warn!(slug = %state.slug, price = %event.price, "Unparseable trade print");
            return;
        };
        let added = state.window.add(PriceEvent {
            timestamp: parse_timestamp(&event.timestamp).unwrap_or(now),
            price,
            size,
            side: Side::parse(&event.side).unwrap_or(Side::Buy),
        });
        if !added {
            return;
        }
        let Some(first) = state.window.iter().next().map(|e| e.price) else {
            return;
        };
        if first > self.threshold1 || price < self.threshold2 || price >= self.threshold3 {
            return;
        }
        let spread = state.spread.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        if state.alerted {
            tracing::info!(slug = %state.slug, first = %first, price = %price, spread = %spread, "In range");
            return;
        }
        state.alerted = true;
        tracing::warn!(slug = %state.slug, first = %first, price = %price, spread = %spread, "Jump detected");
        self.alerts.push(JumpAlert {
            slug: state.slug.clone(),
            first_price: first,
            price,
            spread: state.spread,
        });
    }
}

impl FeedHandler for JumpDetector {
    fn subscribe(&mut self, markets: &[SubscribedMarket]) {
        let mut previous = std::mem::take(&mut self.states);
        for subscribed in markets {
            let condition_id = subscribed.market.condition_id.clone();
            let state = previous.remove(&condition_id).unwrap_or_else(|| JumpState {
                slug: subscribed.market.slug.clone(),
                asset_id: subscribed.asset_id.clone(),
                window: PriceWindow::new(Duration::hours(1)),
                spread: None,
                alerted: false,
            });
            self.states.insert(condition_id, state);
        }
    }

    fn handle(&mut self, message: &FeedMessage, now: DateTime<Utc>, _open_positions: usize) -> Vec<OrderIntent> {
        match message {
            FeedMessage::PriceChange(event) => self.on_price_change(event),
            FeedMessage::LastTradePrice(event) => self.on_last_trade(event, now),
            FeedMessage::Book(_) | FeedMessage::Unknown => {}
        }
        Vec::new()
    }

    fn book(&self, _condition_id: &str) -> Option<&OrderBook> {
        None
    }
}
