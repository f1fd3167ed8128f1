//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use cyclobs::discovery::SubscribedMarket;
use cyclobs::gamma::ApiError;
use cyclobs::order::{OrderError, OrderRequest, OrderSubmitter};
use cyclobs::orderbook::{Level, OrderBook};
use cyclobs::position::{Position, PositionSource};
use cyclobs::store::{PriceHistory, PriceSample};
use cyclobs::Market;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Mutex;

pub const CONDITION_ID: &str = "0xcondition";
pub const YES_ASSET: &str = "1001";
pub const NO_ASSET: &str = "1002";

/// Fixed wall clock for feed events.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

/// Create an order book with a single bid and ask level.
pub fn create_order_book(best_bid: Decimal, best_ask: Decimal) -> OrderBook {
    let mut book = OrderBook::new();
    book.apply_snapshot(&[Level::new(best_bid, dec!(100))], &[Level::new(best_ask, dec!(100))]);
    book
}

/// Create the test market with the fixture condition and asset ids.
pub fn create_market(slug: &str) -> Market {
    Market {
        slug: slug.to_string(),
        condition_id: CONDITION_ID.to_string(),
        yes_asset_id: YES_ASSET.to_string(),
        no_asset_id: NO_ASSET.to_string(),
        neg_risk: false,
        tags: vec!["politics".to_string()],
        active: true,
        closed: false,
        volume_24hr: 50_000.0,
    }
}

/// Subscribe to the YES token of the test market, optionally holding a
/// position.
pub fn create_subscription(slug: &str, position_size: Option<Decimal>) -> SubscribedMarket {
    SubscribedMarket {
        position_size,
        ..SubscribedMarket::yes(create_market(slug))
    }
}

/// `book` frame for the YES token with `(price, size)` levels.
pub fn book_frame(bids: &[(&str, &str)], asks: &[(&str, &str)]) -> String {
    let levels = |levels: &[(&str, &str)]| {
        levels
            .iter()
            .map(|(price, size)| json!({"price": price, "size": size}))
            .collect::<Vec<_>>()
    };
    json!({
        "event_type": "book",
        "market": CONDITION_ID,
        "asset_id": YES_ASSET,
        "timestamp": base_time().timestamp_millis().to_string(),
        "bids": levels(bids),
        "asks": levels(asks),
    })
    .to_string()
}

/// `last_trade_price` frame for the YES token, `offset_secs` after
/// [`base_time`].
pub fn trade_frame(price: &str, side: &str, offset_secs: i64) -> String {
    let timestamp = base_time() + Duration::seconds(offset_secs);
    json!({
        "event_type": "last_trade_price",
        "market": CONDITION_ID,
        "asset_id": YES_ASSET,
        "timestamp": timestamp.timestamp_millis().to_string(),
        "price": price,
        "size": "10",
        "side": side,
    })
    .to_string()
}

/// `price_change` frame in the current layout.
pub fn price_change_frame(price: &str, size: &str, side: &str) -> String {
    json!({
        "event_type": "price_change",
        "market": CONDITION_ID,
        "timestamp": base_time().timestamp_millis().to_string(),
        "price_changes": [
            {"asset_id": YES_ASSET, "price": price, "size": size, "side": side}
        ],
    })
    .to_string()
}

/// Hourly history starting at `start`, one sample per price.
pub fn create_history(
    slug: &str,
    tags: &[&str],
    start: DateTime<Utc>,
    prices: &[f64],
    outcome: Option<bool>,
) -> PriceHistory {
    PriceHistory {
        slug: slug.to_string(),
        neg_risk: false,
        closed: outcome.is_some(),
        start_date: Some(start),
        end_date: None,
        volume: 250_000.0,
        outcome,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        history: prices
            .iter()
            .enumerate()
            .map(|(i, price)| PriceSample {
                timestamp: start + Duration::hours(i as i64),
                price: *price,
            })
            .collect(),
    }
}

/// Order submitter that records every request and optionally rejects
/// them all. A non-zero `delay` holds each submission before recording it.
#[derive(Default)]
pub struct RecordingSubmitter {
    pub requests: Mutex<Vec<OrderRequest>>,
    pub fail: bool,
    pub delay: std::time::Duration,
}

impl RecordingSubmitter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: std::time::Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderSubmitter for RecordingSubmitter {
    async fn submit_order(&self, request: &OrderRequest) -> Result<String, OrderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        if self.fail {
            return Err(OrderError::Rejected("test rejection".to_string()));
        }
        Ok(format!("order-{}", requests.len()))
    }
}

/// Position source returning a fixed listing.
pub struct StaticPositions(pub Vec<Position>);

#[async_trait]
impl PositionSource for StaticPositions {
    async fn open_positions(&self) -> Result<Vec<Position>, ApiError> {
        Ok(self.0.clone())
    }
}

/// Create a held YES position on the test market.
pub fn create_position(size: f64, cur_price: f64) -> Position {
    Position {
        asset: YES_ASSET.to_string(),
        condition_id: CONDITION_ID.to_string(),
        size,
        avg_price: 0.5,
        cur_price,
        slug: "test-market".to_string(),
        outcome: "Yes".to_string(),
        negative_risk: false,
    }
}
