//! Market channel wire format.
//!
//! Frames are either the literal `PONG`, a single JSON event or a JSON array
//! of events. Events are discriminated by `event_type`.

use crate::order::Side;
use crate::orderbook::Level;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Keep-alive frame sent by the client.
pub const PING: &str = "PING";
/// Keep-alive reply sent by the server.
pub const PONG: &str = "PONG";

/// Subscription message for the market channel.
#[derive(Debug, Serialize)]
pub struct SubscribeMessage {
    pub assets_ids: Vec<String>,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
}

impl SubscribeMessage {
    pub fn market(assets_ids: Vec<String>) -> Self {
        Self {
            assets_ids,
            msg_type: "market",
        }
    }
}

/// Decoded feed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum FeedMessage {
    Book(BookEvent),
    PriceChange(PriceChangeEvent),
    LastTradePrice(LastTradeEvent),
    #[serde(other)]
    Unknown,
}

impl FeedMessage {
    /// Condition id of the market the event belongs to.
    pub fn market(&self) -> Option<&str> {
        match self {
            FeedMessage::Book(e) => Some(&e.market),
            FeedMessage::PriceChange(e) => Some(&e.market),
            FeedMessage::LastTradePrice(e) => Some(&e.market),
            FeedMessage::Unknown => None,
        }
    }

    /// Collection name used when persisting the raw event.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedMessage::Book(_) => "book",
            FeedMessage::PriceChange(_) => "price_change",
            FeedMessage::LastTradePrice(_) => "last_trade_price",
            FeedMessage::Unknown => "unknown",
        }
    }
}

/// Price level as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireLevel {
    pub price: String,
    pub size: String,
}

impl WireLevel {
    pub fn parse(&self) -> Option<Level> {
        Some(Level::new(self.price.parse().ok()?, self.size.parse().ok()?))
    }
}

/// Full book snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookEvent {
    pub market: String,
    pub asset_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub bids: Vec<WireLevel>,
    #[serde(default)]
    pub asks: Vec<WireLevel>,
}

/// A single price change entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireChange {
    #[serde(default)]
    pub asset_id: Option<String>,
    pub price: String,
    pub size: String,
    pub side: String,
    #[serde(default)]
    pub best_bid: Option<String>,
    #[serde(default)]
    pub best_ask: Option<String>,
}

/// Parsed price change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

impl WireChange {
    pub fn parse(&self) -> Option<Change> {
        Some(Change {
            side: Side::parse(&self.side)?,
            price: self.price.parse().ok()?,
            size: self.size.parse().ok()?,
        })
    }

    /// Best bid/ask reported alongside the change, if any.
    pub fn best_prices(&self) -> Option<(Decimal, Decimal)> {
        let bid = self.best_bid.as_deref()?.parse().ok()?;
        let ask = self.best_ask.as_deref()?.parse().ok()?;
        Some((bid, ask))
    }
}

/// Incremental book update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChangeEvent {
    pub market: String,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    /// Legacy layout
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<WireChange>,
    /// Current layout, one entry per asset
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub price_changes: Vec<WireChange>,
}

impl PriceChangeEvent {
    /// All changes regardless of layout.
    pub fn all_changes(&self) -> impl Iterator<Item = &WireChange> {
        self.changes.iter().chain(self.price_changes.iter())
    }
}

/// Trade print with the book at print time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastTradeEvent {
    pub market: String,
    pub asset_id: String,
    #[serde(default)]
    pub timestamp: String,
    pub price: String,
    pub size: String,
    pub side: String,
    #[serde(default)]
    pub fee_rate_bps: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bids: Vec<WireLevel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asks: Vec<WireLevel>,
}

/// Parse a millisecond timestamp string.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    ts.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Decode one text frame into events. Elements of an array frame are
/// decoded one by one; a malformed element is logged and skipped.
pub fn decode_frame(text: &str) -> Result<Vec<FeedMessage>, FeedError> {
    let text = text.trim();
    if text.is_empty() || text == PONG {
        return Ok(Vec::new());
    }
    let messages = match text.as_bytes()[0] {
        b'[' => serde_json::from_str::<Vec<serde_json::Value>>(text)?
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_json::from_value::<FeedMessage>(value) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping malformed event in frame");
                    None
                }
            })
            .collect(),
        b'{' => vec![serde_json::from_str::<FeedMessage>(text)?],
        _ => return Err(FeedError::UnexpectedFrame(text.chars().take(64).collect())),
    };
    Ok(messages
        .into_iter()
        .filter(|m| !matches!(m, FeedMessage::Unknown))
        .collect())
}

/// Feed errors.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_pong_is_empty() {
        assert!(decode_frame("PONG").unwrap().is_empty());
    }

    #[test]
    fn test_decode_book_array() {
        let frame = r#"[{"event_type":"book","market":"0xabc","asset_id":"123","timestamp":"1700000000000","hash":"h",
            "bids":[{"price":"0.48","size":"30"}],"asks":[{"price":"0.52","size":"25"}]}]"#;
        let messages = decode_frame(frame).unwrap();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            FeedMessage::Book(book) => {
                assert_eq!(book.market, "0xabc");
                assert_eq!(book.bids[0].parse(), Some(Level::new(dec!(0.48), dec!(30))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_price_change_layouts() {
        let legacy = r#"{"event_type":"price_change","market":"0xabc","asset_id":"123","timestamp":"1",
            "changes":[{"price":"0.5","size":"10","side":"BUY"}]}"#;
        let current = r#"{"event_type":"price_change","market":"0xabc","timestamp":"1",
            "price_changes":[{"asset_id":"123","price":"0.5","size":"0","side":"SELL","best_bid":"0.49","best_ask":"0.51"}]}"#;
        for (frame, side) in [(legacy, Side::Buy), (current, Side::Sell)] {
            let messages = decode_frame(frame).unwrap();
            let FeedMessage::PriceChange(event) = &messages[0] else {
                panic!("expected price change");
            };
            let change = event.all_changes().next().unwrap().parse().unwrap();
            assert_eq!(change.side, side);
            assert_eq!(change.price, dec!(0.5));
        }
    }

    #[test]
    fn test_best_prices() {
        let change = WireChange {
            asset_id: None,
            price: "0.5".into(),
            size: "1".into(),
            side: "BUY".into(),
            best_bid: Some("0.49".into()),
            best_ask: Some("0.51".into()),
        };
        assert_eq!(change.best_prices(), Some((dec!(0.49), dec!(0.51))));
    }

    #[test]
    fn test_unknown_event_types_are_dropped() {
        let frame = r#"[{"event_type":"tick_size_change","market":"0xabc"}]"#;
        assert!(decode_frame(frame).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_frames() {
        assert!(decode_frame("hello").is_err());
        assert!(decode_frame("{\"event_type\":\"book\"").is_err());
    }

    #[test]
    fn test_malformed_element_spares_the_rest() {
        let frame = r#"[
            {"event_type":"book","market":"0x1","timestamp":"1","bids":[],"asks":[]},
            {"event_type":"book","market":"0x2","asset_id":"22","timestamp":"1",
             "bids":[{"price":"0.4","size":"10"}],"asks":[]},
            {"event_type":"last_trade_price","market":"0x3","asset_id":"33","price":"0.5","size":"1"}
        ]"#;
        let messages = decode_frame(frame).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].market(), Some("0x2"));
    }

    #[test]
    fn test_subscribe_message() {
        let msg = SubscribeMessage::market(vec!["1".into(), "2".into()]);
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"assets_ids":["1","2"],"type":"market"}"#
        );
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("1700000000123").unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_123);
        assert!(parse_timestamp("abc").is_none());
    }
}
