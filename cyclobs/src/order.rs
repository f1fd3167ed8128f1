//! Order requests, exchange amount encoding and request signing.
//!
//! The exchange expects maker/taker amounts as fixed-point integers
//! (one cent is 10_000 ticks) and authenticates REST calls with an
//! HMAC over `timestamp + method + path + body`.

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// Ticks per cent in the exchange's fixed-point amounts.
pub const TICKS_PER_CENT: u128 = 10_000;
/// Cents per dollar.
const CENTS_PER_DOLLAR: Decimal = dec!(100);
/// Smallest number of contracts the exchange accepts.
pub const MIN_ORDER_SIZE: Decimal = dec!(5);
/// Smallest accepted limit price.
pub const MIN_LIMIT_PRICE: Decimal = dec!(0.01);
/// Token ids shorter than this are rejected as malformed.
const MIN_TOKEN_ID_LEN: usize = 20;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Parse the feed/exchange side string (`BUY` / `SELL`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Time in force derived from the expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderType {
    /// Good till cancelled
    #[serde(rename = "GTC")]
    Gtc,
    /// Good till date
    #[serde(rename = "GTD")]
    Gtd,
}

/// A limit order the engine wants on the book.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    /// Market slug, for logging
    pub slug: String,
    /// Outcome token id
    pub asset_id: String,
    pub side: Side,
    /// Number of contracts
    pub size: Decimal,
    /// Limit price
    pub limit: Decimal,
    /// Seconds until expiration, 0 for good-till-cancelled
    pub expiry_secs: u64,
    /// Selects the negative-risk exchange contract
    pub neg_risk: bool,
}

impl OrderRequest {
    /// Validate and normalize into exchange units.
    pub fn prepare(&self) -> Result<PreparedOrder, OrderError> {
        if self.asset_id.len() < MIN_TOKEN_ID_LEN {
            return Err(OrderError::Invalid(format!("token id {:?}", self.asset_id)));
        }
        let size = self.size.trunc();
        if size < MIN_ORDER_SIZE {
            return Err(OrderError::Invalid(format!("size {} below minimum", self.size)));
        }
        let limit = (self.limit * CENTS_PER_DOLLAR).trunc() / CENTS_PER_DOLLAR;
        if limit < MIN_LIMIT_PRICE {
            return Err(OrderError::Invalid(format!("limit {} below minimum", self.limit)));
        }
        let (maker_amount, taker_amount) = order_amounts(self.side, size, limit)?;
        Ok(PreparedOrder {
            size,
            limit,
            maker_amount,
            taker_amount,
        })
    }

    /// Expiration timestamp string and order type for submission at `now`.
    pub fn expiration(&self, now: DateTime<Utc>) -> (String, OrderType) {
        if self.expiry_secs == 0 {
            return ("0".to_string(), OrderType::Gtc);
        }
        let at = now.timestamp() + self.expiry_secs as i64;
        (at.to_string(), OrderType::Gtd)
    }
}

/// Validated order in exchange units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedOrder {
    /// Whole contracts
    pub size: Decimal,
    /// Limit truncated to cents
    pub limit: Decimal,
    pub maker_amount: u128,
    pub taker_amount: u128,
}

/// Maker and taker amounts in ticks.
///
/// A buy gives `size * limit` dollars for `size` contracts; a sell swaps
/// the two.
pub fn order_amounts(side: Side, size: Decimal, limit: Decimal) -> Result<(u128, u128), OrderError> {
    let dollars = (size * limit * CENTS_PER_DOLLAR).trunc();
    let contracts = (size * CENTS_PER_DOLLAR).trunc();
    let to_ticks = |cents: Decimal| -> Result<u128, OrderError> {
        cents
            .to_u128()
            .map(|c| c * TICKS_PER_CENT)
            .ok_or_else(|| OrderError::Invalid(format!("amount {} out of range", cents)))
    };
    let maker = to_ticks(dollars)?;
    let taker = to_ticks(contracts)?;
    match side {
        Side::Buy => Ok((maker, taker)),
        Side::Sell => Ok((taker, maker)),
    }
}

/// L2 request signature: url-safe base64 of HMAC-SHA256 keyed by the
/// base64-decoded API secret.
pub fn l2_signature(
    secret: &str,
    timestamp: i64,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, OrderError> {
    let key = STANDARD
        .decode(secret)
        .or_else(|_| URL_SAFE.decode(secret))
        .map_err(|e| OrderError::Signing(format!("secret is not base64: {}", e)))?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&key)
        .map_err(|e| OrderError::Signing(e.to_string()))?;
    mac.update(format!("{}{}{}{}", timestamp, method, path, body).as_bytes());
    Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
}

/// Response body of the order endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, rename = "errorMsg")]
    pub error_msg: String,
    #[serde(default, rename = "orderID")]
    pub order_id: String,
    #[serde(default)]
    pub status: String,
}

/// Places orders on the exchange.
#[async_trait]
pub trait OrderSubmitter: Send + Sync {
    /// Submit a limit order and return its id.
    async fn submit_order(&self, request: &OrderRequest) -> Result<String, OrderError>;
}

/// Order errors.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Invalid order: {0}")]
    Invalid(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Order rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(side: Side, size: Decimal, limit: Decimal) -> OrderRequest {
        OrderRequest {
            slug: "will-it-rain".to_string(),
            asset_id: "71321045679252212594626385532706912750332728571942532289631379312455583992563".to_string(),
            side,
            size,
            limit,
            expiry_secs: 0,
            neg_risk: false,
        }
    }

    #[test]
    fn test_buy_amounts() {
        let prepared = request(Side::Buy, dec!(10), dec!(0.55)).prepare().unwrap();
        // 10 * 0.55 = $5.50 -> 550 cents
        assert_eq!(prepared.maker_amount, 5_500_000);
        // 10 contracts -> 1000 cents
        assert_eq!(prepared.taker_amount, 10_000_000);
    }

    #[test]
    fn test_sell_swaps_amounts() {
        let prepared = request(Side::Sell, dec!(10), dec!(0.55)).prepare().unwrap();
        assert_eq!(prepared.maker_amount, 10_000_000);
        assert_eq!(prepared.taker_amount, 5_500_000);
    }

    #[test]
    fn test_limit_truncated_to_cents() {
        let prepared = request(Side::Buy, dec!(12.7), dec!(0.4399)).prepare().unwrap();
        assert_eq!(prepared.limit, dec!(0.43));
        assert_eq!(prepared.size, dec!(12));
        // 12 * 0.43 = 5.16
        assert_eq!(prepared.maker_amount, 5_160_000);
    }

    #[test]
    fn test_rejects_invalid_orders() {
        assert!(matches!(
            request(Side::Buy, dec!(4.9), dec!(0.5)).prepare(),
            Err(OrderError::Invalid(_))
        ));
        assert!(matches!(
            request(Side::Buy, dec!(10), dec!(0.009)).prepare(),
            Err(OrderError::Invalid(_))
        ));
        let mut short = request(Side::Buy, dec!(10), dec!(0.5));
        short.asset_id = "123".to_string();
        assert!(matches!(short.prepare(), Err(OrderError::Invalid(_))));
    }

    #[test]
    fn test_expiration() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut req = request(Side::Buy, dec!(10), dec!(0.5));
        assert_eq!(req.expiration(now), ("0".to_string(), OrderType::Gtc));
        req.expiry_secs = 60;
        let (at, kind) = req.expiration(now);
        assert_eq!(kind, OrderType::Gtd);
        assert_eq!(at, (now.timestamp() + 60).to_string());
    }

    #[test]
    fn test_l2_signature_is_url_safe_and_deterministic() {
        let secret = STANDARD.encode(b"not-a-real-secret-but-long-enough");
        let a = l2_signature(&secret, 1_700_000_000, "POST", "/order", "{}").unwrap();
        let b = l2_signature(&secret, 1_700_000_000, "POST", "/order", "{}").unwrap();
        assert_eq!(a, b);
        assert!(!a.contains('+') && !a.contains('/'));
        let c = l2_signature(&secret, 1_700_000_001, "POST", "/order", "{}").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_side_parse() {
        assert_eq!(Side::parse("BUY"), Some(Side::Buy));
        assert_eq!(Side::parse("sell"), Some(Side::Sell));
        assert_eq!(Side::parse("hold"), None);
    }
}
