//! Open position listing.

use crate::gamma::{get_json, ApiError};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

/// A held position as reported by the data API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Position {
    /// Outcome token id
    #[serde(default)]
    pub asset: String,
    #[serde(default, rename = "conditionId")]
    pub condition_id: String,
    #[serde(default)]
    pub size: f64,
    #[serde(default, rename = "avgPrice")]
    pub avg_price: f64,
    #[serde(default, rename = "curPrice")]
    pub cur_price: f64,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default, rename = "negativeRisk")]
    pub negative_risk: bool,
}

impl Position {
    /// Position size as a decimal.
    pub fn size_decimal(&self) -> Decimal {
        Decimal::from_f64(self.size).unwrap_or(Decimal::ZERO)
    }

    /// Current price as a decimal.
    pub fn cur_price_decimal(&self) -> Decimal {
        Decimal::from_f64(self.cur_price).unwrap_or(Decimal::ZERO)
    }
}

/// Source of the account's open positions.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn open_positions(&self) -> Result<Vec<Position>, ApiError>;
}

/// Data API client for the proxy wallet's positions.
#[derive(Clone)]
pub struct DataApiClient {
    client: Client,
    base_url: String,
    user: String,
}

impl DataApiClient {
    pub fn new(base_url: &str, user: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.to_string(),
        }
    }
}

#[async_trait]
impl PositionSource for DataApiClient {
    async fn open_positions(&self) -> Result<Vec<Position>, ApiError> {
        let url = format!("{}/positions", self.base_url);
        let positions: Vec<Position> =
            get_json(&self.client, &url, &[("user", self.user.clone())]).await?;
        Ok(positions.into_iter().filter(|p| p.size > 0.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_deserialize_listing() {
        let json = r#"[{"proxyWallet":"0x1","asset":"123","conditionId":"0xc","size":12.5,
            "avgPrice":0.41,"curPrice":0.47,"slug":"m","outcome":"Yes","title":"ignored"}]"#;
        let positions: Vec<Position> = serde_json::from_str(json).unwrap();
        assert_eq!(positions[0].asset, "123");
        assert_eq!(positions[0].size_decimal(), dec!(12.5));
        assert!(!positions[0].negative_risk);
    }
}
