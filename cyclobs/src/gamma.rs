//! Gamma API client for market discovery.
//!
//! The Gamma API provides event and market metadata:
//! - Events by tag, ordered by 24h volume
//! - Single events and markets by slug
//! - Event tags
//! - Paged market listings for history downloads
//!
//! NOTE: numeric fields come back as numbers on some endpoints and as
//! strings on others, so they are decoded leniently.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Events fetched per tag in one request.
const EVENTS_LIMIT: usize = 500;

/// Gamma API client for fetching market metadata.
#[derive(Clone)]
pub struct GammaClient {
    client: Client,
    base_url: String,
}

/// Event with its markets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GammaEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default, rename = "negRisk")]
    pub neg_risk: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<EventTag>>,
    #[serde(default)]
    pub markets: Option<Vec<GammaMarket>>,
}

impl GammaEvent {
    pub fn is_open(&self) -> bool {
        self.active.unwrap_or(false) && !self.closed.unwrap_or(true)
    }

    pub fn tag_slugs(&self) -> Vec<String> {
        self.tags
            .iter()
            .flatten()
            .filter_map(|t| t.slug.clone())
            .collect()
    }

    pub fn markets(&self) -> &[GammaMarket] {
        self.markets.as_deref().unwrap_or(&[])
    }
}

/// Event tag.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventTag {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

/// Reference from a market back to its parent event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

/// Raw market response from Gamma API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GammaMarket {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default, rename = "conditionId")]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(default, rename = "endDate")]
    pub end_date: Option<String>,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<String>,
    /// JSON-encoded array, e.g. `["1", "0"]`
    #[serde(default, rename = "outcomePrices")]
    pub outcome_prices: Option<String>,
    /// JSON-encoded array of the YES and NO token ids
    #[serde(default, rename = "clobTokenIds")]
    pub clob_token_ids: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub volume: Option<f64>,
    #[serde(default, rename = "volumeNum", deserialize_with = "lenient_f64")]
    pub volume_num: Option<f64>,
    #[serde(default, rename = "volume24hr", deserialize_with = "lenient_f64")]
    pub volume_24hr: Option<f64>,
    #[serde(default, rename = "volume1wk", deserialize_with = "lenient_f64")]
    pub volume_1wk: Option<f64>,
    #[serde(default, rename = "lastTradePrice", deserialize_with = "lenient_f64")]
    pub last_trade_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub spread: Option<f64>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default, rename = "negRisk")]
    pub neg_risk: Option<bool>,
    #[serde(default)]
    pub events: Option<Vec<EventRef>>,
}

impl GammaMarket {
    pub fn is_open(&self) -> bool {
        self.active.unwrap_or(false) && !self.closed.unwrap_or(true)
    }

    /// YES and NO token ids, when exactly two are listed.
    pub fn token_ids(&self) -> Option<(String, String)> {
        let ids: Vec<String> = serde_json::from_str(self.clob_token_ids.as_deref()?).ok()?;
        match ids.as_slice() {
            [yes, no] if !yes.is_empty() && !no.is_empty() => Some((yes.clone(), no.clone())),
            _ => None,
        }
    }

    /// Resolved outcome: `Some(true)` if YES paid out, `Some(false)` if NO.
    pub fn outcome(&self) -> Option<bool> {
        let prices: Vec<String> = serde_json::from_str(self.outcome_prices.as_deref()?).ok()?;
        match prices.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            ["1", "0"] => Some(true),
            ["0", "1"] => Some(false),
            _ => None,
        }
    }

    /// Id of the first parent event, if numeric.
    pub fn event_id(&self) -> Option<u64> {
        self.events.as_ref()?.first()?.id.as_deref()?.parse().ok()
    }
}

/// Paged events response.
#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    data: Vec<GammaEvent>,
}

/// Error type for REST API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed
    #[error("Request error: {0}")]
    Request(String),
    /// Non-success status
    #[error("HTTP {0}")]
    Status(String),
    /// JSON parsing failed
    #[error("Parse error: {0}")]
    Parse(String),
}

/// GET `url` with query parameters and decode the JSON body.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<T, ApiError> {
    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| ApiError::Request(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ApiError::Status(format!(
            "{}: {}",
            response.status(),
            response.status().canonical_reason().unwrap_or("Unknown")
        )));
    }

    response
        .json()
        .await
        .map_err(|e| ApiError::Parse(e.to_string()))
}

impl GammaClient {
    /// Create a new Gamma client with default base URL.
    pub fn new() -> Self {
        Self::with_base_url("https://gamma-api.polymarket.com")
    }

    /// Create a new Gamma client with custom base URL.
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch non-archived events, highest 24h volume first. Without a tag
    /// slug all events are returned.
    pub async fn events(&self, tag_slug: Option<&str>) -> Result<Vec<GammaEvent>, ApiError> {
        let url = format!("{}/events/pagination", self.base_url);
        let mut query = vec![
            ("limit", EVENTS_LIMIT.to_string()),
            ("archived", "false".to_string()),
            ("order", "volume24hr".to_string()),
            ("ascending", "false".to_string()),
        ];
        if let Some(tag) = tag_slug {
            query.push(("tag_slug", tag.to_string()));
        }
        let page: EventsPage = get_json(&self.client, &url, &query).await?;
        tracing::debug!(tag = tag_slug.unwrap_or("*"), count = page.data.len(), "Fetched events");
        Ok(page.data)
    }

    /// Fetch a single event by slug.
    pub async fn event_by_slug(&self, slug: &str) -> Result<GammaEvent, ApiError> {
        let url = format!("{}/events/slug/{}", self.base_url, slug);
        let query = [
            ("include_chat", "false".to_string()),
            ("include_template", "false".to_string()),
        ];
        get_json(&self.client, &url, &query).await
    }

    /// Fetch the tags of an event.
    pub async fn event_tags(&self, event_id: u64) -> Result<Vec<EventTag>, ApiError> {
        let url = format!("{}/events/{}/tags", self.base_url, event_id);
        get_json(&self.client, &url, &[]).await
    }

    /// Fetch a single market by slug.
    pub async fn market_by_slug(&self, slug: &str) -> Result<GammaMarket, ApiError> {
        let url = format!("{}/markets/slug/{}", self.base_url, slug);
        get_json(&self.client, &url, &[]).await
    }

    /// Fetch one page of markets in descending `order`.
    pub async fn markets(
        &self,
        offset: usize,
        limit: usize,
        order: &str,
        start_date_min: &str,
    ) -> Result<Vec<GammaMarket>, ApiError> {
        let url = format!("{}/markets", self.base_url);
        let query = [
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
            ("order", order.to_string()),
            ("ascending", "false".to_string()),
            ("start_date_min", start_date_min.to_string()),
        ];
        get_json(&self.client, &url, &query).await
    }
}

impl Default for GammaClient {
    fn default() -> Self {
        Self::new()
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}
