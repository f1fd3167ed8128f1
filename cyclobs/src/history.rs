//! Historical price downloads.
//!
//! `--history` pages through markets by volume and stores the hourly YES
//! price series of each one. `--download-event` writes minute-level CSVs
//! for the markets of a single event.

use crate::gamma::{get_json, ApiError, GammaClient, GammaMarket};
use crate::store::{HistoryStore, PriceHistory, PriceSample, StoreError};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const PAGE_LIMIT: usize = 500;
const MAX_OFFSET: usize = 10_000;
const MARKET_ORDER: &str = "volumeNum";
const START_DATE_MIN: &str = "2025-06-01";
/// Minutes per sample for stored histories.
pub const HOURLY_FIDELITY: u32 = 60;
/// Minutes per sample for event CSVs and the screener.
pub const MINUTE_FIDELITY: u32 = 1;

/// CLOB price history endpoint.
#[derive(Clone)]
pub struct PriceHistoryClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PriceHistoryResponse {
    #[serde(default)]
    history: Vec<PricePoint>,
}

#[derive(Debug, Deserialize)]
struct PricePoint {
    t: i64,
    p: f64,
}

impl PriceHistoryClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Price samples of `token_id` since `start`, one per `fidelity`
    /// minutes.
    pub async fn prices(
        &self,
        token_id: &str,
        start: DateTime<Utc>,
        fidelity: u32,
    ) -> Result<Vec<PriceSample>, ApiError> {
        let url = format!("{}/prices-history", self.base_url);
        let query = [
            ("market", token_id.to_string()),
            ("startTs", start.timestamp().to_string()),
            ("fidelity", fidelity.to_string()),
        ];
        let response: PriceHistoryResponse = get_json(&self.client, &url, &query).await?;
        Ok(response
            .history
            .into_iter()
            .filter_map(|point| {
                Some(PriceSample {
                    timestamp: DateTime::from_timestamp(point.t, 0)?,
                    price: point.p,
                })
            })
            .collect())
    }
}

fn parse_date(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Assemble the stored document for a Gamma market. `None` without a slug
/// or a parseable start date.
pub fn build_history(market: &GammaMarket, tags: Vec<String>, history: Vec<PriceSample>) -> Option<PriceHistory> {
    Some(PriceHistory {
        slug: market.slug.clone()?,
        neg_risk: market.neg_risk.unwrap_or(false),
        closed: market.closed.unwrap_or(false),
        start_date: Some(parse_date(market.start_date.as_deref())?),
        end_date: parse_date(market.end_date.as_deref()),
        volume: market.volume_num.unwrap_or(0.0),
        outcome: market.outcome(),
        tags,
        history,
    })
}

/// Download price histories for the most traded markets. Stored closed
/// markets are skipped, stored open ones are refreshed. Returns the number
/// of documents written.
pub async fn update_history(
    gamma: &GammaClient,
    prices: &PriceHistoryClient,
    store: &HistoryStore,
) -> Result<usize, HistoryError> {
    let mut written = 0;
    for offset in (0..MAX_OFFSET).step_by(PAGE_LIMIT) {
        tracing::info!(offset = offset, "Downloading markets");
        let markets = gamma.markets(offset, PAGE_LIMIT, MARKET_ORDER, START_DATE_MIN).await?;
        if markets.is_empty() {
            break;
        }
        for market in &markets {
            let Some(slug) = market.slug.as_deref() else {
                continue;
            };
            match store.get(slug)? {
                Some(existing) if existing.closed => {
                    tracing::debug!(slug = %slug, "Skipping closed market");
                    continue;
                }
                Some(_) => tracing::info!(slug = %slug, "Updating market"),
                None => {}
            }
            match download_market(gamma, prices, market).await {
                Ok(Some(history)) => {
                    store.insert(&history)?;
                    written += 1;
                    tracing::info!(slug = %slug, records = history.history.len(), "Downloaded price history");
                }
                Ok(None) => tracing::debug!(slug = %slug, "Incomplete market metadata"),
                Err(e) => tracing::warn!(slug = %slug, error = %e, "Failed to download price history"),
            }
        }
    }
    Ok(written)
}

async fn download_market(
    gamma: &GammaClient,
    prices: &PriceHistoryClient,
    market: &GammaMarket,
) -> Result<Option<PriceHistory>, ApiError> {
    let Some(event_id) = market.event_id() else {
        return Ok(None);
    };
    let Some(start) = parse_date(market.start_date.as_deref()) else {
        return Ok(None);
    };
    let Some((yes_id, _)) = market.token_ids() else {
        return Ok(None);
    };
    let tags = gamma
        .event_tags(event_id)
        .await?
        .into_iter()
        .filter_map(|t| t.slug)
        .collect();
    let history = prices.prices(&yes_id, start, HOURLY_FIDELITY).await?;
    Ok(build_history(market, tags, history))
}

#[derive(Debug, Serialize)]
struct CsvRow {
    time: String,
    price: f64,
}

/// Write `samples` as a `time,price` CSV.
pub fn write_price_csv(path: &Path, samples: &[PriceSample]) -> Result<(), HistoryError> {
    let mut writer = csv::Writer::from_path(path)?;
    for sample in samples {
        writer.serialize(CsvRow {
            time: sample.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            price: sample.price,
        })?;
    }
    writer.flush().map_err(|e| HistoryError::Io(path.display().to_string(), e))?;
    Ok(())
}

/// Write one CSV per market of the event `slug` into `dir`. Returns the
/// files written.
pub async fn download_event(
    gamma: &GammaClient,
    prices: &PriceHistoryClient,
    slug: &str,
    dir: &Path,
) -> Result<usize, HistoryError> {
    let event = gamma.event_by_slug(slug).await?;
    std::fs::create_dir_all(dir).map_err(|e| HistoryError::Io(dir.display().to_string(), e))?;

    let mut files = 0;
    for market in event.markets() {
        let Some(market_slug) = market.slug.as_deref() else {
            continue;
        };
        let start = parse_date(market.start_date.as_deref()).or_else(|| parse_date(market.created_at.as_deref()));
        let Some(start) = start else {
            tracing::warn!(slug = %market_slug, "Market has no usable start date");
            continue;
        };
        let Some((yes_id, _)) = market.token_ids() else {
            tracing::warn!(slug = %market_slug, "Market has no token ids");
            continue;
        };
        let samples = prices.prices(&yes_id, start, MINUTE_FIDELITY).await?;
        let path = dir.join(format!("{}.csv", market_slug));
        write_price_csv(&path, &samples)?;
        tracing::info!(samples = samples.len(), path = %path.display(), "Downloaded samples");
        files += 1;
    }
    Ok(files)
}

/// Samples of the last hour, for the screener.
pub async fn last_hour(prices: &PriceHistoryClient, token_id: &str) -> Result<Vec<PriceSample>, ApiError> {
    prices
        .prices(token_id, Utc::now() - Duration::hours(1), MINUTE_FIDELITY)
        .await
}

/// History download errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error on {0}: {1}")]
    Io(String, #[source] std::io::Error),
}
