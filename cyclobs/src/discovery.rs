//! Market discovery.
//!
//! Resolves the set of markets to subscribe to. Discovery runs again on
//! every reconnect so newly listed or newly held markets are picked up.

use crate::gamma::{ApiError, GammaClient, GammaEvent};
use crate::market::Market;
use crate::position::PositionSource;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;

/// Maximum number of markets on one feed connection.
pub const MARKET_CHANNEL_LIMIT: usize = 500;

/// Where the subscription set comes from.
#[derive(Debug, Clone)]
pub enum MarketSource {
    /// Markets of events carrying any of the tags, plus explicit events
    Tags {
        tag_slugs: Vec<String>,
        events: Vec<String>,
        min_volume: f64,
    },
    /// Currently held positions whose slug has an exit trigger
    Positions { slugs: Vec<String> },
    /// Jump alert candidates
    Jump {
        include_tags: Vec<String>,
        exclude_tags: Vec<String>,
    },
}

/// A market together with the token the feed is subscribed to.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribedMarket {
    pub market: Market,
    /// Token whose book and prints are tracked
    pub asset_id: String,
    /// Held size, for markets discovered from positions
    pub position_size: Option<Decimal>,
}

impl SubscribedMarket {
    /// Track the YES token of a market.
    pub fn yes(market: Market) -> Self {
        Self {
            asset_id: market.yes_asset_id.clone(),
            market,
            position_size: None,
        }
    }
}

/// Keep open markets of open events with enough 24h volume.
pub fn select_tag_markets(events: &[GammaEvent], min_volume: f64) -> Vec<Market> {
    let mut markets = Vec::new();
    for event in events.iter().filter(|e| e.is_open()) {
        let tags = event.tag_slugs();
        for raw in event.markets() {
            if !raw.is_open() || raw.volume_24hr.unwrap_or(0.0) < min_volume {
                continue;
            }
            if let Some(market) = Market::from_gamma(raw, &tags) {
                markets.push(market);
            }
        }
    }
    markets
}

/// Keep open markets of an explicitly configured event.
pub fn select_event_markets(event: &GammaEvent) -> Vec<Market> {
    let tags = event.tag_slugs();
    event
        .markets()
        .iter()
        .filter(|m| m.is_open())
        .filter_map(|m| Market::from_gamma(m, &tags))
        .collect()
}

/// Keep jump candidates: open, non-negative-risk events without any
/// excluded tag, and markets that have traded at all.
pub fn select_jump_markets(events: &[GammaEvent], exclude_tags: &[String]) -> Vec<Market> {
    let mut markets = Vec::new();
    for event in events {
        if !event.is_open() || event.neg_risk.unwrap_or(false) {
            continue;
        }
        let tags = event.tag_slugs();
        if tags.iter().any(|t| exclude_tags.contains(t)) {
            continue;
        }
        for raw in event.markets() {
            let volume = raw.volume_num.or(raw.volume).unwrap_or(0.0);
            if !raw.is_open() || volume <= 0.0 {
                continue;
            }
            if let Some(market) = Market::from_gamma(raw, &tags) {
                markets.push(market);
            }
        }
    }
    markets
}

/// Dedupe by condition id, order by 24h volume descending and cap at the
/// channel limit.
pub fn rank_markets(markets: Vec<Market>) -> Vec<Market> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<Market> = markets
        .into_iter()
        .filter(|m| seen.insert(m.condition_id.clone()))
        .collect();
    ranked.sort_by(|a, b| b.volume_24hr.total_cmp(&a.volume_24hr));
    ranked.truncate(MARKET_CHANNEL_LIMIT);
    ranked
}

/// Resolves a [`MarketSource`] against the REST APIs.
#[derive(Clone)]
pub struct Discovery {
    gamma: GammaClient,
    positions: Option<Arc<dyn PositionSource>>,
}

impl Discovery {
    pub fn new(gamma: GammaClient) -> Self {
        Self {
            gamma,
            positions: None,
        }
    }

    /// Attach the position listing used by [`MarketSource::Positions`].
    pub fn with_positions(mut self, positions: Arc<dyn PositionSource>) -> Self {
        self.positions = Some(positions);
        self
    }

    /// Resolve the current subscription set.
    pub async fn resolve(&self, source: &MarketSource) -> Result<Vec<SubscribedMarket>, ApiError> {
        let subscribed = match source {
            MarketSource::Tags {
                tag_slugs,
                events,
                min_volume,
            } => self.resolve_tags(tag_slugs, events, *min_volume).await?,
            MarketSource::Positions { slugs } => self.resolve_positions(slugs).await?,
            MarketSource::Jump {
                include_tags,
                exclude_tags,
            } => self.resolve_jump(include_tags, exclude_tags).await?,
        };

        if let (Some(first), Some(last)) = (subscribed.first(), subscribed.last()) {
            tracing::info!(
                markets = subscribed.len(),
                min_volume_24h = last.market.volume_24hr,
                max_volume_24h = first.market.volume_24hr,
                "Resolved markets"
            );
        } else {
            tracing::warn!("No markets matched the discovery criteria");
        }
        Ok(subscribed)
    }

    async fn resolve_tags(
        &self,
        tag_slugs: &[String],
        event_slugs: &[String],
        min_volume: f64,
    ) -> Result<Vec<SubscribedMarket>, ApiError> {
        let mut markets = Vec::new();
        for tag in tag_slugs {
            let events = self.gamma.events(Some(tag)).await?;
            markets.extend(select_tag_markets(&events, min_volume));
        }
        for slug in event_slugs {
            let event = self.gamma.event_by_slug(slug).await?;
            markets.extend(select_event_markets(&event));
        }
        Ok(rank_markets(markets)
            .into_iter()
            .map(SubscribedMarket::yes)
            .collect())
    }

    async fn resolve_positions(&self, slugs: &[String]) -> Result<Vec<SubscribedMarket>, ApiError> {
        let Some(source) = &self.positions else {
            return Ok(Vec::new());
        };
        let mut subscribed = Vec::new();
        for position in source.open_positions().await? {
            if !slugs.contains(&position.slug) {
                tracing::debug!(slug = %position.slug, "No exit trigger for position");
                continue;
            }
            let raw = self.gamma.market_by_slug(&position.slug).await?;
            let Some(market) = Market::from_gamma(&raw, &[]) else {
                tracing::warn!(slug = %position.slug, "Unable to resolve market for position");
                continue;
            };
            if subscribed
                .iter()
                .any(|s: &SubscribedMarket| s.market.condition_id == market.condition_id)
            {
                continue;
            }
            subscribed.push(SubscribedMarket {
                market,
                asset_id: position.asset.clone(),
                position_size: Some(position.size_decimal()),
            });
        }
        subscribed.truncate(MARKET_CHANNEL_LIMIT);
        Ok(subscribed)
    }

    async fn resolve_jump(
        &self,
        include_tags: &[String],
        exclude_tags: &[String],
    ) -> Result<Vec<SubscribedMarket>, ApiError> {
        let mut markets = Vec::new();
        if include_tags.is_empty() {
            let events = self.gamma.events(None).await?;
            markets.extend(select_jump_markets(&events, exclude_tags));
        } else {
            for tag in include_tags {
                let events = self.gamma.events(Some(tag)).await?;
                markets.extend(select_jump_markets(&events, exclude_tags));
            }
        }
        Ok(rank_markets(markets)
            .into_iter()
            .map(SubscribedMarket::yes)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(json: &str) -> Vec<GammaEvent> {
        serde_json::from_str(json).unwrap()
    }

    fn market_json(slug: &str, condition: &str, volume: f64, open: bool) -> String {
        format!(
            r#"{{"slug":"{slug}","conditionId":"{condition}","clobTokenIds":"[\"1{condition}\",\"2{condition}\"]",
            "active":true,"closed":{closed},"volume24hr":{volume},"volumeNum":{volume}}}"#,
            closed = !open
        )
    }

    #[test]
    fn test_select_tag_markets_filters() {
        let json = format!(
            r#"[{{"active":true,"closed":false,"tags":[{{"slug":"politics"}}],"markets":[{},{},{}]}},
               {{"active":true,"closed":true,"markets":[{}]}}]"#,
            market_json("a", "0xa", 5000.0, true),
            market_json("b", "0xb", 500.0, true),
            market_json("c", "0xc", 9000.0, false),
            market_json("d", "0xd", 9000.0, true),
        );
        let markets = select_tag_markets(&events(&json), 1000.0);
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].slug, "a");
        assert_eq!(markets[0].tags, vec!["politics".to_string()]);
    }

    #[test]
    fn test_rank_markets_dedupes_and_sorts() {
        let json = format!(
            r#"[{{"active":true,"closed":false,"markets":[{},{},{}]}}]"#,
            market_json("low", "0x1", 2000.0, true),
            market_json("high", "0x2", 8000.0, true),
            market_json("dupe", "0x1", 9000.0, true),
        );
        let ranked = rank_markets(select_tag_markets(&events(&json), 1000.0));
        let slugs: Vec<_> = ranked.iter().map(|m| m.slug.as_str()).collect();
        assert_eq!(slugs, vec!["high", "low"]);
    }

    #[test]
    fn test_rank_markets_caps() {
        let markets: Vec<Market> = (0..600)
            .map(|i| Market {
                slug: format!("m{}", i),
                condition_id: format!("0x{}", i),
                yes_asset_id: String::new(),
                no_asset_id: String::new(),
                neg_risk: false,
                tags: Vec::new(),
                active: true,
                closed: false,
                volume_24hr: i as f64,
            })
            .collect();
        let ranked = rank_markets(markets);
        assert_eq!(ranked.len(), MARKET_CHANNEL_LIMIT);
        assert_eq!(ranked[0].slug, "m599");
    }

    #[test]
    fn test_select_jump_markets() {
        let json = format!(
            r#"[{{"active":true,"closed":false,"tags":[{{"slug":"politics"}}],"markets":[{},{}]}},
               {{"active":true,"closed":false,"tags":[{{"slug":"crypto"}}],"markets":[{}]}},
               {{"active":true,"closed":false,"negRisk":true,"markets":[{}]}}]"#,
            market_json("keep", "0x1", 10.0, true),
            market_json("untraded", "0x2", 0.0, true),
            market_json("excluded", "0x3", 10.0, true),
            market_json("negrisk", "0x4", 10.0, true),
        );
        let markets = select_jump_markets(&events(&json), &["crypto".to_string()]);
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].slug, "keep");
    }

    #[test]
    fn test_subscribed_yes_tracks_first_token() {
        let json = format!(r#"[{{"active":true,"closed":false,"markets":[{}]}}]"#, market_json("a", "0xa", 5000.0, true));
        let market = select_tag_markets(&events(&json), 0.0).remove(0);
        let subscribed = SubscribedMarket::yes(market);
        assert_eq!(subscribed.asset_id, "10xa");
        assert_eq!(subscribed.position_size, None);
    }
}
