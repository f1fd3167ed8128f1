//! Report modes: outcome analysis over stored histories and the jump
//! screener over live Gamma data.

use crate::config::JumpConfig;
use crate::gamma::{ApiError, GammaClient, GammaEvent, GammaMarket};
use crate::history::{last_hour, PriceHistoryClient};
use crate::store::PriceHistory;
use rust_decimal::prelude::ToPrimitive;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Rows printed per analysis table.
const CATEGORY_LIMIT: usize = 20;

/// Resolution counts of one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagOutcome {
    pub tag: String,
    pub yes: usize,
    pub no: usize,
}

impl TagOutcome {
    pub fn total(&self) -> usize {
        self.yes + self.no
    }

    pub fn yes_percentage(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        100.0 * self.yes as f64 / self.total() as f64
    }
}

impl fmt::Display for TagOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.1}% yes ({} samples)", self.tag, self.yes_percentage(), self.total())
    }
}

/// YES resolution rate per tag over closed markets with a known outcome,
/// most sampled first.
pub fn analyze_outcomes(histories: &[PriceHistory], neg_risk: bool) -> Vec<TagOutcome> {
    let mut by_tag: BTreeMap<&str, TagOutcome> = BTreeMap::new();
    for history in histories {
        if !history.closed || history.neg_risk != neg_risk {
            continue;
        }
        let Some(outcome) = history.outcome else {
            continue;
        };
        for tag in &history.tags {
            let entry = by_tag.entry(tag.as_str()).or_insert_with(|| TagOutcome {
                tag: tag.clone(),
                yes: 0,
                no: 0,
            });
            if outcome {
                entry.yes += 1;
            } else {
                entry.no += 1;
            }
        }
    }
    let mut outcomes: Vec<_> = by_tag.into_values().collect();
    outcomes.sort_by(|a, b| b.total().cmp(&a.total()));
    outcomes
}

/// Print the outcome tables for both market kinds.
pub fn print_analysis(histories: &[PriceHistory]) {
    for neg_risk in [false, true] {
        println!("Categories (negRisk = {}):", neg_risk);
        for (i, outcome) in analyze_outcomes(histories, neg_risk).iter().take(CATEGORY_LIMIT).enumerate() {
            println!("\t{}. {}", i + 1, outcome);
        }
        println!();
    }
}

/// A market found by the screener.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenerRow {
    pub slug: String,
    pub first_price: f64,
    pub last_trade_price: f64,
    pub spread: f64,
    pub volume_1wk: f64,
    pub tags: Vec<String>,
    /// First price of the last hour at or below `threshold1`
    pub jumped: bool,
}

impl fmt::Display for ScreenerRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: firstPrice = {:.2}, lastTradePrice = {:.2}, spread = {:.2}, volume1wk = {:.1}, tags = [{}]",
            self.slug,
            self.first_price,
            self.last_trade_price,
            self.spread,
            self.volume_1wk,
            self.tags.join(", ")
        )
    }
}

/// Candidate markets: open, not negative-risk, no excluded tag, last trade
/// in `[price_min, price_max)`. Keyed by slug.
pub fn screen_events(
    events: &[GammaEvent],
    exclude_tags: &[String],
    price_min: f64,
    price_max: f64,
) -> HashMap<String, (GammaMarket, Vec<String>)> {
    let mut found = HashMap::new();
    for event in events {
        if !event.is_open() || event.neg_risk.unwrap_or(false) {
            continue;
        }
        let tags = event.tag_slugs();
        if tags.iter().any(|t| exclude_tags.contains(t)) {
            continue;
        }
        for market in event.markets() {
            let Some(slug) = market.slug.clone() else {
                continue;
            };
            let price = market.last_trade_price.unwrap_or(0.0);
            if price >= price_min && price < price_max {
                found.insert(slug, (market.clone(), tags.clone()));
            }
        }
    }
    found
}

/// Markets currently trading in the jump target range with a tight
/// spread, highest weekly volume first.
pub async fn run_screener(
    gamma: &GammaClient,
    prices: &PriceHistoryClient,
    config: &JumpConfig,
) -> Result<Vec<ScreenerRow>, ApiError> {
    let threshold1 = config.threshold1.to_f64().unwrap_or(0.0);
    let threshold2 = config.threshold2.to_f64().unwrap_or(0.0);
    let threshold3 = config.threshold3.to_f64().unwrap_or(1.0);
    let spread_limit = config.spread_limit.to_f64().unwrap_or(0.0);

    let mut candidates = HashMap::new();
    if config.include_tags.is_empty() {
        let events = gamma.events(None).await?;
        candidates.extend(screen_events(&events, &config.exclude_tags, threshold2, threshold3));
    } else {
        for tag in &config.include_tags {
            let events = gamma.events(Some(tag)).await?;
            candidates.extend(screen_events(&events, &config.exclude_tags, threshold2, threshold3));
        }
    }

    let mut candidates: Vec<_> = candidates.into_values().collect();
    candidates.sort_by(|(a, _), (b, _)| {
        b.volume_1wk
            .unwrap_or(0.0)
            .total_cmp(&a.volume_1wk.unwrap_or(0.0))
            .then_with(|| a.slug.cmp(&b.slug))
    });
    tracing::info!(markets = candidates.len(), "Found matching markets");

    let mut rows = Vec::new();
    for (market, tags) in candidates {
        let spread = market.spread.unwrap_or(f64::MAX);
        if spread > spread_limit {
            continue;
        }
        let Some((yes_id, _)) = market.token_ids() else {
            continue;
        };
        let history = last_hour(prices, &yes_id).await?;
        let Some(first) = history.first() else {
            continue;
        };
        rows.push(ScreenerRow {
            slug: market.slug.clone().unwrap_or_default(),
            first_price: first.price,
            last_trade_price: market.last_trade_price.unwrap_or(0.0),
            spread,
            volume_1wk: market.volume_1wk.unwrap_or(0.0),
            tags,
            jumped: first.price <= threshold1,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(slug: &str, tags: &[&str], closed: bool, neg_risk: bool, outcome: Option<bool>) -> PriceHistory {
        PriceHistory {
            slug: slug.to_string(),
            neg_risk,
            closed,
            start_date: None,
            end_date: None,
            volume: 0.0,
            outcome,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            history: Vec::new(),
        }
    }

    #[test]
    fn test_analyze_outcomes() {
        let histories = vec![
            history("a", &["politics", "world"], true, false, Some(true)),
            history("b", &["politics"], true, false, Some(false)),
            history("c", &["politics"], true, false, Some(false)),
            history("d", &["politics"], false, false, Some(true)),
            history("e", &["politics"], true, false, None),
            history("f", &["politics"], true, true, Some(true)),
        ];
        let outcomes = analyze_outcomes(&histories, false);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].tag, "politics");
        assert_eq!(outcomes[0].total(), 3);
        assert!((outcomes[0].yes_percentage() - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(outcomes[0].to_string(), "politics: 33.3% yes (3 samples)");
    }

    #[test]
    fn test_screen_events() {
        let events: Vec<GammaEvent> = serde_json::from_str(
            r#"[
                {"id":"1","active":true,"closed":false,"tags":[{"slug":"politics"}],
                 "markets":[{"slug":"in","lastTradePrice":0.6},{"slug":"low","lastTradePrice":0.2},{"slug":"edge","lastTradePrice":0.75}]},
                {"id":"2","active":true,"closed":false,"tags":[{"slug":"sports"}],
                 "markets":[{"slug":"excluded","lastTradePrice":0.6}]},
                {"id":"3","active":true,"closed":false,"negRisk":true,
                 "markets":[{"slug":"negrisk","lastTradePrice":0.6}]}
            ]"#,
        )
        .unwrap();
        let found = screen_events(&events, &["sports".to_string()], 0.5, 0.75);
        assert_eq!(found.len(), 1);
        assert_eq!(found["in"].1, vec!["politics".to_string()]);
    }
}
