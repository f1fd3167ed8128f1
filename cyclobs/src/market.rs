//! Tradable market as seen by the engine.

use crate::gamma::GammaMarket;

/// A binary market resolved for subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Market {
    pub slug: String,
    /// Exchange condition id, used as the subscription key
    pub condition_id: String,
    pub yes_asset_id: String,
    pub no_asset_id: String,
    pub neg_risk: bool,
    pub tags: Vec<String>,
    pub active: bool,
    pub closed: bool,
    pub volume_24hr: f64,
}

impl Market {
    /// Build from a Gamma market. Returns `None` when the slug, condition
    /// id or token ids are missing.
    pub fn from_gamma(raw: &GammaMarket, tags: &[String]) -> Option<Self> {
        let (yes_asset_id, no_asset_id) = raw.token_ids()?;
        Some(Self {
            slug: raw.slug.clone().filter(|s| !s.is_empty())?,
            condition_id: raw.condition_id.clone().filter(|s| !s.is_empty())?,
            yes_asset_id,
            no_asset_id,
            neg_risk: raw.neg_risk.unwrap_or(false),
            tags: tags.to_vec(),
            active: raw.active.unwrap_or(false),
            closed: raw.closed.unwrap_or(true),
            volume_24hr: raw.volume_24hr.unwrap_or(0.0),
        })
    }

    /// Asset id for the requested outcome.
    pub fn asset_id(&self, yes: bool) -> &str {
        if yes {
            &self.yes_asset_id
        } else {
            &self.no_asset_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_gamma() {
        let raw: GammaMarket = serde_json::from_str(
            r#"{"slug":"m","conditionId":"0xc","clobTokenIds":"[\"1\",\"2\"]","active":true,"closed":false,"negRisk":true,"volume24hr":"5"}"#,
        )
        .unwrap();
        let market = Market::from_gamma(&raw, &["politics".to_string()]).unwrap();
        assert_eq!(market.condition_id, "0xc");
        assert_eq!(market.asset_id(true), "1");
        assert_eq!(market.asset_id(false), "2");
        assert!(market.neg_risk);
        assert_eq!(market.volume_24hr, 5.0);
    }

    #[test]
    fn test_from_gamma_requires_ids() {
        let raw: GammaMarket = serde_json::from_str(r#"{"slug":"m","clobTokenIds":"[\"1\",\"2\"]"}"#).unwrap();
        assert!(Market::from_gamma(&raw, &[]).is_none());
    }
}
