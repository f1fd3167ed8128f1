//! Backtest strategies.
//!
//! Each variant is called once per simulated hour and acts only through
//! the position book it is given.

use super::book::BacktestPositionBook;
use super::pricing::OutcomeSide;
use super::BacktestError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// YES price below which a decay position is abandoned when
/// `price_range_check` is set.
const DECAY_EXIT_PRICE: f64 = 0.4;

/// Buy NO on markets trading inside a YES price band and wait for decay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayParams {
    #[serde(default)]
    pub tags: Vec<String>,
    pub min_price: f64,
    pub max_price: f64,
    /// USD per position
    pub position_size: f64,
    pub holding_hours: i64,
    #[serde(default)]
    pub price_range_check: bool,
}

/// Buy one side once the YES price is beyond a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdParams {
    #[serde(default)]
    pub tags: Vec<String>,
    pub threshold: f64,
    pub greater_than: bool,
    pub position_size: f64,
    pub side: OutcomeSide,
}

/// Buy YES after an hourly jump from below `threshold1` into
/// `[threshold2, threshold3)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpParams {
    #[serde(default)]
    pub include_tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    pub threshold1: f64,
    pub threshold2: f64,
    pub threshold3: f64,
    #[serde(default)]
    pub stop_loss: bool,
    pub position_size: f64,
    pub holding_hours: i64,
}

/// Buy NO after a market has stayed inside `[threshold1, threshold2)` for
/// `min_samples` consecutive hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionParams {
    #[serde(default)]
    pub tags: Vec<String>,
    pub threshold1: f64,
    pub threshold2: f64,
    pub min_samples: usize,
    pub position_size: f64,
}

/// Strategy selection as written in the `[backtest.strategy]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Decay(DecayParams),
    Threshold(ThresholdParams),
    Jump(JumpParams),
    Mention(MentionParams),
}

fn probability(name: &str, value: f64) -> Result<(), String> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(format!("{} must be in (0, 1), got {}", name, value))
    }
}

fn positive(name: &str, value: f64) -> Result<(), String> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(format!("{} must be positive, got {}", name, value))
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StrategyConfig::Decay(p) => {
                if !(0.0..1.0).contains(&p.min_price) || p.max_price > 1.0 || p.min_price >= p.max_price {
                    return Err(format!("invalid decay band [{}, {})", p.min_price, p.max_price));
                }
                positive("position_size", p.position_size)?;
                positive("holding_hours", p.holding_hours as f64)
            }
            StrategyConfig::Threshold(p) => {
                probability("threshold", p.threshold)?;
                positive("position_size", p.position_size)
            }
            StrategyConfig::Jump(p) => {
                probability("threshold1", p.threshold1)?;
                probability("threshold2", p.threshold2)?;
                probability("threshold3", p.threshold3)?;
                if p.threshold2 >= p.threshold3 {
                    return Err("threshold2 must be below threshold3".to_string());
                }
                positive("position_size", p.position_size)?;
                positive("holding_hours", p.holding_hours as f64)
            }
            StrategyConfig::Mention(p) => {
                probability("threshold1", p.threshold1)?;
                probability("threshold2", p.threshold2)?;
                if p.threshold1 >= p.threshold2 {
                    return Err("threshold1 must be below threshold2".to_string());
                }
                if p.min_samples == 0 {
                    return Err("min_samples must be positive".to_string());
                }
                positive("position_size", p.position_size)
            }
        }
    }
}

/// A strategy instance with its per-run state.
#[derive(Debug, Clone)]
pub enum StrategyPolicy {
    Decay(DecayParams),
    Threshold {
        params: ThresholdParams,
        entered: HashSet<String>,
    },
    Jump {
        params: JumpParams,
        previous_prices: HashMap<String, f64>,
    },
    Mention {
        params: MentionParams,
        sample_counts: HashMap<String, usize>,
        entered: HashSet<String>,
    },
}

impl From<StrategyConfig> for StrategyPolicy {
    fn from(config: StrategyConfig) -> Self {
        match config {
            StrategyConfig::Decay(params) => StrategyPolicy::Decay(params),
            StrategyConfig::Threshold(params) => StrategyPolicy::Threshold {
                params,
                entered: HashSet::new(),
            },
            StrategyConfig::Jump(params) => StrategyPolicy::Jump {
                params,
                previous_prices: HashMap::new(),
            },
            StrategyConfig::Mention(params) => StrategyPolicy::Mention {
                params,
                sample_counts: HashMap::new(),
                entered: HashSet::new(),
            },
        }
    }
}

impl StrategyPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyPolicy::Decay(_) => "decay",
            StrategyPolicy::Threshold { .. } => "threshold",
            StrategyPolicy::Jump { .. } => "jump",
            StrategyPolicy::Mention { .. } => "mention",
        }
    }

    /// Advance the strategy by one simulated hour.
    pub fn on_tick(&mut self, book: &mut BacktestPositionBook<'_>) -> Result<(), BacktestError> {
        match self {
            StrategyPolicy::Decay(params) => decay_tick(params, book),
            StrategyPolicy::Threshold { params, entered } => {
                threshold_tick(params, entered, book);
                Ok(())
            }
            StrategyPolicy::Jump { params, previous_prices } => jump_tick(params, previous_prices, book),
            StrategyPolicy::Mention {
                params,
                sample_counts,
                entered,
            } => {
                mention_tick(params, sample_counts, entered, book);
                Ok(())
            }
        }
    }
}

/// Distinct slugs of the open positions, in opening order.
fn open_slugs(book: &BacktestPositionBook<'_>) -> Vec<(String, Duration)> {
    let mut slugs: Vec<(String, Duration)> = Vec::new();
    for position in book.positions() {
        if !slugs.iter().any(|(s, _)| s == &position.slug) {
            slugs.push((position.slug.clone(), book.now() - position.opened));
        }
    }
    slugs
}

fn decay_tick(params: &DecayParams, book: &mut BacktestPositionBook<'_>) -> Result<(), BacktestError> {
    for market in book.markets(&params.tags) {
        let Some(price) = book.price(&market.slug) else {
            continue;
        };
        if price >= params.min_price && price < params.max_price && !book.has_position(&market.slug) {
            book.open_position(&market.slug, OutcomeSide::No, params.position_size / price);
        }
    }

    let holding = Duration::hours(params.holding_hours);
    for (slug, age) in open_slugs(book) {
        let expired = age >= holding;
        let left_range = params.price_range_check && book.require_price(&slug)? < DECAY_EXIT_PRICE;
        if expired || left_range {
            book.close_positions(&slug)?;
        }
    }
    Ok(())
}

fn threshold_tick(params: &ThresholdParams, entered: &mut HashSet<String>, book: &mut BacktestPositionBook<'_>) {
    for market in book.markets(&params.tags) {
        if entered.contains(&market.slug) {
            continue;
        }
        let Some(price) = book.price(&market.slug) else {
            continue;
        };
        let crossed = if params.greater_than {
            price > params.threshold
        } else {
            price < params.threshold
        };
        if !crossed {
            continue;
        }
        let side_price = params.side.convert(price);
        if side_price <= 0.0 {
            continue;
        }
        if book.open_position(&market.slug, params.side, params.position_size / side_price) {
            entered.insert(market.slug.clone());
        }
    }
}

fn jump_tick(
    params: &JumpParams,
    previous_prices: &mut HashMap<String, f64>,
    book: &mut BacktestPositionBook<'_>,
) -> Result<(), BacktestError> {
    let in_range = |price: f64| price >= params.threshold2 && price < params.threshold3;

    for market in book.markets(&params.include_tags) {
        if market.tags.iter().any(|t| params.exclude_tags.contains(t)) {
            continue;
        }
        let Some(price) = book.price(&market.slug) else {
            continue;
        };
        let previous = previous_prices.insert(market.slug.clone(), price);
        let jumped = previous.is_some_and(|p| p <= params.threshold1) && in_range(price);
        if jumped && !book.has_position(&market.slug) {
            tracing::debug!(slug = %market.slug, price = price, "Jump entry");
            book.open_position(&market.slug, OutcomeSide::Yes, params.position_size / price);
        }
    }

    let holding = Duration::hours(params.holding_hours);
    for (slug, age) in open_slugs(book) {
        let expired = age >= holding;
        let stopped = params.stop_loss && !in_range(book.require_price(&slug)?);
        if expired || stopped {
            book.close_positions(&slug)?;
        }
    }
    Ok(())
}

fn mention_tick(
    params: &MentionParams,
    sample_counts: &mut HashMap<String, usize>,
    entered: &mut HashSet<String>,
    book: &mut BacktestPositionBook<'_>,
) {
    for market in book.markets(&params.tags) {
        let price = book.price(&market.slug);
        let count = sample_counts.entry(market.slug.clone()).or_insert(0);
        match price {
            Some(p) if p >= params.threshold1 && p < params.threshold2 => *count += 1,
            _ => {
                *count = 0;
                continue;
            }
        }
        if *count < params.min_samples || entered.contains(&market.slug) {
            continue;
        }
        let Some(price) = price else {
            continue;
        };
        if book.open_position(&market.slug, OutcomeSide::No, params.position_size / (1.0 - price)) {
            entered.insert(market.slug.clone());
        }
    }
}
