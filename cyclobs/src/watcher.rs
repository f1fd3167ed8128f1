//! Stale position cleanup.
//!
//! Polls the open positions on a fixed interval, publishes the open count
//! for the position limit check, and closes positions whose size has not
//! changed for longer than the configured expiration.

use crate::config::CleanerConfig;
use crate::order::{OrderRequest, OrderSubmitter, Side};
use crate::position::{Position, PositionSource};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Lowest limit used when closing an expired position.
const MIN_CLOSE_LIMIT: Decimal = dec!(0.05);

#[derive(Debug, Clone, Copy, PartialEq)]
struct TrackedPosition {
    size: f64,
    first_seen: DateTime<Utc>,
}

/// Tracks position ages and closes expired ones.
pub struct PositionWatcher {
    interval: u64,
    expiration: Duration,
    limit_offset: Decimal,
    tracked: HashMap<String, TrackedPosition>,
}

impl PositionWatcher {
    pub fn new(config: &CleanerConfig) -> Self {
        Self {
            interval: config.interval,
            expiration: Duration::seconds(config.expiration as i64),
            limit_offset: config.limit_offset,
            tracked: HashMap::new(),
        }
    }

    /// Number of positions currently tracked.
    pub fn tracked(&self) -> usize {
        self.tracked.len()
    }

    /// Update tracking from a fresh listing and return the closing orders
    /// for expired positions.
    pub fn review(&mut self, positions: &[Position], now: DateTime<Utc>) -> Vec<OrderRequest> {
        self.tracked.retain(|asset, _| positions.iter().any(|p| &p.asset == asset));

        let mut orders = Vec::new();
        for position in positions {
            let Some(tracked) = self.tracked.get_mut(&position.asset) else {
                tracing::info!(slug = %position.slug, size = position.size, "Detected new position");
                self.tracked.insert(
                    position.asset.clone(),
                    TrackedPosition {
                        size: position.size,
                        first_seen: now,
                    },
                );
                continue;
            };
            if tracked.size != position.size {
                tracing::info!(
                    slug = %position.slug,
                    from = tracked.size,
                    to = position.size,
                    "Position size changed, resetting expiration"
                );
                *tracked = TrackedPosition {
                    size: position.size,
                    first_seen: now,
                };
                continue;
            }
            if now - tracked.first_seen < self.expiration {
                continue;
            }

            let limit = (position.cur_price_decimal() - self.limit_offset).max(MIN_CLOSE_LIMIT);
            tracing::info!(slug = %position.slug, limit = %limit, "Position expired, closing it");
            orders.push(OrderRequest {
                slug: position.slug.clone(),
                asset_id: position.asset.clone(),
                side: Side::Sell,
                size: position.size_decimal().trunc(),
                limit,
                expiry_secs: self.interval,
                neg_risk: position.negative_risk,
            });
            self.tracked.remove(&position.asset);
        }
        orders
    }

    /// Poll forever, publishing the open count into `open_positions`.
    pub async fn run(
        mut self,
        source: Arc<dyn PositionSource>,
        submitter: Arc<dyn OrderSubmitter>,
        open_positions: Arc<Mutex<usize>>,
    ) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(self.interval));
        loop {
            ticker.tick().await;
            let positions = match source.open_positions().await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to fetch positions");
                    continue;
                }
            };
            *open_positions.lock().await = positions.len();

            for order in self.review(&positions, Utc::now()) {
                match submitter.submit_order(&order).await {
                    Ok(id) => tracing::info!(order_id = %id, slug = %order.slug, "Submitted closing order"),
                    Err(e) => tracing::error!(error = %e, slug = %order.slug, "Closing order failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn watcher() -> PositionWatcher {
        PositionWatcher::new(&CleanerConfig {
            interval: 60,
            expiration: 3600,
            limit_offset: dec!(0.02),
        })
    }

    fn position(asset: &str, size: f64, cur_price: f64) -> Position {
        Position {
            asset: asset.to_string(),
            size,
            cur_price,
            slug: format!("slug-{}", asset),
            ..Default::default()
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_closes_after_expiration() {
        let mut watcher = watcher();
        let positions = vec![position("a", 12.7, 0.40)];
        assert!(watcher.review(&positions, at(0)).is_empty());
        assert!(watcher.review(&positions, at(3599)).is_empty());

        let orders = watcher.review(&positions, at(3600));
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, Side::Sell);
        assert_eq!(orders[0].size, dec!(12));
        assert_eq!(orders[0].limit, dec!(0.38));
        assert_eq!(orders[0].expiry_secs, 60);
        assert_eq!(watcher.tracked(), 0);
    }

    #[test]
    fn test_size_change_resets_age() {
        let mut watcher = watcher();
        watcher.review(&[position("a", 10.0, 0.5)], at(0));
        watcher.review(&[position("a", 20.0, 0.5)], at(3000));
        assert!(watcher.review(&[position("a", 20.0, 0.5)], at(3600)).is_empty());
        assert_eq!(watcher.review(&[position("a", 20.0, 0.5)], at(6600)).len(), 1);
    }

    #[test]
    fn test_limit_is_floored() {
        let mut watcher = watcher();
        watcher.review(&[position("a", 10.0, 0.03)], at(0));
        let orders = watcher.review(&[position("a", 10.0, 0.03)], at(7200));
        assert_eq!(orders[0].limit, dec!(0.05));
    }

    #[test]
    fn test_forgets_closed_positions() {
        let mut watcher = watcher();
        watcher.review(&[position("a", 10.0, 0.5), position("b", 5.0, 0.5)], at(0));
        watcher.review(&[position("b", 5.0, 0.5)], at(10));
        assert_eq!(watcher.tracked(), 1);
    }
}
