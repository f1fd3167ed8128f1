//! Per-market feed dispatch.
//!
//! The processor owns every market's book, price window and trigger state.
//! Books and windows follow the subscription set; trigger state is keyed by
//! slug and lives for the whole session, so a market that drops out of
//! discovery and comes back keeps its fired triggers.
//! It is driven by a single task, so none of that state is locked. Decoded
//! feed events go in, order intents come out; submitting them is the
//! caller's job.

use crate::discovery::SubscribedMarket;
use crate::feed::{parse_timestamp, BookEvent, FeedMessage, LastTradeEvent, PriceChangeEvent, WireLevel};
use crate::order::{OrderRequest, Side};
use crate::orderbook::{Level, OrderBook};
use crate::trigger::{ExitKind, ExitTrigger, TriggerDefinition, TriggerEvaluator, TriggerState};
use crate::window::{PriceEvent, PriceWindow};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Consumer of decoded feed events.
pub trait FeedHandler: Send {
    /// Replace the subscription set. Books are reset; trigger state is
    /// never reset.
    fn subscribe(&mut self, markets: &[SubscribedMarket]);

    /// Process one event and return the orders it calls for.
    fn handle(&mut self, message: &FeedMessage, now: DateTime<Utc>, open_positions: usize) -> Vec<OrderIntent>;

    /// Local book of a subscribed market, once it has seen an event.
    fn book(&self, condition_id: &str) -> Option<&OrderBook>;

    /// Called when submitting an intent failed.
    fn submission_failed(&mut self, _intent: &OrderIntent) {}
}

/// Why an order was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentReason {
    /// Windowed entry trigger at this index fired
    Entry { trigger: usize },
    Exit(ExitKind),
}

/// An order the processor wants submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub condition_id: String,
    pub reason: IntentReason,
    pub request: OrderRequest,
}

/// Live state of one subscribed market.
#[derive(Debug)]
struct MarketState {
    book: OrderBook,
    window: PriceWindow,
}

/// Triggers of one slug.
#[derive(Debug)]
struct TriggerSet {
    entries: TriggerEvaluator,
    exit: Option<(ExitTrigger, TriggerState)>,
}

/// Dispatches feed events to per-market book, window and triggers.
pub struct MarketFeedProcessor {
    subscriptions: HashMap<String, SubscribedMarket>,
    states: HashMap<String, MarketState>,
    triggers: HashMap<String, TriggerSet>,
    entry_triggers: Vec<TriggerDefinition>,
    exit_triggers: Vec<ExitTrigger>,
    retention: Duration,
    position_limit: usize,
}

impl MarketFeedProcessor {
    /// Create a processor. `retention` bounds every market's price window.
    pub fn new(
        entry_triggers: Vec<TriggerDefinition>,
        exit_triggers: Vec<ExitTrigger>,
        retention: Duration,
        position_limit: usize,
    ) -> Self {
        Self {
            subscriptions: HashMap::new(),
            states: HashMap::new(),
            triggers: HashMap::new(),
            entry_triggers,
            exit_triggers,
            retention,
            position_limit,
        }
    }

    /// Slugs that have an exit trigger configured.
    pub fn exit_slugs(&self) -> Vec<String> {
        self.exit_triggers.iter().map(|t| t.slug.clone()).collect()
    }

    pub fn subscribed(&self) -> usize {
        self.subscriptions.len()
    }

    fn triggers_of(&self, condition_id: &str) -> Option<&TriggerSet> {
        let slug = &self.subscriptions.get(condition_id)?.market.slug;
        self.triggers.get(slug)
    }

    /// Exit trigger state of a subscribed market, if it has one.
    pub fn exit_state(&self, condition_id: &str) -> Option<TriggerState> {
        self.triggers_of(condition_id)?.exit.as_ref().map(|(_, s)| *s)
    }

    /// Entry trigger state of a subscribed market.
    pub fn entry_state(&self, condition_id: &str, index: usize) -> Option<TriggerState> {
        self.triggers_of(condition_id)?.entries.state(index)
    }

    /// Price window of a market.
    pub fn window(&self, condition_id: &str) -> Option<&PriceWindow> {
        self.states.get(condition_id).map(|s| &s.window)
    }

    fn state_for(&mut self, condition_id: &str) -> Option<(&SubscribedMarket, &mut MarketState)> {
        self.market_for(condition_id).map(|(subscription, state, _)| (subscription, state))
    }

    fn market_for(&mut self, condition_id: &str) -> Option<(&SubscribedMarket, &mut MarketState, &mut TriggerSet)> {
        let Some(subscription) = self.subscriptions.get(condition_id) else {
            tracing::warn!(market = condition_id, "Event for unknown market");
            return None;
        };
        let slug = &subscription.market.slug;
        let retention = self.retention;
        let state = self
            .states
            .entry(condition_id.to_string())
            .or_insert_with(|| MarketState {
                book: OrderBook::new(),
                window: PriceWindow::new(retention),
            });
        let entry_triggers = &self.entry_triggers;
        let exit_triggers = &self.exit_triggers;
        let triggers = self.triggers.entry(slug.clone()).or_insert_with(|| TriggerSet {
            entries: TriggerEvaluator::new(entry_triggers.iter().filter(|t| &t.slug == slug).cloned().collect()),
            exit: exit_triggers
                .iter()
                .find(|t| &t.slug == slug)
                .map(|t| (t.clone(), TriggerState::Armed)),
        });
        Some((subscription, state, triggers))
    }

    fn on_book(&mut self, event: &BookEvent) {
        let Some((subscription, state)) = self.state_for(&event.market) else {
            return;
        };
        if event.asset_id != subscription.asset_id {
            return;
        }
        state.book.apply_snapshot(&parse_levels(&event.bids), &parse_levels(&event.asks));
        if !state.book.validate() {
            tracing::warn!(slug = %subscription.market.slug, "Book snapshot failed validation");
        }
    }

    fn on_price_change(&mut self, event: &PriceChangeEvent) {
        let Some((subscription, state)) = self.state_for(&event.market) else {
            return;
        };
        if event.asset_id.as_ref().is_some_and(|a| a != &subscription.asset_id) {
            return;
        }
        for wire in event.all_changes() {
            if wire.asset_id.as_ref().is_some_and(|a| a != &subscription.asset_id) {
                continue;
            }
            match wire.parse() {
                Some(change) => state.book.apply_delta(change.side, change.price, change.size),
                None => tracing::warn!(
                    slug = %subscription.market.slug,
                    price = %wire.price,
                    size = %wire.size,
                    side = %wire.side,
                    "Skipping unparseable price change"
                ),
            }
        }
        if !state.book.validate() {
            tracing::warn!(slug = %subscription.market.slug, "Book failed validation after price change");
        }
    }

    fn on_last_trade(&mut self, event: &LastTradeEvent, now: DateTime<Utc>, open_positions: usize) -> Vec<OrderIntent> {
        let position_limit = self.position_limit;
        let Some((subscription, state, triggers)) = self.market_for(&event.market) else {
            return Vec::new();
        };
        if event.asset_id != subscription.asset_id {
            return Vec::new();
        }
        let slug = subscription.market.slug.clone();
        let (Ok(price), Ok(size), Some(side)) = (
            event.price.parse::<Decimal>(),
            event.size.parse::<Decimal>(),
            Side::parse(&event.side),
        ) else {
            tracing::warn!(slug = %slug, price = %event.price, size = %event.size, "Unparseable trade print");
            return Vec::new();
        };

        if !event.bids.is_empty() || !event.asks.is_empty() {
            state.book.apply_snapshot(&parse_levels(&event.bids), &parse_levels(&event.asks));
        }
        let timestamp = parse_timestamp(&event.timestamp).unwrap_or(now);
        if !state.window.add(PriceEvent {
            timestamp,
            price,
            size,
            side,
        }) {
            return Vec::new();
        }

        let mut intents = Vec::new();

        if let Some((trigger, trigger_state)) = triggers.exit.as_mut() {
            if let Some(signal) = trigger.evaluate(price, side) {
                match (*trigger_state, subscription.position_size) {
                    (TriggerState::Fired, _) => {
                        tracing::debug!(slug = %slug, kind = ?signal.kind, "Exit trigger already fired");
                    }
                    (TriggerState::Armed, None) => {
                        tracing::warn!(slug = %slug, "Exit trigger hit but no position size is known");
                    }
                    (TriggerState::Armed, Some(held)) => {
                        *trigger_state = TriggerState::Fired;
                        tracing::info!(
                            slug = %slug,
                            kind = ?signal.kind,
                            price = %price,
                            limit = %signal.limit,
                            size = %held,
                            "Exit trigger fired"
                        );
                        intents.push(OrderIntent {
                            condition_id: event.market.clone(),
                            reason: IntentReason::Exit(signal.kind),
                            request: OrderRequest {
                                slug: slug.clone(),
                                asset_id: subscription.asset_id.clone(),
                                side: Side::Sell,
                                size: held,
                                limit: signal.limit,
                                expiry_secs: 0,
                                neg_risk: subscription.market.neg_risk,
                            },
                        });
                    }
                }
            }
        }

        if side == Side::Buy && !triggers.entries.is_exhausted() {
            if let Some(m) = triggers.entries.evaluate(&state.window, &state.book) {
                if open_positions >= position_limit {
                    tracing::warn!(
                        slug = %slug,
                        positions = open_positions,
                        limit = position_limit,
                        "Trigger matched but position limit reached"
                    );
                } else if triggers.entries.mark_fired(m.index) {
                    let definition = &triggers.entries.definitions()[m.index];
                    let limit = m.last_price + definition.limit_offset;
                    tracing::info!(
                        slug = %slug,
                        trigger = m.index,
                        first = %m.first_price,
                        last = %m.last_price,
                        delta = %m.delta,
                        limit = %limit,
                        "Entry trigger fired"
                    );
                    intents.push(OrderIntent {
                        condition_id: event.market.clone(),
                        reason: IntentReason::Entry { trigger: m.index },
                        request: OrderRequest {
                            slug: slug.clone(),
                            asset_id: subscription.asset_id.clone(),
                            side: Side::Buy,
                            size: definition.size,
                            limit,
                            expiry_secs: definition.expiration,
                            neg_risk: subscription.market.neg_risk,
                        },
                    });
                }
            }
        }

        intents
    }
}

impl FeedHandler for MarketFeedProcessor {
    fn subscribe(&mut self, markets: &[SubscribedMarket]) {
        self.subscriptions = markets
            .iter()
            .map(|m| (m.market.condition_id.clone(), m.clone()))
            .collect();
        let subscriptions = &self.subscriptions;
        self.states.retain(|condition_id, _| subscriptions.contains_key(condition_id));
        for state in self.states.values_mut() {
            state.book = OrderBook::new();
        }
        tracing::info!(markets = self.subscriptions.len(), "Updated subscriptions");
    }

    fn handle(&mut self, message: &FeedMessage, now: DateTime<Utc>, open_positions: usize) -> Vec<OrderIntent> {
        match message {
            FeedMessage::Book(event) => {
                self.on_book(event);
                Vec::new()
            }
            FeedMessage::PriceChange(event) => {
                self.on_price_change(event);
                Vec::new()
            }
            FeedMessage::LastTradePrice(event) => self.on_last_trade(event, now, open_positions),
            FeedMessage::Unknown => Vec::new(),
        }
    }

    fn book(&self, condition_id: &str) -> Option<&OrderBook> {
        self.states.get(condition_id).map(|s| &s.book)
    }

    fn submission_failed(&mut self, intent: &OrderIntent) {
        if !matches!(intent.reason, IntentReason::Exit(_)) {
            return;
        }
        if let Some((_, state)) = self
            .triggers
            .get_mut(&intent.request.slug)
            .and_then(|t| t.exit.as_mut())
        {
            *state = TriggerState::Armed;
            tracing::info!(slug = %intent.request.slug, "Re-armed exit trigger after failed submission");
        }
    }
}

/// Parse wire levels, skipping (and logging) malformed ones.
pub(crate) fn parse_levels(levels: &[WireLevel]) -> Vec<Level> {
    levels
        .iter()
        .filter_map(|l| {
            let parsed = l.parse();
            if parsed.is_none() {
                tracing::warn!(price = %l.price, size = %l.size, "Skipping unparseable price level");
            }
            parsed
        })
        .collect()
}
