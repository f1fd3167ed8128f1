//! cyclobs - order book trigger engine and hourly backtester for Polymarket.
//!
//! This crate provides:
//! - A live market channel consumer that keeps a local order book and a
//!   rolling trade price window per market
//! - One-shot entry triggers on windowed price moves and take-profit /
//!   stop-loss exits on held positions
//! - A position watcher that closes stale positions
//! - Jump alerts, a screener and outcome analysis
//! - A deterministic hour-stepped backtest simulator over stored histories
//!
//! # Architecture
//!
//! The live loop owns all per-market state and runs a `tokio::select!` over:
//! - WebSocket market data
//! - A keep-alive ping timer
//! - The shutdown signal
//!
//! Feed events go through a [`FeedHandler`], which turns them into
//! [`OrderIntent`]s that the loop submits through an [`OrderSubmitter`].
//! The position watcher runs as a separate task and shares only the open
//! position count with the loop.

pub mod backtest;
pub mod client;
pub mod config;
pub mod discovery;
pub mod feed;
pub mod gamma;
pub mod history;
pub mod jump;
pub mod live;
pub mod market;
pub mod order;
pub mod orderbook;
pub mod position;
pub mod processor;
pub mod report;
pub mod store;
pub mod trigger;
pub mod watcher;
pub mod window;

pub use backtest::{BacktestError, BacktestResult, BacktestSimulator, HistoryIndex, OutcomeSide, StrategyPolicy};
pub use client::{ClobClient, DryRunSubmitter};
pub use config::{Config, ConfigError, Credentials, TradingConfig};
pub use discovery::{Discovery, MarketSource, SubscribedMarket};
pub use feed::{decode_frame, FeedError, FeedMessage};
pub use gamma::{ApiError, GammaClient};
pub use jump::JumpDetector;
pub use live::{LiveError, LiveTradingLoop};
pub use market::Market;
pub use order::{OrderError, OrderRequest, OrderSubmitter, Side};
pub use orderbook::{Level, OrderBook};
pub use position::{DataApiClient, Position, PositionSource};
pub use processor::{FeedHandler, MarketFeedProcessor, OrderIntent};
pub use store::{EventStore, HistoryStore, PriceHistory, PriceSample, StoreError};
pub use trigger::{ExitTrigger, TriggerDefinition, TriggerEvaluator, TriggerState};
pub use watcher::PositionWatcher;
pub use window::{PriceEvent, PriceWindow};

/// Re-export commonly used types from dependencies
pub mod prelude {
    pub use crate::{
        Config, FeedHandler, FeedMessage, Level, Market, MarketFeedProcessor, OrderBook, OrderRequest,
        OrderSubmitter, PriceEvent, PriceWindow, Side, TradingConfig, TriggerDefinition,
    };
    pub use rust_decimal::Decimal;
    pub use rust_decimal_macros::dec;
}
