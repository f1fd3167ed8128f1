//! Live feed loop.
//!
//! Resolves the market set, subscribes on the market channel and feeds
//! every decoded event through a [`FeedHandler`]. On disconnect it waits a
//! fixed delay and starts over with a freshly resolved market set.
//!
//! Orders are submitted on spawned tasks so a slow exchange never stalls
//! the reader or the keep-alive. Outcomes come back over a channel and are
//! settled on the loop's own task.

use crate::discovery::{Discovery, MarketSource};
use crate::feed::{decode_frame, SubscribeMessage, PING};
use crate::order::{OrderError, OrderSubmitter};
use crate::processor::{FeedHandler, OrderIntent};
use crate::store::{EventStore, StoreError};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

/// Keep-alive interval required by the market channel.
const PING_INTERVAL: Duration = Duration::from_secs(10);
/// How long shutdown waits for in-flight submissions.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

type SubmissionOutcome = (OrderIntent, Result<String, OrderError>);

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    Disconnected,
    Shutdown,
}

/// Reconnecting market channel consumer.
pub struct LiveTradingLoop<H: FeedHandler> {
    ws_url: String,
    reconnect_delay: Duration,
    source: MarketSource,
    discovery: Discovery,
    handler: H,
    submitter: Arc<dyn OrderSubmitter>,
    open_positions: Arc<Mutex<usize>>,
    store: Option<EventStore>,
    outcomes_tx: mpsc::UnboundedSender<SubmissionOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<SubmissionOutcome>,
    in_flight: usize,
}

impl<H: FeedHandler> LiveTradingLoop<H> {
    pub fn new(
        ws_url: &str,
        reconnect_delay: Duration,
        source: MarketSource,
        discovery: Discovery,
        handler: H,
        submitter: Arc<dyn OrderSubmitter>,
        open_positions: Arc<Mutex<usize>>,
    ) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Self {
            ws_url: ws_url.to_string(),
            reconnect_delay,
            source,
            discovery,
            handler,
            submitter,
            open_positions,
            store: None,
            outcomes_tx,
            outcomes_rx,
            in_flight: 0,
        }
    }

    /// Persist raw events to `store`.
    pub fn with_store(mut self, store: EventStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Submissions spawned but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Run until ctrl-c. Buffered events are flushed before returning.
    pub async fn run(mut self) -> Result<(), LiveError> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received shutdown signal");
            shutdown_tx.send(()).await.ok();
        });

        loop {
            match self.discovery.resolve(&self.source).await {
                Ok(markets) if markets.is_empty() => {
                    tracing::warn!("No markets to subscribe to");
                }
                Ok(markets) => {
                    self.handler.subscribe(&markets);
                    let asset_ids = markets.iter().map(|m| m.asset_id.clone()).collect();
                    match self.run_connection(asset_ids, &mut shutdown_rx).await {
                        Ok(ConnectionEnd::Shutdown) => {
                            self.drain_on_shutdown().await;
                            self.flush();
                            tracing::info!("Live loop stopped");
                            return Ok(());
                        }
                        Ok(ConnectionEnd::Disconnected) => {
                            tracing::warn!("Market channel disconnected");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Market channel error");
                        }
                    }
                    self.flush();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Market discovery failed");
                }
            }

            tracing::warn!(delay_secs = self.reconnect_delay.as_secs(), "Reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown_rx.recv() => {
                    self.drain_on_shutdown().await;
                    self.flush();
                    tracing::info!("Shutdown during reconnect delay");
                    return Ok(());
                }
            }
        }
    }

    async fn run_connection(
        &mut self,
        asset_ids: Vec<String>,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> Result<ConnectionEnd, LiveError> {
        tracing::info!(url = %self.ws_url, "Connecting to market channel");
        let (ws_stream, _response) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| LiveError::Connection(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let count = asset_ids.len();
        let subscribe = serde_json::to_string(&SubscribeMessage::market(asset_ids))?;
        write
            .send(Message::Text(subscribe.into()))
            .await
            .map_err(|e| LiveError::WebSocket(e.to_string()))?;
        tracing::info!(assets = count, "Subscribed to market channel");

        let mut ping_timer = interval(PING_INTERVAL);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.dispatch_frame(&text).await,
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Market channel closed by server");
                            return Ok(ConnectionEnd::Disconnected);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(LiveError::WebSocket(e.to_string())),
                        None => return Ok(ConnectionEnd::Disconnected),
                    }
                }

                Some((intent, result)) = self.outcomes_rx.recv() => {
                    self.settle(intent, result);
                }

                _ = ping_timer.tick() => {
                    write
                        .send(Message::Text(PING.into()))
                        .await
                        .map_err(|e| LiveError::WebSocket(e.to_string()))?;
                }

                _ = shutdown.recv() => {
                    return Ok(ConnectionEnd::Shutdown);
                }
            }
        }
    }

    /// Decode one text frame, update state, record events and spawn the
    /// resulting submissions.
    pub async fn dispatch_frame(&mut self, text: &str) {
        let messages = match decode_frame(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        for message in messages {
            let open_positions = *self.open_positions.lock().await;
            let intents = self.handler.handle(&message, Utc::now(), open_positions);

            if let Some(store) = self.store.as_mut() {
                let book = message.market().and_then(|m| self.handler.book(m));
                if let Err(e) = store.record(&message, book) {
                    tracing::warn!(error = %e, "Failed to record event");
                }
            }

            for intent in intents {
                self.spawn_submission(intent);
            }
        }
    }

    fn spawn_submission(&mut self, intent: OrderIntent) {
        let submitter = Arc::clone(&self.submitter);
        let outcomes = self.outcomes_tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = submitter.submit_order(&intent.request).await;
            // Receiver lives as long as the loop
            let _ = outcomes.send((intent, result));
        });
    }

    fn settle(&mut self, intent: OrderIntent, result: Result<String, OrderError>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match result {
            Ok(order_id) => tracing::info!(
                order_id = %order_id,
                slug = %intent.request.slug,
                reason = ?intent.reason,
                "Submitted order"
            ),
            Err(e) => {
                tracing::error!(error = %e, slug = %intent.request.slug, "Order submission failed");
                self.handler.submission_failed(&intent);
            }
        }
    }

    /// Wait for every spawned submission and settle its outcome.
    pub async fn settle_submissions(&mut self) {
        while self.in_flight > 0 {
            match self.outcomes_rx.recv().await {
                Some((intent, result)) => self.settle(intent, result),
                None => break,
            }
        }
    }

    async fn drain_on_shutdown(&mut self) {
        if self.in_flight == 0 {
            return;
        }
        tracing::info!(pending = self.in_flight, "Waiting for in-flight orders");
        if tokio::time::timeout(SHUTDOWN_GRACE, self.settle_submissions()).await.is_err() {
            tracing::warn!(pending = self.in_flight, "Gave up waiting for in-flight orders");
        }
    }

    fn flush(&mut self) {
        if let Some(store) = self.store.as_mut() {
            match store.flush() {
                Ok(0) => {}
                Ok(n) => tracing::info!(records = n, "Flushed buffered events"),
                Err(e) => tracing::error!(error = %e, "Failed to flush buffered events"),
            }
        }
    }
}

/// Live loop errors.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
