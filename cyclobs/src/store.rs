//! On-disk persistence.
//!
//! Raw feed events are appended as JSON lines, one file per event kind.
//! Historical price series are kept as one JSON document per market slug.

use crate::feed::FeedMessage;
use crate::orderbook::{Level, OrderBook};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Buffered records that trigger a flush.
pub const FLUSH_THRESHOLD: usize = 250;
/// Book depth stored alongside trade prints.
const RECORD_BOOK_DEPTH: usize = 10;

/// Persisted feed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Time the event was received
    pub local_time: DateTime<Utc>,
    pub event: FeedMessage,
    /// Local book at print time, for trade prints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book: Option<BookDepth>,
}

/// Top of the local book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDepth {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

impl BookDepth {
    pub fn capture(book: &OrderBook) -> Self {
        Self {
            bids: book.top_bids(RECORD_BOOK_DEPTH),
            asks: book.top_asks(RECORD_BOOK_DEPTH),
        }
    }
}

/// Append-only JSONL store for raw feed events.
pub struct EventStore {
    dir: PathBuf,
    buffer: Vec<(&'static str, String)>,
    flush_threshold: usize,
}

impl EventStore {
    /// Open (and create) the event directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io(dir.display().to_string(), e))?;
        Ok(Self {
            dir,
            buffer: Vec::new(),
            flush_threshold: FLUSH_THRESHOLD,
        })
    }

    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold.max(1);
        self
    }

    /// Buffer one event, flushing once the threshold is reached.
    pub fn record(&mut self, message: &FeedMessage, book: Option<&OrderBook>) -> Result<(), StoreError> {
        let record = EventRecord {
            local_time: Utc::now(),
            event: message.clone(),
            book: match message {
                FeedMessage::LastTradePrice(_) => book.map(BookDepth::capture),
                _ => None,
            },
        };
        let line = serde_json::to_string(&record)?;
        self.buffer.push((message.kind(), line));
        if self.buffer.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Number of buffered records.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Write buffered records to their files. Returns how many were written.
    ///
    /// Records of a kind leave the buffer only once their file was written.
    /// If any kind fails, the others are still written and the first error
    /// is returned.
    pub fn flush(&mut self) -> Result<usize, StoreError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let mut by_kind: HashMap<&'static str, String> = HashMap::new();
        for (kind, line) in &self.buffer {
            let chunk = by_kind.entry(*kind).or_default();
            chunk.push_str(line);
            chunk.push('\n');
        }

        let mut first_error = None;
        let mut written_kinds = Vec::new();
        for (kind, chunk) in by_kind {
            match self.append(kind, &chunk) {
                Ok(()) => written_kinds.push(kind),
                Err(e) => {
                    tracing::warn!(kind, error = %e, "Keeping unwritten events buffered");
                    first_error.get_or_insert(e);
                }
            }
        }

        let before = self.buffer.len();
        self.buffer.retain(|(kind, _)| !written_kinds.contains(kind));
        let written = before - self.buffer.len();
        tracing::debug!(records = written, pending = self.buffer.len(), "Flushed event buffer");
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    fn append(&self, kind: &str, chunk: &str) -> Result<(), StoreError> {
        let path = self.path(kind);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::Io(path.display().to_string(), e))?;
        file.write_all(chunk.as_bytes())
            .map_err(|e| StoreError::Io(path.display().to_string(), e))
    }

    /// File holding events of `kind`.
    pub fn path(&self, kind: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", kind))
    }
}

/// One hourly price observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// Stored price series of one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    pub slug: String,
    #[serde(rename = "negRisk")]
    pub neg_risk: bool,
    pub closed: bool,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub volume: f64,
    /// `Some(true)` if YES paid out
    #[serde(default)]
    pub outcome: Option<bool>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub history: Vec<PriceSample>,
}

/// Directory of per-slug price history documents.
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io(dir.display().to_string(), e))?;
        Ok(Self { dir })
    }

    fn path(&self, slug: &str) -> PathBuf {
        self.dir.join(format!("{}.json", slug.replace(['/', '\\'], "_")))
    }

    /// Insert or replace the document for `history.slug`.
    pub fn insert(&self, history: &PriceHistory) -> Result<(), StoreError> {
        let path = self.path(&history.slug);
        let content = serde_json::to_string(history)?;
        fs::write(&path, content).map_err(|e| StoreError::Io(path.display().to_string(), e))
    }

    pub fn get(&self, slug: &str) -> Result<Option<PriceHistory>, StoreError> {
        let path = self.path(slug);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| StoreError::Io(path.display().to_string(), e))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Every stored document, sorted by slug.
    pub fn all(&self) -> Result<Vec<PriceHistory>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::Io(self.dir.display().to_string(), e))?;
        let mut histories = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::Io(self.dir.display().to_string(), e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(|e| StoreError::Io(path.display().to_string(), e))?;
            match serde_json::from_str::<PriceHistory>(&content) {
                Ok(history) => histories.push(history),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable history"),
            }
        }
        histories.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(histories)
    }

    /// Documents with samples that match the negative-risk flag and reach
    /// the volume floor, sorted by slug.
    pub fn load(&self, neg_risk: bool, min_volume: f64) -> Result<Vec<PriceHistory>, StoreError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|h| h.neg_risk == neg_risk && h.volume >= min_volume && !h.history.is_empty())
            .collect())
    }
}

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
