//! Request-log records and where they go.
//!
//! Emitting a record never blocks the response: [`ChannelLogSink`] hands the
//! record to a bounded channel and drops it when the buffer is full. A
//! background task ([`run_log_writer`]) drains the channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Request bodies longer than this are truncated in log records.
pub const MAX_LOGGED_BODY_BYTES: usize = 16 * 1024;

/// How a resolution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A candidate matched the request
    Matched,
    /// Nothing matched; the default candidate was served
    Default,
    /// Nothing matched and there is no default
    NoMatch,
    /// Endpoint unknown, inactive, or the store failed
    ConfigError,
    /// The pipeline ran past its wall-clock budget
    BudgetExceeded,
    /// The caller went away before the response was ready
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Matched => "matched",
            Outcome::Default => "default",
            Outcome::NoMatch => "no_match",
            Outcome::ConfigError => "config_error",
            Outcome::BudgetExceeded => "budget_exceeded",
            Outcome::Cancelled => "cancelled",
        }
    }

    /// Whether a candidate's response was produced.
    pub fn is_served(&self) -> bool {
        matches!(self, Outcome::Matched | Outcome::Default)
    }
}

/// One request-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLog {
    pub mock_id: Option<String>,
    pub project_slug: Option<String>,
    pub method: String,
    pub path: String,
    pub query: String,
    pub matched_candidate_id: Option<String>,
    /// Status sent to the caller; `None` when nothing was sent
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    /// Request headers, lowercased names
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub request_headers: BTreeMap<String, String>,
    /// Request body as text, capped at [`MAX_LOGGED_BODY_BYTES`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Cap a body for logging, cutting on a char boundary.
pub fn truncate_body(text: &str) -> String {
    if text.len() <= MAX_LOGGED_BODY_BYTES {
        return text.to_string();
    }
    let mut end = MAX_LOGGED_BODY_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Destination for request-log records. Implementations must return
/// immediately and must not fail.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: RequestLog);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn emit(&self, _record: RequestLog) {}
}

/// Sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<RequestLog>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RequestLog> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for MemoryLogSink {
    fn emit(&self, record: RequestLog) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

/// Bounded, fire-and-forget sink in front of a background writer.
pub struct ChannelLogSink {
    tx: mpsc::Sender<RequestLog>,
    dropped: AtomicU64,
}

impl ChannelLogSink {
    /// Create the sink and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RequestLog>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Create the sink and spawn [`run_log_writer`] on the current runtime.
    pub fn spawn(capacity: usize) -> (Self, JoinHandle<u64>) {
        let (sink, rx) = Self::new(capacity);
        let writer = tokio::spawn(run_log_writer(rx));
        (sink, writer)
    }

    /// Records dropped because the buffer was full or the writer had stopped.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl LogSink for ChannelLogSink {
    fn emit(&self, record: RequestLog) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(path = %record.path, "Request log buffer full, dropping record");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Drain records until every sender is gone. Returns how many were written.
pub async fn run_log_writer(mut rx: mpsc::Receiver<RequestLog>) -> u64 {
    let mut written = 0u64;
    while let Some(record) = rx.recv().await {
        info!(
            mock_id = record.mock_id.as_deref().unwrap_or("-"),
            method = %record.method,
            path = %record.path,
            candidate_id = record.matched_candidate_id.as_deref().unwrap_or("-"),
            status = record.status_code.unwrap_or(0),
            latency_ms = record.latency_ms,
            outcome = record.outcome.as_str(),
            error = record.error.as_deref().unwrap_or(""),
            "Mock request"
        );
        written += 1;
    }
    written
}
