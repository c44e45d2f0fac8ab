//! Error kinds raised inside the aggregation core and by ledger providers.
//!
//! Only [`ConfigError`] is fatal. Everything else is counted or surfaced
//! through snapshot flags and never stops the ingestion stream.

use thiserror::Error;

use super::types::WindowId;

/// Per-event and per-record conditions. Non-fatal by construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("stale event: sequence {sequence} is not above watermark {watermark}")]
    StaleEvent { sequence: u64, watermark: u64 },

    #[error("late arrival: record at {timestamp} is before the open span starting at {open_from} in window {window}")]
    LateArrival {
        window: WindowId,
        timestamp: i64,
        open_from: i64,
    },

    #[error("sequence gap: expected {expected}, received {received}")]
    SequenceGap { expected: u64, received: u64 },

    #[error("upstream unavailable: {reason}")]
    UpstreamUnavailable { reason: String },
}

/// Startup validation failures. The process refuses to start on any of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("no windows configured")]
    NoWindows,

    #[error("window {window} configured more than once")]
    DuplicateWindow { window: WindowId },

    #[error("window {window}: bucket granularity {granularity_secs}s must be positive and shorter than the window")]
    InvalidGranularity {
        window: WindowId,
        granularity_secs: u64,
    },

    #[error("window {window}: duration is not a whole number of {granularity_secs}s buckets")]
    UnalignedWindow {
        window: WindowId,
        granularity_secs: u64,
    },

    #[error("window {window}: retention of {retention} buckets does not cover the window")]
    RetentionTooShort { window: WindowId, retention: usize },

    #[error("window {window}: late-arrival tolerance {tolerance_secs}s reaches past the retention horizon")]
    ToleranceTooLong {
        window: WindowId,
        tolerance_secs: u64,
    },

    #[error("percentile target {0} must be within (0, 100)")]
    InvalidPercentile(f64),

    #[error("percentile target {0} listed more than once")]
    DuplicatePercentile(f64),

    #[error("congestion weights ({w1}, {w2}) must be finite, non-negative and not both zero")]
    InvalidWeights { w1: f64, w2: f64 },

    #[error("queue capacity must be greater than zero")]
    ZeroQueueCapacity,

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors returned by a [`LedgerDataProvider`](super::provider::LedgerDataProvider).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("network error: {message}")]
    NetworkError { message: String },

    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: Option<u64> },

    #[error("unexpected response format: {message}")]
    FormatError { message: String },

    #[error("service unavailable")]
    ServiceUnavailable,
}

impl ProviderError {
    /// Server-suggested wait before the next attempt, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimitExceeded { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

impl From<&ProviderError> for IngestError {
    fn from(err: &ProviderError) -> Self {
        IngestError::UpstreamUnavailable {
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unknown window: {0}")]
    UnknownWindow(WindowId),
}
