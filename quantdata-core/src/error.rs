//! Structured error types for the ingestion layer.
//!
//! Every failure surfaced to callers is an [`IngestError`]. The fetch family
//! (`Fetch`, `RateLimited`, `SymbolNotFound`) shares retry and classification
//! rules; `Validation` and `Configuration` are caller mistakes and never retried.

use crate::payload::Shape;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error raised anywhere in the cache-or-fetch pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Generic failure reaching the provider (including server errors).
    #[error("fetch failed for '{key}': {message}")]
    Fetch { key: String, message: String },

    /// The provider signalled throttling.
    #[error("rate limited while fetching '{key}': {message}")]
    RateLimited { key: String, message: String },

    /// The provider has no such instrument.
    #[error("symbol not found: {symbol} ({message})")]
    SymbolNotFound { symbol: String, message: String },

    /// Request parameters or fetched data failed sanity checks.
    #[error("validation failed for '{key}': {reason}{}", shape_suffix(.shape))]
    Validation {
        key: String,
        reason: String,
        shape: Option<Shape>,
    },

    /// Persistent-store failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Invalid construction parameters or settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A bounded wait on the rate limiter elapsed.
    #[error("timed out after {waited:?} waiting for {tokens} rate-limit token(s)")]
    Timeout { tokens: u32, waited: Duration },
}

fn shape_suffix(shape: &Option<Shape>) -> String {
    match shape {
        Some(shape) => format!(" (data shape: {shape})"),
        None => String::new(),
    }
}

impl IngestError {
    /// True for the fetch family: `Fetch`, `RateLimited` and `SymbolNotFound`.
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            IngestError::Fetch { .. }
                | IngestError::RateLimited { .. }
                | IngestError::SymbolNotFound { .. }
        )
    }

    /// Validation error about request parameters (no data shape involved).
    pub fn invalid_request(key: impl Into<String>, reason: impl Into<String>) -> Self {
        IngestError::Validation {
            key: key.into(),
            reason: reason.into(),
            shape: None,
        }
    }
}

impl From<rusqlite::Error> for IngestError {
    fn from(e: rusqlite::Error) -> Self {
        IngestError::Cache(e.to_string())
    }
}

/// Decides whether a failed attempt is worth repeating.
///
/// The default treats an error as transient when its message mentions a
/// network-level condition or a 5xx status.
pub trait Retryable: fmt::Display {
    fn is_retryable(&self) -> bool {
        is_transient_message(&self.to_string())
    }
}

impl Retryable for IngestError {
    fn is_retryable(&self) -> bool {
        match self {
            IngestError::Validation { .. }
            | IngestError::SymbolNotFound { .. }
            | IngestError::Configuration(_) => false,
            IngestError::RateLimited { .. } | IngestError::Fetch { .. } => true,
            IngestError::Cache(_) | IngestError::Timeout { .. } => {
                is_transient_message(&self.to_string())
            }
        }
    }
}

const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "connection",
    "network",
    "temporary",
    "unavailable",
    "500",
    "502",
    "503",
    "504",
];

const NOT_FOUND_PATTERNS: &[&str] = &["404", "not found", "no data found"];
const RATE_LIMIT_PATTERNS: &[&str] = &["429", "rate limit", "too many requests"];
const SERVER_ERROR_PATTERNS: &[&str] = &["500", "502", "503", "504"];

/// Whether a message looks like a transient network or server condition.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Map a raw provider failure onto the fetch family by inspecting its message.
///
/// `key` is the cache key of the request, `subject` the symbol (or instrument
/// list) reported when the instrument does not exist.
pub fn classify_fetch_failure(key: &str, subject: &str, raw: &dyn fmt::Display) -> IngestError {
    let message = raw.to_string();
    let lower = message.to_lowercase();

    if NOT_FOUND_PATTERNS.iter().any(|p| lower.contains(p)) {
        return IngestError::SymbolNotFound {
            symbol: subject.to_string(),
            message,
        };
    }
    if RATE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return IngestError::RateLimited {
            key: key.to_string(),
            message,
        };
    }
    if SERVER_ERROR_PATTERNS.iter().any(|p| lower.contains(p)) {
        return IngestError::Fetch {
            key: key.to_string(),
            message: format!("server error: {message}"),
        };
    }
    IngestError::Fetch {
        key: key.to_string(),
        message: format!("failed to fetch data: {message}"),
    }
}
