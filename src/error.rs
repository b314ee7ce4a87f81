// 🚨 Error taxonomy
// Persistence, state machine, extraction and external I/O failures

use crate::entities::{FilingStatus, StatusEvent};
use thiserror::Error;

/// Main error type for the monitor library
#[derive(Error, Debug)]
pub enum MonitorError {
    // Persistence errors
    #[error("Store locked: a write to '{collection}' is already in flight")]
    StoreLocked { collection: String },

    #[error("Corrupt store '{collection}': {reason}")]
    CorruptStore { collection: String, reason: String },

    #[error("Validation failed for {collection} record '{id}': {reason}")]
    Validation {
        collection: String,
        id: String,
        reason: String,
    },

    // State machine errors
    #[error("Invalid transition for filing {filing_id}: {event} is not legal from {from}")]
    InvalidTransition {
        filing_id: String,
        from: FilingStatus,
        event: StatusEvent,
    },

    #[error("Filing not found: {0}")]
    FilingNotFound(String),

    // Extraction errors
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    // Network errors
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for MonitorError
pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    /// Errors that mean the store itself cannot be used for this run
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            MonitorError::StoreLocked { .. } | MonitorError::CorruptStore { .. } | MonitorError::Io(_)
        )
    }
}

/// Document-level and row-level extraction failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Unreadable document: {0}")]
    UnreadableDocument(String),

    #[error("Unsupported layout: no known table header found ({fingerprint})")]
    UnsupportedLayout { fingerprint: String },

    #[error("Partial extraction: row {line_index}: {reason}")]
    PartialExtraction {
        line_index: usize,
        reason: String,
        raw_line: String,
    },
}

/// A network call that failed after its retry policy gave up
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Network error during {operation} after {attempts} attempt(s): {message}")]
pub struct NetworkError {
    pub operation: String,
    pub attempts: u32,
    pub message: String,
    pub timed_out: bool,
}

impl NetworkError {
    pub fn new(operation: impl Into<String>, attempts: u32, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            attempts,
            message: message.into(),
            timed_out: false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotificationError {
    #[error("Notifier not configured: {0}")]
    NotConfigured(String),

    #[error("Notification rejected: {0}")]
    Rejected(String),

    #[error("Notification delivery failed: {0}")]
    Delivery(#[from] NetworkError),
}
