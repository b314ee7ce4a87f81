// Disclosure Monitor - Core Library
// Filing lifecycle, transaction extraction and notifications for the CLI and tests

pub mod admin;
pub mod config;
pub mod data_quality;
pub mod entities;
pub mod error;
pub mod notifier;
pub mod parser;
pub mod pipeline;
pub mod retry;
pub mod scraper;
pub mod status;
pub mod store;

// Re-export commonly used types
pub use admin::{Admin, DeletionReport, FilingDetail, FilingFilter};
pub use config::{
    LoggingConfig, MonitorConfig, NetworkConfig, NotifierConfig, PipelineConfig, ScraperConfig,
};
pub use data_quality::{ExtractionReport, RowDiagnostic};
pub use entities::{
    Chamber, ExtractionConfidence, Filing, FilingStatus, OwnerCategory, StatusEvent, Transaction,
    TransactionType,
};
pub use error::{ExtractionError, MonitorError, NetworkError, NotificationError, Result};
pub use notifier::{BarkNotifier, DeliveryReceipt, NotificationEvent, Notifier};
pub use parser::{
    detect_layout, AmountRange, DocumentHeader, Extractor, LayoutVariant, TransactionStream,
};
pub use pipeline::{FailedFiling, NotificationFailure, Pipeline, RunOptions, RunSummary};
pub use retry::RetryPolicy;
pub use scraper::{FilingSource, HouseClerkScraper};
pub use status::{StatusSummary, StatusTracker};
pub use store::{Collection, Record, RecordStore, RunLock};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
