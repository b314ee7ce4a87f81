// 📄 Filing Entity - one disclosure document and its processing state
//
// Metadata captured at discovery never changes; the processing fields are
// only ever written through the status tracker.

use crate::store::{Collection, Record};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// CHAMBER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Chamber {
    House,
    Senate,
}

impl Chamber {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chamber::House => "House",
            Chamber::Senate => "Senate",
        }
    }
}

// ============================================================================
// PROCESSING STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    #[default]
    Discovered,
    Downloading,
    Extracted,
    Notified,
    Failed,
}

impl FilingStatus {
    pub const ALL: [FilingStatus; 5] = [
        FilingStatus::Discovered,
        FilingStatus::Downloading,
        FilingStatus::Extracted,
        FilingStatus::Notified,
        FilingStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilingStatus::Discovered => "discovered",
            FilingStatus::Downloading => "downloading",
            FilingStatus::Extracted => "extracted",
            FilingStatus::Notified => "notified",
            FilingStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<FilingStatus> {
        FilingStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

impl fmt::Display for FilingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events accepted by the status state machine
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    StartProcessing,
    ExtractionSucceeded {
        transaction_count: usize,
        diagnostics: Vec<String>,
        document_sha256: Option<String>,
    },
    ExtractionFailed {
        error: String,
    },
    NotifySucceeded,
    Retry,
}

impl StatusEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StatusEvent::StartProcessing => "start_processing",
            StatusEvent::ExtractionSucceeded { .. } => "extraction_ok",
            StatusEvent::ExtractionFailed { .. } => "extraction_fail",
            StatusEvent::NotifySucceeded => "notify_ok",
            StatusEvent::Retry => "retry",
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// FILING ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filing {
    // ========================================================================
    // IDENTITY + DISCOVERY METADATA (immutable)
    // ========================================================================
    pub filing_id: String,
    pub member_name: String,
    pub chamber: Chamber,
    pub filing_date: NaiveDate,
    pub document_url: String,

    /// State/district, e.g. "CA12"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub office: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filing_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filing_year: Option<i32>,

    // ========================================================================
    // PROCESSING STATE (owned by the status tracker)
    // ========================================================================
    #[serde(default)]
    pub status: FilingStatus,

    /// Failed extraction attempts so far
    #[serde(default)]
    pub attempt_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified_at: Option<DateTime<Utc>>,

    // ========================================================================
    // EXTRACTION OUTCOME
    // ========================================================================
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_count: Option<usize>,

    /// Extracted with row diagnostics
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub flagged: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_sha256: Option<String>,

    // ========================================================================
    // EXTENSIBLE METADATA (fields written by other tools survive rewrites)
    // ========================================================================
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Filing {
    /// Create a freshly discovered filing
    pub fn discovered(
        filing_id: impl Into<String>,
        member_name: impl Into<String>,
        chamber: Chamber,
        filing_date: NaiveDate,
        document_url: impl Into<String>,
    ) -> Self {
        Filing {
            filing_id: filing_id.into(),
            member_name: member_name.into(),
            chamber,
            filing_date,
            document_url: document_url.into(),
            office: None,
            filing_type: None,
            filing_year: None,
            status: FilingStatus::Discovered,
            attempt_count: 0,
            last_error: None,
            discovered_at: None,
            status_updated_at: None,
            extracted_at: None,
            notified_at: None,
            transaction_count: None,
            flagged: false,
            diagnostics: Vec::new(),
            document_sha256: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_office(mut self, office: impl Into<String>) -> Self {
        self.office = Some(office.into());
        self
    }

    pub fn with_filing_type(mut self, filing_type: impl Into<String>, year: Option<i32>) -> Self {
        self.filing_type = Some(filing_type.into());
        self.filing_year = year;
        self
    }

    /// True when no retry is left for a failed filing
    pub fn is_exhausted(&self, max_retry_attempts: u32) -> bool {
        self.status == FilingStatus::Failed && self.attempt_count >= max_retry_attempts
    }

    /// Eligible for processing in the next run
    pub fn is_pending(&self, max_retry_attempts: u32) -> bool {
        match self.status {
            FilingStatus::Discovered => true,
            FilingStatus::Failed => !self.is_exhausted(max_retry_attempts),
            _ => false,
        }
    }
}

impl Record for Filing {
    const COLLECTION: Collection = Collection::Filings;

    fn record_id(&self) -> String {
        self.filing_id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        if self.filing_id.trim().is_empty() {
            return Err("filing_id is empty".to_string());
        }
        if self.member_name.trim().is_empty() {
            return Err("member_name is empty".to_string());
        }
        if self.document_url.trim().is_empty() {
            return Err("document_url is empty".to_string());
        }
        if self.status == FilingStatus::Failed && self.last_error.is_none() {
            return Err("failed filing has no last_error".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Filing {
        Filing::discovered(
            "20024512",
            "Pelosi, Hon.. Nancy",
            Chamber::House,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            "https://disclosures-clerk.house.gov/public_disc/ptr-pdfs/2024/20024512.pdf",
        )
    }

    #[test]
    fn test_unknown_fields_survive_roundtrip() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["reviewed_by"] = serde_json::json!("ops");

        let filing: Filing = serde_json::from_value(value).unwrap();
        assert_eq!(filing.extra.get("reviewed_by"), Some(&serde_json::json!("ops")));

        let back = serde_json::to_value(&filing).unwrap();
        assert_eq!(back["reviewed_by"], "ops");
        assert_eq!(back["status"], "discovered");
    }

    #[test]
    fn test_pending_and_exhausted() {
        let mut filing = sample();
        assert!(filing.is_pending(3));

        filing.status = FilingStatus::Failed;
        filing.last_error = Some("boom".to_string());
        filing.attempt_count = 2;
        assert!(filing.is_pending(3));
        assert!(!filing.is_exhausted(3));

        filing.attempt_count = 3;
        assert!(!filing.is_pending(3));
        assert!(filing.is_exhausted(3));
    }

    #[test]
    fn test_failed_without_error_is_invalid() {
        let mut filing = sample();
        filing.status = FilingStatus::Failed;
        assert!(filing.validate().is_err());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(FilingStatus::parse("Failed"), Some(FilingStatus::Failed));
        assert_eq!(FilingStatus::parse("nope"), None);
    }
}
