// 🚦 Status Tracker - per-filing processing state machine
//
//   Discovered --start_processing--> Downloading
//   Downloading --extraction_ok----> Extracted --notify_ok--> Notified
//   Downloading --extraction_fail--> Failed --retry--> Downloading
//
// One transition per `advance` call. A Failed filing whose attempt_count
// reached the retry ceiling stays Failed until an operator resets it.

use crate::entities::{Filing, FilingStatus, StatusEvent};
use crate::error::{MonitorError, Result};
use crate::store::RecordStore;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// last_error recorded for filings found mid-download at startup
pub const INTERRUPTED: &str = "interrupted";

/// Apply one event to a filing, returning the updated copy
pub fn transition(
    filing: &Filing,
    event: &StatusEvent,
    max_retry_attempts: u32,
    now: DateTime<Utc>,
) -> Result<Filing> {
    let mut next = filing.clone();

    match (filing.status, event) {
        (FilingStatus::Discovered, StatusEvent::StartProcessing) => {
            next.status = FilingStatus::Downloading;
        }
        (
            FilingStatus::Downloading,
            StatusEvent::ExtractionSucceeded {
                transaction_count,
                diagnostics,
                document_sha256,
            },
        ) => {
            next.status = FilingStatus::Extracted;
            next.transaction_count = Some(*transaction_count);
            next.flagged = !diagnostics.is_empty();
            next.diagnostics = diagnostics.clone();
            next.document_sha256 = document_sha256.clone();
            next.last_error = None;
            next.extracted_at = Some(now);
        }
        (FilingStatus::Downloading, StatusEvent::ExtractionFailed { error }) => {
            next.status = FilingStatus::Failed;
            next.attempt_count = filing.attempt_count.saturating_add(1);
            next.last_error = Some(error.clone());
        }
        (FilingStatus::Extracted, StatusEvent::NotifySucceeded) => {
            next.status = FilingStatus::Notified;
            next.notified_at = Some(now);
        }
        (FilingStatus::Failed, StatusEvent::Retry)
            if filing.attempt_count < max_retry_attempts =>
        {
            next.status = FilingStatus::Downloading;
        }
        _ => {
            return Err(MonitorError::InvalidTransition {
                filing_id: filing.filing_id.clone(),
                from: filing.status,
                event: event.clone(),
            })
        }
    }

    next.status_updated_at = Some(now);
    Ok(next)
}

/// Count of filings per status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub by_status: Vec<(FilingStatus, usize)>,
    /// Failed filings with no retry left
    pub terminal_failed: usize,
    pub total: usize,
}

impl StatusSummary {
    pub fn count(&self, status: FilingStatus) -> usize {
        self.by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map_or(0, |(_, n)| *n)
    }
}

pub struct StatusTracker {
    store: Arc<RecordStore>,
    max_retry_attempts: u32,
}

impl StatusTracker {
    pub fn new(store: Arc<RecordStore>, max_retry_attempts: u32) -> Self {
        StatusTracker {
            store,
            max_retry_attempts,
        }
    }

    pub fn max_retry_attempts(&self) -> u32 {
        self.max_retry_attempts
    }

    pub fn get(&self, filing_id: &str) -> Result<Filing> {
        self.store
            .get::<Filing>(filing_id)?
            .ok_or_else(|| MonitorError::FilingNotFound(filing_id.to_string()))
    }

    pub fn all(&self) -> Result<Vec<Filing>> {
        self.store.get_all::<Filing>()
    }

    /// Insert filings not seen before as Discovered, in one write
    ///
    /// Known filing ids are left untouched whatever their state.
    pub fn register_discovered(&self, filings: &[Filing]) -> Result<Vec<Filing>> {
        let mut known: HashSet<String> = self
            .all()?
            .into_iter()
            .map(|filing| filing.filing_id)
            .collect();

        let now = Utc::now();
        let fresh: Vec<Filing> = filings
            .iter()
            .filter(|filing| known.insert(filing.filing_id.clone()))
            .map(|filing| {
                let mut filing = filing.clone();
                filing.status = FilingStatus::Discovered;
                filing.attempt_count = 0;
                filing.last_error = None;
                filing.discovered_at = Some(now);
                filing.status_updated_at = Some(now);
                filing
            })
            .collect();

        if !fresh.is_empty() {
            self.store.upsert_many(&fresh)?;
            info!(registered = fresh.len(), "registered new filings");
        }
        Ok(fresh)
    }

    /// Discovered filings plus failed ones with retries left, oldest first
    pub fn select_pending(&self) -> Result<Vec<Filing>> {
        let max = self.max_retry_attempts;
        self.select(|filing| filing.is_pending(max))
    }

    /// Extracted filings still waiting for a confirmed notification
    pub fn select_unnotified(&self) -> Result<Vec<Filing>> {
        self.select(|filing| filing.status == FilingStatus::Extracted)
    }

    pub fn failed(&self) -> Result<Vec<Filing>> {
        self.select(|filing| filing.status == FilingStatus::Failed)
    }

    fn select<F: Fn(&Filing) -> bool>(&self, keep: F) -> Result<Vec<Filing>> {
        let mut filings: Vec<Filing> = self.all()?.into_iter().filter(|f| keep(f)).collect();
        filings.sort_by(|a, b| {
            a.filing_date
                .cmp(&b.filing_date)
                .then_with(|| a.filing_id.cmp(&b.filing_id))
        });
        Ok(filings)
    }

    /// Apply exactly one transition and persist it
    ///
    /// The legality check and the write happen under one store lock, so a
    /// concurrent writer cannot slip a transition in between.
    pub fn advance(&self, filing_id: &str, event: StatusEvent) -> Result<Filing> {
        let max = self.max_retry_attempts;
        let (current, next) = self
            .store
            .update::<Filing, _>(filing_id, |current| {
                transition(current, &event, max, Utc::now())
            })?
            .ok_or_else(|| MonitorError::FilingNotFound(filing_id.to_string()))?;

        info!(
            filing_id,
            event = event.name(),
            from = %current.status,
            status = %next.status,
            attempt = next.attempt_count,
            "filing status changed"
        );
        Ok(next)
    }

    /// Fail filings a killed run left in Downloading, so they are retried
    pub fn recover_interrupted(&self) -> Result<Vec<String>> {
        let stuck = self.select(|filing| filing.status == FilingStatus::Downloading)?;
        let mut recovered = Vec::with_capacity(stuck.len());

        for filing in stuck {
            warn!(filing_id = %filing.filing_id, "recovering filing interrupted mid-download");
            self.advance(
                &filing.filing_id,
                StatusEvent::ExtractionFailed {
                    error: INTERRUPTED.to_string(),
                },
            )?;
            recovered.push(filing.filing_id);
        }
        Ok(recovered)
    }

    /// Operator reset: a failed filing gets its retry budget back
    pub fn reset(&self, filing_id: &str) -> Result<Filing> {
        let (_, filing) = self
            .store
            .update::<Filing, _>(filing_id, |current| {
                if current.status != FilingStatus::Failed {
                    return Err(MonitorError::InvalidTransition {
                        filing_id: current.filing_id.clone(),
                        from: current.status,
                        event: StatusEvent::Retry,
                    });
                }
                let mut filing = current.clone();
                filing.attempt_count = 0;
                filing.status_updated_at = Some(Utc::now());
                Ok(filing)
            })?
            .ok_or_else(|| MonitorError::FilingNotFound(filing_id.to_string()))?;

        info!(filing_id, "filing retry budget reset");
        Ok(filing)
    }

    pub fn summary(&self) -> Result<StatusSummary> {
        let filings = self.all()?;
        let by_status = FilingStatus::ALL
            .iter()
            .map(|status| {
                let n = filings.iter().filter(|f| f.status == *status).count();
                (*status, n)
            })
            .collect();
        let terminal_failed = filings
            .iter()
            .filter(|f| f.is_exhausted(self.max_retry_attempts))
            .count();

        Ok(StatusSummary {
            by_status,
            terminal_failed,
            total: filings.len(),
        })
    }

    /// Newest filing date on record; the scraper resumes from here
    pub fn latest_filing_date(&self) -> Result<Option<NaiveDate>> {
        Ok(self.all()?.iter().map(|f| f.filing_date).max())
    }
}

// ============================================================================
// TESTS
// ============================================================================
