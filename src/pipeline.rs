// 🔁 Pipeline Orchestrator - one scrape → extract → notify pass
//
// Order per run:
//   0. recover filings a killed run left in Downloading
//   1. scrape (gated by last_scraped_at) and register unseen filings
//   2. process pending filings oldest first, each in isolation
//   3. notify every Extracted filing; only a confirmed delivery moves it on
//
// Only an unusable store fails the run. Everything else is recorded on the
// affected filing and in the RunSummary.

use crate::config::PipelineConfig;
use crate::data_quality::ExtractionReport;
use crate::entities::{Filing, FilingStatus, StatusEvent, Transaction};
use crate::error::Result;
use crate::notifier::{NotificationEvent, Notifier};
use crate::parser::Extractor;
use crate::scraper::FilingSource;
use crate::status::StatusTracker;
use crate::store::{Collection, RecordStore};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Marker on the filings collection: RFC 3339 time of the last successful scrape
pub const LAST_SCRAPED_AT: &str = "last_scraped_at";

// ============================================================================
// RUN OPTIONS + SUMMARY
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Scrape even when the last scrape is younger than the minimum interval
    pub force_scrape: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedFiling {
    pub filing_id: String,
    pub last_error: String,
    pub attempt_count: u32,
    /// No retry left
    pub terminal: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationFailure {
    pub filing_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunSummary {
    pub run_id: String,
    pub recovered: Vec<String>,
    pub scrape_skipped: bool,
    pub scrape_error: Option<String>,
    /// Filings returned by the source
    pub discovered: usize,
    /// Of those, filings not seen before
    pub registered: usize,
    pub processed: usize,
    pub extracted: usize,
    pub failed: usize,
    pub notified: usize,
    pub failures: Vec<FailedFiling>,
    pub notification_failures: Vec<NotificationFailure>,
    /// Extracted filings that carry row diagnostics
    pub flagged: Vec<String>,
}

impl RunSummary {
    fn new(run_id: String) -> Self {
        RunSummary {
            run_id,
            ..RunSummary::default()
        }
    }

    fn record_failure(&mut self, filing: &Filing, max_retry_attempts: u32) {
        self.failed += 1;
        self.failures.push(FailedFiling {
            filing_id: filing.filing_id.clone(),
            last_error: filing.last_error.clone().unwrap_or_default(),
            attempt_count: filing.attempt_count,
            terminal: filing.is_exhausted(max_retry_attempts),
        });
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.run_id)?;
        if !self.recovered.is_empty() {
            writeln!(f, "  Recovered: {}", self.recovered.join(", "))?;
        }
        if self.scrape_skipped {
            writeln!(f, "  Scrape: skipped (minimum interval not reached)")?;
        } else if let Some(err) = &self.scrape_error {
            writeln!(f, "  Scrape: failed ({})", err)?;
        } else {
            writeln!(f, "  Scrape: {} listed, {} new", self.discovered, self.registered)?;
        }
        writeln!(
            f,
            "  Processed: {} ({} extracted, {} failed)",
            self.processed, self.extracted, self.failed
        )?;
        writeln!(f, "  Notified: {}", self.notified)?;
        for failure in &self.failures {
            writeln!(
                f,
                "  ❌ {} (attempt {}{}): {}",
                failure.filing_id,
                failure.attempt_count,
                if failure.terminal { ", no retries left" } else { "" },
                failure.last_error
            )?;
        }
        for failure in &self.notification_failures {
            writeln!(f, "  🔕 {}: {}", failure.filing_id, failure.error)?;
        }
        for filing_id in &self.flagged {
            writeln!(f, "  ⚠️  {} extracted with row diagnostics", filing_id)?;
        }
        Ok(())
    }
}

/// Whether a scrape is due given the last successful one
pub fn scrape_due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, min_interval_hours: u64) -> bool {
    match last {
        None => true,
        Some(last) => {
            let interval_secs = i64::try_from(min_interval_hours)
                .unwrap_or(i64::MAX)
                .saturating_mul(3600);
            now.signed_duration_since(last).num_seconds() >= interval_secs
        }
    }
}

/// Hex SHA-256 of a downloaded document
pub fn document_digest(document: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    store: Arc<RecordStore>,
    tracker: StatusTracker,
    source: Arc<dyn FilingSource>,
    notifier: Arc<dyn Notifier>,
    extractor: Extractor,
    config: PipelineConfig,
}

struct Extraction {
    transactions: Vec<Transaction>,
    diagnostics: Vec<String>,
    document_sha256: String,
}

impl Pipeline {
    pub fn new(
        store: Arc<RecordStore>,
        source: Arc<dyn FilingSource>,
        notifier: Arc<dyn Notifier>,
        config: PipelineConfig,
    ) -> Self {
        let tracker = StatusTracker::new(Arc::clone(&store), config.max_retry_attempts);
        Pipeline {
            store,
            tracker,
            source,
            notifier,
            extractor: Extractor::new(),
            config,
        }
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    /// Execute one full run
    ///
    /// # Returns
    /// * `Ok(RunSummary)` - per-filing failures are inside the summary
    /// * `Err(MonitorError)` - the store could not be read or written
    pub async fn run(&self, options: RunOptions) -> Result<RunSummary> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("pipeline_run", run_id = %run_id);
        self.run_steps(run_id, options).instrument(span).await
    }

    async fn run_steps(&self, run_id: String, options: RunOptions) -> Result<RunSummary> {
        let mut summary = RunSummary::new(run_id);
        info!(force_scrape = options.force_scrape, "pipeline run started");

        self.store.ensure_ready()?;
        let _run_lock = self.store.lock_run()?;
        summary.recovered = self.tracker.recover_interrupted()?;

        self.scrape(options, &mut summary).await?;

        let mut pending = self.tracker.select_pending()?;
        if let Some(limit) = self.config.max_filings_per_run {
            if pending.len() > limit {
                info!(pending = pending.len(), limit, "capping filings processed this run");
                pending.truncate(limit);
            }
        }

        for filing in &pending {
            self.process_filing(filing, &mut summary).await?;
        }

        self.notify_extracted(&mut summary).await?;

        info!(
            processed = summary.processed,
            extracted = summary.extracted,
            failed = summary.failed,
            notified = summary.notified,
            "pipeline run finished"
        );
        Ok(summary)
    }

    // ========================================================================
    // SCRAPE
    // ========================================================================

    fn last_scraped_at(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.store.read_marker(Collection::Filings, LAST_SCRAPED_AT)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                warn!(marker = %raw, error = %e, "ignoring unparseable scrape marker");
                Ok(None)
            }
        }
    }

    async fn scrape(&self, options: RunOptions, summary: &mut RunSummary) -> Result<()> {
        let now = Utc::now();
        if !options.force_scrape
            && !scrape_due(self.last_scraped_at()?, now, self.config.min_scrape_interval_hours)
        {
            info!(
                min_interval_hours = self.config.min_scrape_interval_hours,
                "skipping scrape, last one is too recent"
            );
            summary.scrape_skipped = true;
            return Ok(());
        }

        let since = self.tracker.latest_filing_date()?;
        let filings = match self.source.fetch_new_filings(since).await {
            Ok(filings) => filings,
            Err(e) => {
                warn!(error = %e, "scrape failed, continuing with known filings");
                summary.scrape_error = Some(e.to_string());
                return Ok(());
            }
        };
        summary.discovered = filings.len();

        match self.tracker.register_discovered(&filings) {
            Ok(fresh) => summary.registered = fresh.len(),
            Err(e) if e.is_store_failure() => return Err(e),
            Err(e) => {
                warn!(error = %e, "could not register scraped filings");
                summary.scrape_error = Some(e.to_string());
                return Ok(());
            }
        }

        self.store
            .write_marker(Collection::Filings, LAST_SCRAPED_AT, &now.to_rfc3339())?;
        info!(since = ?since, listed = summary.discovered, new = summary.registered, "scrape complete");
        Ok(())
    }

    // ========================================================================
    // PROCESS
    // ========================================================================

    async fn process_filing(&self, filing: &Filing, summary: &mut RunSummary) -> Result<()> {
        let filing_id = filing.filing_id.as_str();
        let start = match filing.status {
            FilingStatus::Failed => StatusEvent::Retry,
            _ => StatusEvent::StartProcessing,
        };

        if let Err(e) = self.tracker.advance(filing_id, start) {
            if e.is_store_failure() {
                return Err(e);
            }
            warn!(filing_id, error = %e, "skipping filing that cannot start processing");
            return Ok(());
        }
        summary.processed += 1;

        let outcome = match self.download_and_extract(filing).await {
            Ok(extraction) => self.commit(filing_id, extraction),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(extracted) => {
                summary.extracted += 1;
                if extracted.flagged {
                    summary.flagged.push(extracted.filing_id);
                }
            }
            Err(e) if e.is_store_failure() => {
                error!(filing_id, error = %e, "store failure while processing filing");
                return Err(e);
            }
            Err(e) => {
                let recorded = self.tracker.advance(
                    filing_id,
                    StatusEvent::ExtractionFailed {
                        error: e.to_string(),
                    },
                );
                match recorded {
                    Ok(failed) => {
                        warn!(
                            filing_id,
                            attempt = failed.attempt_count,
                            error = %e,
                            "filing processing failed"
                        );
                        summary.record_failure(&failed, self.tracker.max_retry_attempts());
                    }
                    Err(store_error) if store_error.is_store_failure() => return Err(store_error),
                    // Left in Downloading; the next run recovers it
                    Err(other) => {
                        error!(filing_id, error = %other, cause = %e, "could not record failure");
                    }
                }
            }
        }
        Ok(())
    }

    async fn download_and_extract(&self, filing: &Filing) -> Result<Extraction> {
        let document = self.source.download_document(filing).await?;
        let stream = self.extractor.extract(&filing.filing_id, &document)?;

        if let Some(printed) = &stream.header().filing_id {
            if printed != &filing.filing_id {
                warn!(
                    filing_id = %filing.filing_id,
                    printed_id = %printed,
                    "document header names a different filing id"
                );
            }
        }
        debug!(filing_id = %filing.filing_id, layout = stream.layout().code(), "extracting rows");

        let report = ExtractionReport::collect(stream);
        for diagnostic in &report.diagnostics {
            warn!(
                filing_id = %filing.filing_id,
                row = diagnostic.line_index,
                reason = %diagnostic.reason,
                "row could not be parsed"
            );
        }
        report.verdict(self.config.extraction_min_rows_for_success)?;

        debug!(filing_id = %filing.filing_id, "{}", report.summary());
        Ok(Extraction {
            diagnostics: report.diagnostic_lines(),
            transactions: report.transactions,
            document_sha256: document_digest(&document),
        })
    }

    /// Replace the filing's transactions, then mark it Extracted
    fn commit(&self, filing_id: &str, extraction: Extraction) -> Result<Filing> {
        let replaced = self
            .store
            .replace_group(|t: &Transaction| t.filing_id == filing_id, &extraction.transactions)?;
        debug!(filing_id, replaced, "transactions replaced");

        self.tracker.advance(
            filing_id,
            StatusEvent::ExtractionSucceeded {
                transaction_count: extraction.transactions.len(),
                diagnostics: extraction.diagnostics,
                document_sha256: Some(extraction.document_sha256),
            },
        )
    }

    // ========================================================================
    // NOTIFY
    // ========================================================================

    async fn notify_extracted(&self, summary: &mut RunSummary) -> Result<()> {
        let waiting = self.tracker.select_unnotified()?;
        if waiting.is_empty() {
            return Ok(());
        }

        let mut by_filing: HashMap<String, Vec<Transaction>> = HashMap::new();
        for transaction in self.store.get_all::<Transaction>()? {
            by_filing
                .entry(transaction.filing_id.clone())
                .or_default()
                .push(transaction);
        }

        for filing in waiting {
            let mut transactions = by_filing.remove(&filing.filing_id).unwrap_or_default();
            transactions.sort_by_key(|t| t.line_index);
            let event = NotificationEvent::for_filing(&filing, transactions);

            match self.notifier.notify(&event).await {
                Ok(receipt) => {
                    debug!(filing_id = %filing.filing_id, channel = %receipt.channel, "delivery confirmed");
                    match self.tracker.advance(&filing.filing_id, StatusEvent::NotifySucceeded) {
                        Ok(_) => summary.notified += 1,
                        Err(e) if e.is_store_failure() => return Err(e),
                        Err(e) => warn!(filing_id = %filing.filing_id, error = %e, "could not mark filing notified"),
                    }
                }
                Err(e) => {
                    warn!(filing_id = %filing.filing_id, error = %e, "notification failed, will retry next run");
                    summary.notification_failures.push(NotificationFailure {
                        filing_id: filing.filing_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
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

    fn at(hour: u32) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2024-03-05T{:02}:00:00Z", hour))
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_scrape_due() {
        assert!(scrape_due(None, at(10), 12));
        assert!(!scrape_due(Some(at(0)), at(11), 12));
        assert!(scrape_due(Some(at(0)), at(12), 12));
        assert!(scrape_due(Some(at(9)), at(9), 0));
    }

    #[test]
    fn test_document_digest() {
        assert_eq!(
            document_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_summary_display() {
        let mut summary = RunSummary::new("run-1".to_string());
        summary.processed = 2;
        summary.extracted = 1;
        summary.failed = 1;
        summary.failures.push(FailedFiling {
            filing_id: "F9".to_string(),
            last_error: "Unsupported layout".to_string(),
            attempt_count: 3,
            terminal: true,
        });

        let text = summary.to_string();
        assert!(text.contains("Processed: 2 (1 extracted, 1 failed)"));
        assert!(text.contains("F9 (attempt 3, no retries left): Unsupported layout"));
    }
}
