// ✅ Extraction Quality - decides whether a document counts as extracted
//
// Collects a TransactionStream into parsed rows plus row diagnostics and
// applies the min-rows policy. Flagged = extracted, but some rows failed.

use crate::entities::{ExtractionConfidence, Transaction};
use crate::error::ExtractionError;
use serde::{Deserialize, Serialize};

// ============================================================================
// ROW DIAGNOSTIC
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowDiagnostic {
    pub line_index: usize,
    pub reason: String,
    pub raw_line: String,
}

impl RowDiagnostic {
    /// Form stored on the filing record
    pub fn describe(&self) -> String {
        format!(
            "row {}: {} [{}]",
            self.line_index,
            self.reason,
            self.raw_line.replace('\n', " / ")
        )
    }
}

// ============================================================================
// EXTRACTION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionReport {
    pub transactions: Vec<Transaction>,
    pub diagnostics: Vec<RowDiagnostic>,
}

impl ExtractionReport {
    /// Drain a row sequence; document-level errors never appear as items
    pub fn collect<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Result<Transaction, ExtractionError>>,
    {
        let mut report = ExtractionReport {
            transactions: Vec::new(),
            diagnostics: Vec::new(),
        };

        for row in rows {
            match row {
                Ok(transaction) => report.transactions.push(transaction),
                Err(ExtractionError::PartialExtraction {
                    line_index,
                    reason,
                    raw_line,
                }) => report.diagnostics.push(RowDiagnostic {
                    line_index,
                    reason,
                    raw_line,
                }),
                Err(other) => report.diagnostics.push(RowDiagnostic {
                    line_index: report.transactions.len() + report.diagnostics.len(),
                    reason: other.to_string(),
                    raw_line: String::new(),
                }),
            }
        }

        report
    }

    pub fn parsed_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn heuristic_count(&self) -> usize {
        self.transactions
            .iter()
            .filter(|t| t.extraction_confidence == ExtractionConfidence::Heuristic)
            .count()
    }

    pub fn is_flagged(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn meets_threshold(&self, min_rows: usize) -> bool {
        self.parsed_count() >= min_rows.max(1)
    }

    pub fn diagnostic_lines(&self) -> Vec<String> {
        self.diagnostics.iter().map(RowDiagnostic::describe).collect()
    }

    /// Apply the success policy
    ///
    /// # Returns
    /// * `Ok(())` - at least `min_rows` rows parsed
    /// * `Err(ExtractionError)` - the error recorded as the filing's `last_error`
    pub fn verdict(&self, min_rows: usize) -> Result<(), ExtractionError> {
        if self.meets_threshold(min_rows) {
            return Ok(());
        }

        match self.diagnostics.first() {
            Some(first) => Err(ExtractionError::PartialExtraction {
                line_index: first.line_index,
                reason: format!(
                    "{} of {} rows parsed (need {}); first failure: {}",
                    self.parsed_count(),
                    self.parsed_count() + self.diagnostics.len(),
                    min_rows.max(1),
                    first.reason
                ),
                raw_line: first.raw_line.clone(),
            }),
            None => Err(ExtractionError::PartialExtraction {
                line_index: 0,
                reason: format!(
                    "no transactions found ({} parsed, need {})",
                    self.parsed_count(),
                    min_rows.max(1)
                ),
                raw_line: String::new(),
            }),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Rows: {} parsed ({} heuristic), {} diagnostics",
            self.parsed_count(),
            self.heuristic_count(),
            self.diagnostics.len()
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{OwnerCategory, TransactionType};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn create_transaction(line_index: usize, confidence: ExtractionConfidence) -> Transaction {
        Transaction {
            filing_id: "F1".to_string(),
            line_index,
            owner_category: OwnerCategory::Member,
            asset_description: "Apple Inc.".to_string(),
            ticker: Some("AAPL".to_string()),
            asset_type: Some("ST".to_string()),
            transaction_type: TransactionType::Buy,
            partial: false,
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            notification_date: None,
            amount_range: "$1,001 - $15,000".to_string(),
            amount_low: 1_001,
            amount_high: Some(15_000),
            extraction_confidence: confidence,
            owner_code: None,
            raw_line: "Apple Inc. (AAPL) [ST] P 01/15/2024 01/20/2024 $1,001 - $15,000".to_string(),
            extra: BTreeMap::new(),
        }
    }

    fn row_error(line_index: usize) -> ExtractionError {
        ExtractionError::PartialExtraction {
            line_index,
            reason: "invalid transaction date: '02/30/2024' is not a valid date".to_string(),
            raw_line: "Broken (BRK) P 02/30/2024".to_string(),
        }
    }

    #[test]
    fn test_collect_splits_rows_and_diagnostics() {
        let report = ExtractionReport::collect(vec![
            Ok(create_transaction(0, ExtractionConfidence::Exact)),
            Ok(create_transaction(1, ExtractionConfidence::Heuristic)),
            Err(row_error(2)),
        ]);

        assert_eq!(report.parsed_count(), 2);
        assert_eq!(report.heuristic_count(), 1);
        assert!(report.is_flagged());
        assert!(report.verdict(1).is_ok());
        assert_eq!(report.summary(), "Rows: 2 parsed (1 heuristic), 1 diagnostics");
        assert!(report.diagnostic_lines()[0].starts_with("row 2: invalid transaction date"));
    }

    #[test]
    fn test_no_rows_fails() {
        let report = ExtractionReport::collect(Vec::new());
        let err = report.verdict(1).unwrap_err();
        assert!(err.to_string().contains("no transactions found"));
    }

    #[test]
    fn test_zero_threshold_still_needs_one_row() {
        let report = ExtractionReport::collect(Vec::new());
        assert!(!report.meets_threshold(0));
    }

    #[test]
    fn test_below_threshold_reports_first_failure() {
        let report = ExtractionReport::collect(vec![
            Ok(create_transaction(0, ExtractionConfidence::Exact)),
            Err(row_error(1)),
        ]);

        match report.verdict(2) {
            Err(ExtractionError::PartialExtraction {
                line_index, reason, ..
            }) => {
                assert_eq!(line_index, 1);
                assert!(reason.starts_with("1 of 2 rows parsed (need 2)"));
            }
            other => panic!("expected PartialExtraction, got {:?}", other),
        }
    }
}
