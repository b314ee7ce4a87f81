// 🛠️ Admin - operator actions on stored filings
//
// Used by the CLI; every action goes through the store or the status tracker,
// never around them.

use crate::entities::{Filing, FilingStatus, Transaction};
use crate::error::{MonitorError, Result};
use crate::status::StatusTracker;
use crate::store::RecordStore;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub filing_id: String,
    pub transactions_removed: usize,
}

/// A filing with its extracted transactions, ordered by line
#[derive(Debug, Clone, PartialEq)]
pub struct FilingDetail {
    pub filing: Filing,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Default)]
pub struct FilingFilter {
    pub status: Option<FilingStatus>,
    /// Case-insensitive substring of the member name
    pub member: Option<String>,
}

impl FilingFilter {
    pub fn matches(&self, filing: &Filing) -> bool {
        if let Some(status) = self.status {
            if filing.status != status {
                return false;
            }
        }
        match &self.member {
            Some(member) => filing
                .member_name
                .to_lowercase()
                .contains(&member.trim().to_lowercase()),
            None => true,
        }
    }
}

pub struct Admin {
    store: Arc<RecordStore>,
    tracker: StatusTracker,
}

impl Admin {
    pub fn new(store: Arc<RecordStore>, max_retry_attempts: u32) -> Self {
        let tracker = StatusTracker::new(Arc::clone(&store), max_retry_attempts);
        Admin { store, tracker }
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    /// Remove a filing and its transactions
    ///
    /// Transactions go first: a crash in between leaves a filing without
    /// rows, which the next extraction repopulates, never orphaned rows.
    pub fn delete_filing(&self, filing_id: &str) -> Result<DeletionReport> {
        self.tracker.get(filing_id)?;

        let transactions_removed = self
            .store
            .replace_group(|t: &Transaction| t.filing_id == filing_id, &[])?;
        if !self.store.delete::<Filing>(filing_id)? {
            return Err(MonitorError::FilingNotFound(filing_id.to_string()));
        }

        info!(filing_id, transactions_removed, "filing deleted");
        Ok(DeletionReport {
            filing_id: filing_id.to_string(),
            transactions_removed,
        })
    }

    /// What `delete_filing` would remove, without writing anything
    pub fn preview_deletion(&self, filing_id: &str) -> Result<DeletionReport> {
        self.tracker.get(filing_id)?;
        let transactions_removed = self
            .store
            .get_all::<Transaction>()?
            .iter()
            .filter(|t| t.filing_id == filing_id)
            .count();

        Ok(DeletionReport {
            filing_id: filing_id.to_string(),
            transactions_removed,
        })
    }

    /// Give a failed filing its retry budget back
    pub fn reset_filing(&self, filing_id: &str) -> Result<Filing> {
        self.tracker.reset(filing_id)
    }

    /// Filings matching the filter, newest first
    pub fn list_filings(&self, filter: &FilingFilter) -> Result<Vec<Filing>> {
        let mut filings: Vec<Filing> = self
            .tracker
            .all()?
            .into_iter()
            .filter(|filing| filter.matches(filing))
            .collect();
        filings.sort_by(|a, b| {
            b.filing_date
                .cmp(&a.filing_date)
                .then_with(|| a.filing_id.cmp(&b.filing_id))
        });
        Ok(filings)
    }

    pub fn show_filing(&self, filing_id: &str) -> Result<FilingDetail> {
        let filing = self.tracker.get(filing_id)?;
        let mut transactions: Vec<Transaction> = self
            .store
            .get_all::<Transaction>()?
            .into_iter()
            .filter(|t| t.filing_id == filing_id)
            .collect();
        transactions.sort_by_key(|t| t.line_index);

        Ok(FilingDetail {
            filing,
            transactions,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Chamber, ExtractionConfidence, OwnerCategory, TransactionType};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Admin) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(dir.path()).unwrap());
        (dir, Admin::new(store, 3))
    }

    fn create_filing(id: &str, member: &str, day: u32) -> Filing {
        Filing::discovered(
            id,
            member,
            Chamber::House,
            NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            format!("https://x.test/{}.pdf", id),
        )
    }

    fn create_transaction(filing_id: &str, line_index: usize) -> Transaction {
        Transaction {
            filing_id: filing_id.to_string(),
            line_index,
            owner_category: OwnerCategory::Member,
            asset_description: "Microsoft Corporation".to_string(),
            ticker: Some("MSFT".to_string()),
            asset_type: Some("ST".to_string()),
            transaction_type: TransactionType::Sell,
            partial: false,
            transaction_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            notification_date: None,
            amount_range: "$15,001 - $50,000".to_string(),
            amount_low: 15_001,
            amount_high: Some(50_000),
            extraction_confidence: ExtractionConfidence::Exact,
            owner_code: None,
            raw_line: String::new(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_delete_filing_removes_transactions() {
        let (_dir, admin) = setup();
        admin
            .tracker()
            .register_discovered(&[create_filing("F1", "Doe, Jane", 1), create_filing("F2", "Roe, Rick", 2)])
            .unwrap();
        admin
            .store
            .upsert_many(&[
                create_transaction("F1", 0),
                create_transaction("F1", 1),
                create_transaction("F2", 0),
            ])
            .unwrap();

        let report = admin.delete_filing("F1").unwrap();
        assert_eq!(report.transactions_removed, 2);
        assert!(matches!(
            admin.show_filing("F1"),
            Err(MonitorError::FilingNotFound(_))
        ));
        assert_eq!(admin.show_filing("F2").unwrap().transactions.len(), 1);
    }

    #[test]
    fn test_preview_deletion_writes_nothing() {
        let (_dir, admin) = setup();
        admin
            .tracker()
            .register_discovered(&[create_filing("F1", "Doe, Jane", 1)])
            .unwrap();
        admin
            .store
            .upsert_many(&[create_transaction("F1", 0), create_transaction("F1", 1)])
            .unwrap();

        let preview = admin.preview_deletion("F1").unwrap();
        assert_eq!(preview.transactions_removed, 2);
        assert_eq!(admin.show_filing("F1").unwrap().transactions.len(), 2);

        assert_eq!(admin.delete_filing("F1").unwrap(), preview);
        assert!(matches!(
            admin.preview_deletion("F1"),
            Err(MonitorError::FilingNotFound(_))
        ));
    }

    #[test]
    fn test_delete_unknown_filing() {
        let (_dir, admin) = setup();
        assert!(matches!(
            admin.delete_filing("nope"),
            Err(MonitorError::FilingNotFound(_))
        ));
    }

    #[test]
    fn test_list_filters_and_orders() {
        let (_dir, admin) = setup();
        admin
            .tracker()
            .register_discovered(&[
                create_filing("F1", "Doe, Jane", 1),
                create_filing("F2", "Roe, Rick", 2),
                create_filing("F3", "Doe, John", 3),
            ])
            .unwrap();

        let filter = FilingFilter {
            status: Some(FilingStatus::Discovered),
            member: Some("doe".to_string()),
        };
        let ids: Vec<String> = admin
            .list_filings(&filter)
            .unwrap()
            .into_iter()
            .map(|f| f.filing_id)
            .collect();
        assert_eq!(ids, vec!["F3", "F1"]);

        let failed = FilingFilter {
            status: Some(FilingStatus::Failed),
            member: None,
        };
        assert!(admin.list_filings(&failed).unwrap().is_empty());
    }

    #[test]
    fn test_reset_requires_failed() {
        let (_dir, admin) = setup();
        admin
            .tracker()
            .register_discovered(&[create_filing("F1", "Doe, Jane", 1)])
            .unwrap();
        assert!(matches!(
            admin.reset_filing("F1"),
            Err(MonitorError::InvalidTransition { .. })
        ));
    }
}
