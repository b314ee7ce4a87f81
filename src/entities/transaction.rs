// 💱 Transaction Entity - one trade line extracted from a filing
//
// Identity is (filing_id, line_index): re-extracting the same document
// produces the same ids, so a filing's set is replaced rather than appended.

use crate::store::{Collection, Record};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerCategory {
    Member,
    Spouse,
    DependentChild,
}

impl OwnerCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerCategory::Member => "Member",
            OwnerCategory::Spouse => "Spouse",
            OwnerCategory::DependentChild => "Dependent Child",
        }
    }
}

impl fmt::Display for OwnerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Buy,
    Sell,
    Exchange,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "Buy",
            TransactionType::Sell => "Sell",
            TransactionType::Exchange => "Exchange",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the row matched its layout's column pattern or was recovered heuristically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionConfidence {
    Exact,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    pub filing_id: String,
    pub line_index: usize,

    // ========================================================================
    // CORE FIELDS
    // ========================================================================
    pub owner_category: OwnerCategory,
    pub asset_description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,

    /// Bracketed asset class code, e.g. "ST" for stock
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,

    pub transaction_type: TransactionType,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,

    pub transaction_date: NaiveDate,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_date: Option<NaiveDate>,

    /// Normalized label, e.g. "$1,001 - $15,000"
    pub amount_range: String,
    pub amount_low: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_high: Option<u64>,

    // ========================================================================
    // PROVENANCE
    // ========================================================================
    pub extraction_confidence: ExtractionConfidence,

    /// Owner code printed on the row (SP/DC/JT); the category comes from section headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_code: Option<String>,

    pub raw_line: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Transaction {
    /// Stable dedup key as a store id
    pub fn key(filing_id: &str, line_index: usize) -> String {
        format!("{}:{}", filing_id, line_index)
    }

    /// One-line description used by notifications and the CLI
    pub fn headline(&self) -> String {
        let asset = match &self.ticker {
            Some(ticker) => ticker.clone(),
            None => self.asset_description.clone(),
        };
        format!(
            "{} {} {} ({}, {})",
            self.transaction_type,
            asset,
            self.amount_range,
            self.owner_category,
            self.transaction_date.format("%m/%d/%Y")
        )
    }
}

impl Record for Transaction {
    const COLLECTION: Collection = Collection::Transactions;

    fn record_id(&self) -> String {
        Transaction::key(&self.filing_id, self.line_index)
    }

    fn validate(&self) -> Result<(), String> {
        if self.filing_id.trim().is_empty() {
            return Err("filing_id is empty".to_string());
        }
        if self.asset_description.trim().is_empty() {
            return Err("asset_description is empty".to_string());
        }
        if self.amount_range.trim().is_empty() {
            return Err("amount_range is empty".to_string());
        }
        if let Some(high) = self.amount_high {
            if high < self.amount_low {
                return Err(format!(
                    "amount_high {} is below amount_low {}",
                    high, self.amount_low
                ));
            }
        }
        Ok(())
    }
}
