// Entity Models
// Filings and the transactions extracted from them
//
// Each entity has:
// - Stable identity (filing_id, or filing_id + line_index)
// - Typed fields validated at the store boundary
// - Extensible metadata: unknown on-disk fields survive a rewrite

pub mod filing;
pub mod transaction;

pub use filing::{Chamber, Filing, FilingStatus, StatusEvent};
pub use transaction::{ExtractionConfidence, OwnerCategory, Transaction, TransactionType};
