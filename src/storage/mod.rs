pub mod sqlite;
pub mod trait_def;

pub use sqlite::SqliteLedger;
pub use trait_def::{ActivityCounts, Ledger, LedgerError, LedgerResult, UNKNOWN_COUNTRY};
