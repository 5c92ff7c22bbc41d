use crate::fingerprint::Fingerprint;
use crate::models::{CodecError, CountryCode, VisitorRecord};
use crate::threshold::Threshold;
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Histogram key for active visitors without a known country
pub const UNKNOWN_COUNTRY: &str = "Unknown";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid bucket name {0:?}")]
    InvalidBucket(String),
    #[error("corrupt record under key {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: CodecError,
    },
    #[error("ledger I/O error: {0}")]
    Io(#[from] sqlx::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Outcome of one count-and-evict sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityCounts {
    /// Records inside the active window
    pub active: u64,

    /// Active records per country code, `UNKNOWN_COUNTRY` for records without one.
    /// Countries with no active visitor are absent.
    pub by_country: BTreeMap<String, u64>,

    /// Records deleted because they fell outside the window
    pub evicted: u64,
}

impl ActivityCounts {
    pub fn add_active(&mut self, country: Option<&CountryCode>) {
        self.active += 1;
        let key = country.map_or(UNKNOWN_COUNTRY, CountryCode::as_str);
        *self.by_country.entry(key.to_string()).or_insert(0) += 1;
    }
}

/// Durable fingerprint -> visitor record store
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert or overwrite the record for a fingerprint
    async fn put(&self, fingerprint: &Fingerprint, record: &VisitorRecord) -> LedgerResult<()>;

    /// Point lookup; `None` if the fingerprint was never recorded or was evicted
    async fn get(&self, fingerprint: &Fingerprint) -> LedgerResult<Option<VisitorRecord>>;

    /// Count every active record and delete every stale one, atomically.
    ///
    /// `now` is Unix seconds. The whole sweep runs in one transaction: on
    /// error nothing is deleted.
    async fn count_and_evict(&self, threshold: &Threshold, now: i64)
        -> LedgerResult<ActivityCounts>;

    /// Number of stored records, active or not
    async fn len(&self) -> LedgerResult<u64>;

    /// Release the underlying file
    async fn close(&self);
}
