//! Visitor service: the three operations exposed over HTTP
//!
//! Counting is also garbage collection. Every count sweeps the whole ledger
//! and deletes the visitors that fell out of the active window.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info};

use crate::analytics::CountryLookup;
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::models::VisitorRecord;
use crate::storage::{ActivityCounts, Ledger, LedgerError};
use crate::threshold::Threshold;

/// Histogram key holding the number of active visitors across all countries
pub const TOTAL_KEY: &str = "Total";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("missing visitor address")]
    MissingAddress,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub struct VisitorService {
    ledger: Box<dyn Ledger>,
    fingerprinter: Fingerprinter,
    threshold: Threshold,
    countries: Option<Box<dyn CountryLookup>>,
}

impl VisitorService {
    pub fn new(ledger: Box<dyn Ledger>, fingerprinter: Fingerprinter, threshold: Threshold) -> Self {
        Self {
            ledger,
            fingerprinter,
            threshold,
            countries: None,
        }
    }

    /// Tag recorded visits with the country returned by `lookup`
    pub fn with_country_lookup(mut self, lookup: Box<dyn CountryLookup>) -> Self {
        self.countries = Some(lookup);
        self
    }

    pub fn threshold(&self) -> &Threshold {
        &self.threshold
    }

    pub fn fingerprint(&self, address: &str) -> Fingerprint {
        self.fingerprinter.fingerprint(address)
    }

    /// Record a visit from `address` now
    pub async fn record_visit(&self, address: &str) -> ServiceResult<()> {
        self.record_visit_at(address, Utc::now().timestamp()).await
    }

    /// Record a visit from `address` at `at` (Unix seconds)
    pub async fn record_visit_at(&self, address: &str, at: i64) -> ServiceResult<()> {
        if address.is_empty() {
            return Err(ServiceError::MissingAddress);
        }

        let fingerprint = self.fingerprinter.fingerprint(address);
        let country = self
            .countries
            .as_ref()
            .and_then(|lookup| lookup.lookup_country(address));

        debug!(
            "Recording visit {} (country: {})",
            fingerprint,
            country.as_ref().map_or("unknown", |c| c.as_str())
        );

        self.ledger
            .put(&fingerprint, &VisitorRecord::new(at, country))
            .await?;
        Ok(())
    }

    /// Number of visitors active right now
    pub async fn count_active(&self) -> ServiceResult<u64> {
        Ok(self.sweep_at(Utc::now().timestamp()).await?.active)
    }

    /// Active visitors per country, plus `TOTAL_KEY` and, when needed, `UNKNOWN_COUNTRY`
    pub async fn count_by_country(&self) -> ServiceResult<BTreeMap<String, u64>> {
        let counts = self.sweep_at(Utc::now().timestamp()).await?;

        let mut histogram = counts.by_country;
        histogram.insert(TOTAL_KEY.to_string(), counts.active);
        Ok(histogram)
    }

    /// Count and evict as of `now` (Unix seconds)
    pub async fn sweep_at(&self, now: i64) -> ServiceResult<ActivityCounts> {
        let counts = self.ledger.count_and_evict(&self.threshold, now).await?;
        if counts.evicted > 0 {
            debug!("Evicted {} stale visitors", counts.evicted);
        }
        Ok(counts)
    }

    /// Stored record for `address`, if any
    pub async fn lookup(&self, address: &str) -> ServiceResult<Option<VisitorRecord>> {
        if address.is_empty() {
            return Err(ServiceError::MissingAddress);
        }

        let fingerprint = self.fingerprinter.fingerprint(address);
        Ok(self.ledger.get(&fingerprint).await?)
    }

    /// Total stored records, including ones not yet evicted
    pub async fn stored(&self) -> ServiceResult<u64> {
        Ok(self.ledger.len().await?)
    }

    /// Periodically sweep the ledger so it stays bounded without count traffic.
    ///
    /// Stops when `shutdown` turns true. A zero `interval` disables the
    /// sweeper and returns `None`.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }

        let service = Arc::clone(self);

        Some(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            // Skip the first tick which fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = service.sweep_at(Utc::now().timestamp()).await {
                            error!("Background sweep failed: {}", e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Background sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        }))
    }

    /// Release the ledger file. The GeoIP mapping goes with the service itself.
    pub async fn close(&self) {
        self.ledger.close().await;
        info!("Ledger closed");
    }
}
