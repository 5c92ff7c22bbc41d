//! GeoIP country lookup using a MaxMind GeoLite2/GeoIP2 MMDB
//!
//! The database is memory-mapped once at startup and shared read-only by
//! every request.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use crate::models::CountryCode;

/// Resolves a visitor address to its country.
///
/// Implementations never fail loudly: an unparsable address, a database
/// miss and a lookup error all come back as `None`.
pub trait CountryLookup: Send + Sync {
    fn lookup_country(&self, address: &str) -> Option<CountryCode>;
}

/// Country lookup backed by a Country or City database
pub struct GeoIpService {
    reader: Arc<Reader<Mmap>>,
}

impl GeoIpService {
    /// Memory-map the MMDB file at `path`
    pub fn new(path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(path) }
            .with_context(|| format!("Failed to open GeoIP database at {}", path))?;

        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Lookup the ISO country code of an IP address
    pub fn lookup(&self, ip: IpAddr) -> Option<CountryCode> {
        let result = match self.reader.lookup(ip) {
            Ok(result) => result,
            Err(e) => {
                debug!("GeoIP lookup failed for {}: {}", ip, e);
                return None;
            }
        };

        // City databases are a superset of Country data, so this decode
        // works for both.
        let iso_code = match result.decode::<geoip2::Country>() {
            Ok(Some(country)) => country.country.iso_code?,
            Ok(None) => return None,
            Err(e) => {
                debug!("GeoIP record for {} could not be decoded: {}", ip, e);
                return None;
            }
        };

        match CountryCode::parse(iso_code) {
            Ok(code) => Some(code),
            Err(e) => {
                debug!("Ignoring GeoIP country for {}: {}", ip, e);
                None
            }
        }
    }
}

impl CountryLookup for GeoIpService {
    fn lookup_country(&self, address: &str) -> Option<CountryCode> {
        let ip = address.trim().parse::<IpAddr>().ok()?;
        self.lookup(ip)
    }
}

// Implement Clone by cloning the Arc
impl Clone for GeoIpService {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Lookups need a real MMDB file; only construction is covered here.

    #[test]
    fn test_geoip_service_creation_invalid_path() {
        let result = GeoIpService::new("/nonexistent/path.mmdb");
        assert!(result.is_err());
    }

    #[test]
    fn test_geoip_service_creation_not_an_mmdb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.mmdb");
        std::fs::write(&path, b"definitely not a maxmind database").unwrap();

        let result = GeoIpService::new(path.to_str().unwrap());
        assert!(result.is_err());
    }
}
