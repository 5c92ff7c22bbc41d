//! Fixed-layout visitor record stored in the ledger
//!
//! Layout (16 bytes):
//! - bytes 0..8: last visit, Unix seconds, `i64` little-endian
//! - bytes 8..16: ISO country code, ASCII, zero padded
//!
//! Deployments without GeoIP used to write only the first 8 bytes. Those
//! records still decode, with no country.

use std::fmt;
use thiserror::Error;

/// Size of an encoded record
pub const RECORD_LEN: usize = 16;

/// Size of a record written without the country field
pub const LEGACY_RECORD_LEN: usize = 8;

const COUNTRY_OFFSET: usize = 8;
const COUNTRY_LEN: usize = RECORD_LEN - COUNTRY_OFFSET;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("visitor record must be 16 or 8 bytes, got {0}")]
    InvalidLength(usize),
    #[error("country code {0:?} must be 1-8 non-zero ASCII bytes")]
    InvalidCountryCode(String),
}

/// ISO country code as reported by the GeoIP database
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CountryCode(String);

impl CountryCode {
    pub fn parse(code: &str) -> Result<Self, CodecError> {
        let valid = !code.is_empty()
            && code.len() <= COUNTRY_LEN
            && code.bytes().all(|b| b != 0 && b.is_ascii());

        if valid {
            Ok(Self(code.to_string()))
        } else {
            Err(CodecError::InvalidCountryCode(code.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last known activity of one visitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorRecord {
    /// Timestamp of the most recent visit (Unix seconds)
    pub last_visit: i64,

    /// Country of the visitor, if a lookup was configured and succeeded
    pub country: Option<CountryCode>,
}

impl VisitorRecord {
    pub fn new(last_visit: i64, country: Option<CountryCode>) -> Self {
        Self {
            last_visit,
            country,
        }
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[..COUNTRY_OFFSET].copy_from_slice(&self.last_visit.to_le_bytes());

        if let Some(ref country) = self.country {
            for (slot, byte) in out[COUNTRY_OFFSET..]
                .iter_mut()
                .zip(country.as_str().bytes())
            {
                *slot = byte;
            }
        }

        out
    }

    pub fn decode(bytes: &[u8; RECORD_LEN]) -> Self {
        // Only non-zero ASCII bytes contribute to the code, wherever they sit.
        let code: String = bytes[COUNTRY_OFFSET..]
            .iter()
            .filter(|&&b| b != 0 && b.is_ascii())
            .map(|&b| char::from(b))
            .collect();

        Self {
            last_visit: decode_timestamp(bytes),
            country: (!code.is_empty()).then_some(CountryCode(code)),
        }
    }
}

impl TryFrom<&[u8]> for VisitorRecord {
    type Error = CodecError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        match bytes.len() {
            RECORD_LEN => {
                let mut buf = [0u8; RECORD_LEN];
                buf.copy_from_slice(bytes);
                Ok(Self::decode(&buf))
            }
            LEGACY_RECORD_LEN => Ok(Self {
                last_visit: decode_timestamp(bytes),
                country: None,
            }),
            other => Err(CodecError::InvalidLength(other)),
        }
    }
}

fn decode_timestamp(bytes: &[u8]) -> i64 {
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&bytes[..COUNTRY_OFFSET]);
    i64::from_le_bytes(ts)
}
