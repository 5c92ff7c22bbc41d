//! Keyed visitor fingerprints
//!
//! Raw addresses never reach the ledger. Each one is replaced by an
//! HMAC-SHA-256 digest keyed with the configured secret, so stored keys can
//! neither be reversed nor forged without that secret.

use anyhow::{anyhow, Result};
use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Size of a fingerprint in bytes
pub const FINGERPRINT_LEN: usize = 32;

/// Opaque ledger key derived from a visitor address
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE64_URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// Computes fingerprints for a fixed secret
#[derive(Clone)]
pub struct Fingerprinter {
    /// MAC already keyed with the secret; cloned per call so no state is shared
    keyed: HmacSha256,
}

impl Fingerprinter {
    pub fn new(secret: &str) -> Result<Self> {
        let keyed = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow!("Failed to create HMAC: {}", e))?;
        Ok(Self { keyed })
    }

    pub fn fingerprint(&self, address: &str) -> Fingerprint {
        let mut mac = self.keyed.clone();
        mac.update(address.as_bytes());

        let mut out = [0u8; FINGERPRINT_LEN];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Fingerprint(out)
    }
}

impl fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprinter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let hasher = Fingerprinter::new("test_secret").unwrap();
        assert_eq!(
            hasher.fingerprint("203.0.113.7"),
            hasher.fingerprint("203.0.113.7")
        );
    }

    #[test]
    fn test_fingerprint_depends_on_secret() {
        let a = Fingerprinter::new("secret-one").unwrap().fingerprint("203.0.113.7");
        let b = Fingerprinter::new("secret-two").unwrap().fingerprint("203.0.113.7");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_depends_on_address() {
        let hasher = Fingerprinter::new("test_secret").unwrap();
        assert_ne!(
            hasher.fingerprint("203.0.113.7"),
            hasher.fingerprint("203.0.113.8")
        );
    }

    #[test]
    fn test_fingerprint_matches_hmac_sha256() {
        // RFC 4231, test case 2
        let hasher = Fingerprinter::new("Jefe").unwrap();
        let fp = hasher.fingerprint("what do ya want for nothing?");
        let expected: [u8; 32] = [
            0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95,
            0x75, 0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9,
            0x64, 0xec, 0x38, 0x43,
        ];
        assert_eq!(fp.as_bytes(), &expected);
    }

    #[test]
    fn test_empty_secret_is_accepted() {
        let hasher = Fingerprinter::new("").unwrap();
        assert_eq!(hasher.fingerprint("::1"), hasher.fingerprint("::1"));
    }

    #[test]
    fn test_display_is_url_safe_base64() {
        let fp = Fingerprint::from_bytes([0xff; FINGERPRINT_LEN]);
        let rendered = fp.to_string();
        assert_eq!(rendered.len(), 43);
        assert!(!rendered.contains('='));
        assert!(!rendered.contains('+'));
    }
}
