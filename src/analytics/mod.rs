//! Optional visitor geolocation
//!
//! When a MaxMind database is configured, each recorded visit is tagged with
//! the visitor's ISO country code. Without one, visits are stored with no
//! country and counted under "Unknown".

pub mod geoip;

pub use geoip::{CountryLookup, GeoIpService};
