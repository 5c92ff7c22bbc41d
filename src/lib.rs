pub mod analytics;
pub mod api;
pub mod config;
pub mod fingerprint;
pub mod models;
pub mod service;
pub mod storage;
pub mod threshold;

/// Name of the ledger bucket holding visitor records
pub const BUCKET: &str = "ipcount";
