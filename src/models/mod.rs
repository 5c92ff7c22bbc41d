pub mod visitor;

pub use visitor::{CodecError, CountryCode, VisitorRecord, LEGACY_RECORD_LEN, RECORD_LEN};
