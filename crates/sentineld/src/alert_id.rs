//! Monotonic alert-ID generation.
//!
//! IDs have the form `{PREFIX}-{YEAR}-{NNNNN}`, e.g. `OSP-2025-00001`.
//! The sequence comes from an atomic counter per `(prefix, year)`, so IDs
//! are unique and strictly increasing within that scope. Sequences are
//! zero-padded to five digits and simply grow wider past 99999; values
//! are never reused.

use chrono::{Datelike, Utc};

use sentinel_common::counter_store::CounterStore;
use sentinel_common::source::ALL_SOURCE_TYPES;
use sentinel_common::{SentinelError, SourceType};

#[derive(Clone)]
pub struct AlertIdGenerator {
    counters: CounterStore,
}

impl AlertIdGenerator {
    pub fn new(counters: CounterStore) -> Self {
        Self { counters }
    }

    /// Generate the next ID for this source type. The only side effect is
    /// the counter increment; store failures surface as retriable errors.
    pub async fn generate(&self, source_type: SourceType) -> Result<String, SentinelError> {
        let prefix = source_type.prefix();
        let year = Utc::now().year();
        let sequence = self.counters.next(&counter_key(prefix, year)).await?;
        Ok(format_alert_id(prefix, year, sequence))
    }
}

/// Counter document id for a `(prefix, year)` scope
pub fn counter_key(prefix: &str, year: i32) -> String {
    format!("alert_{prefix}_{year}")
}

pub fn format_alert_id(prefix: &str, year: i32, sequence: i64) -> String {
    format!("{prefix}-{year}-{sequence:05}")
}

/// Whether a string matches the published ID format:
/// `^(OSP|CMP|FBN|FBP|DOC|SAF)-\d{4}-\d{5,}$`
pub fn is_valid_alert_id(alert_id: &str) -> bool {
    let mut parts = alert_id.splitn(3, '-');
    let (Some(prefix), Some(year), Some(sequence)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    ALL_SOURCE_TYPES.iter().any(|s| s.prefix() == prefix)
        && year.len() == 4
        && year.bytes().all(|b| b.is_ascii_digit())
        && sequence.len() >= 5
        && sequence.bytes().all(|b| b.is_ascii_digit())
}

/// Numeric suffix of a well-formed alert ID
pub fn parse_sequence(alert_id: &str) -> Option<i64> {
    if !is_valid_alert_id(alert_id) {
        return None;
    }
    alert_id.rsplit('-').next()?.parse().ok()
}
