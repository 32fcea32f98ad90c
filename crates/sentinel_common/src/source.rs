//! Alert source channels and their per-channel defaults.
//!
//! Every alert enters the system tagged with the domain channel that
//! produced it. The channel decides the alert-ID prefix and the default
//! severity an untagged event starts with.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::alert::AlertSeverity;
use crate::error::SentinelError;

/// Originating domain channel for an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Overspeeding,
    Compliance,
    FeedbackNegative,
    FeedbackPositive,
    DocumentExpiry,
    Safety,
}

/// All source types, in prefix-map order
pub const ALL_SOURCE_TYPES: [SourceType; 6] = [
    SourceType::Overspeeding,
    SourceType::Compliance,
    SourceType::FeedbackNegative,
    SourceType::FeedbackPositive,
    SourceType::DocumentExpiry,
    SourceType::Safety,
];

impl SourceType {
    /// Wire value, as persisted and exposed to collaborators
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overspeeding => "OVERSPEEDING",
            Self::Compliance => "COMPLIANCE",
            Self::FeedbackNegative => "FEEDBACK_NEGATIVE",
            Self::FeedbackPositive => "FEEDBACK_POSITIVE",
            Self::DocumentExpiry => "DOCUMENT_EXPIRY",
            Self::Safety => "SAFETY",
        }
    }

    /// Three-letter alert-ID prefix for this channel
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Overspeeding => "OSP",
            Self::Compliance => "CMP",
            Self::FeedbackNegative => "FBN",
            Self::FeedbackPositive => "FBP",
            Self::DocumentExpiry => "DOC",
            Self::Safety => "SAF",
        }
    }

    /// Severity a new alert starts with when the caller supplies none
    pub fn default_severity(&self) -> AlertSeverity {
        match self {
            Self::Safety => AlertSeverity::Critical,
            Self::Overspeeding | Self::FeedbackNegative | Self::DocumentExpiry => {
                AlertSeverity::Warning
            }
            Self::Compliance | Self::FeedbackPositive => AlertSeverity::Info,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OVERSPEEDING" => Ok(Self::Overspeeding),
            "COMPLIANCE" => Ok(Self::Compliance),
            "FEEDBACK_NEGATIVE" => Ok(Self::FeedbackNegative),
            "FEEDBACK_POSITIVE" => Ok(Self::FeedbackPositive),
            "DOCUMENT_EXPIRY" => Ok(Self::DocumentExpiry),
            "SAFETY" => Ok(Self::Safety),
            other => Err(SentinelError::Validation(format!(
                "unknown source type: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_are_unique() {
        let mut prefixes: Vec<&str> = ALL_SOURCE_TYPES.iter().map(|s| s.prefix()).collect();
        prefixes.sort();
        prefixes.dedup();
        assert_eq!(prefixes.len(), ALL_SOURCE_TYPES.len());
    }

    #[test]
    fn test_default_severity_map() {
        assert_eq!(
            SourceType::Safety.default_severity(),
            AlertSeverity::Critical
        );
        assert_eq!(
            SourceType::Overspeeding.default_severity(),
            AlertSeverity::Warning
        );
        assert_eq!(
            SourceType::DocumentExpiry.default_severity(),
            AlertSeverity::Warning
        );
        assert_eq!(
            SourceType::Compliance.default_severity(),
            AlertSeverity::Info
        );
        assert_eq!(
            SourceType::FeedbackPositive.default_severity(),
            AlertSeverity::Info
        );
    }

    #[test]
    fn test_wire_value_round_trip() {
        for source in ALL_SOURCE_TYPES {
            let parsed: SourceType = source.as_str().parse().unwrap();
            assert_eq!(parsed, source);
            let json = serde_json::to_string(&source).unwrap();
            assert_eq!(json, format!("\"{}\"", source.as_str()));
        }
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        assert!("SPEEDING".parse::<SourceType>().is_err());
    }
}
