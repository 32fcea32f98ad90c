//! Alert documents and the lifecycle state machine.
//!
//! An alert is born OPEN, may be escalated by the rule engine, and ends in
//! exactly one of two terminal states: AUTO_CLOSED (by the scanner) or
//! RESOLVED (by a person). Every transition is validated against the
//! allowed-transition table and appended to the alert's state history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SentinelError;
use crate::source::SourceType;

/// Actor name recorded on transitions the engine performs itself
pub const SYSTEM_ACTOR: &str = "system";

/// Reason recorded on the synthetic creation entry in state history
pub const CREATION_REASON: &str = "Alert created";

/// Alert severity, promoted to CRITICAL on escalation and never demoted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Self::Info),
            "WARNING" => Ok(Self::Warning),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(SentinelError::Validation(format!(
                "unknown severity: {other}"
            ))),
        }
    }
}

/// Alert lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Open,
    Escalated,
    AutoClosed,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Escalated => "ESCALATED",
            Self::AutoClosed => "AUTO_CLOSED",
            Self::Resolved => "RESOLVED",
        }
    }

    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AutoClosed | Self::Resolved)
    }

    /// States this status may legally move to. Self-transitions are never
    /// allowed.
    pub fn allowed_transitions(&self) -> &'static [AlertStatus] {
        match self {
            Self::Open => &[Self::Escalated, Self::AutoClosed, Self::Resolved],
            Self::Escalated => &[Self::AutoClosed, Self::Resolved],
            Self::AutoClosed | Self::Resolved => &[],
        }
    }

    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Validate a transition, surfacing the standard error on rejection
    pub fn ensure_can_transition_to(&self, next: AlertStatus) -> Result<(), SentinelError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(SentinelError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "ESCALATED" => Ok(Self::Escalated),
            "AUTO_CLOSED" => Ok(Self::AutoClosed),
            "RESOLVED" => Ok(Self::Resolved),
            other => Err(SentinelError::Validation(format!(
                "unknown alert status: {other}"
            ))),
        }
    }
}

/// One immutable entry in an alert's state history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertStateTransition {
    pub from_status: AlertStatus,
    pub to_status: AlertStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    /// User id, or [`SYSTEM_ACTOR`] for engine-driven transitions
    pub triggered_by: String,
    /// Rule that caused the transition, when one did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_triggered: Option<String>,
}

impl AlertStateTransition {
    /// The synthetic first record every alert starts with, so iterating
    /// state history covers the whole lifecycle including creation.
    pub fn creation(now: DateTime<Utc>) -> Self {
        Self {
            from_status: AlertStatus::Open,
            to_status: AlertStatus::Open,
            timestamp: now,
            reason: CREATION_REASON.to_string(),
            triggered_by: SYSTEM_ACTOR.to_string(),
            rule_triggered: None,
        }
    }
}

/// A flagged fleet event plus the state machine tracking its resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Globally unique id of form `{PREFIX}-{YEAR}-{NNNNN}`, immutable
    pub alert_id: String,
    pub source_type: SourceType,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    /// Event time of the originating incident
    pub timestamp: DateTime<Utc>,
    /// Opaque domain attributes; the engine reads only `driver_id` and
    /// `document_valid`
    pub metadata: Map<String, Value>,
    /// Append-only transition log, starting with the creation record
    pub state_history: Vec<AlertStateTransition>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub auto_close_reason: Option<String>,
    /// Past this instant the alert is eligible for time-based auto-close
    pub expires_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Whether the alert can still move (OPEN or ESCALATED)
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Driver the alert is about, when metadata carries one
    pub fn driver_id(&self) -> Option<&str> {
        self.metadata.get("driver_id").and_then(Value::as_str)
    }

    /// `document_valid` metadata flag, when present and boolean
    pub fn document_valid(&self) -> Option<bool> {
        self.metadata.get("document_valid").and_then(Value::as_bool)
    }
}

/// Input for alert creation. The store assigns the id, status, and
/// bookkeeping timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub source_type: SourceType,
    /// Overrides the per-source default severity
    #[serde(default)]
    pub severity: Option<AlertSeverity>,
    /// Event time of the incident; creation wall-clock when absent
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Overrides the default retention window (`created_at + 7 days`)
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NewAlert {
    pub fn new(source_type: SourceType) -> Self {
        Self {
            source_type,
            severity: None,
            timestamp: None,
            expires_at: None,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use AlertStatus::*;

        assert!(Open.can_transition_to(Escalated));
        assert!(Open.can_transition_to(AutoClosed));
        assert!(Open.can_transition_to(Resolved));
        assert!(Escalated.can_transition_to(AutoClosed));
        assert!(Escalated.can_transition_to(Resolved));

        // Escalation only happens from OPEN
        assert!(!Escalated.can_transition_to(Open));
        assert!(!Resolved.can_transition_to(Open));

        // Terminal states admit nothing
        for next in [Open, Escalated, AutoClosed, Resolved] {
            assert!(!AutoClosed.can_transition_to(next));
            assert!(!Resolved.can_transition_to(next));
        }
    }

    #[test]
    fn test_self_transitions_rejected() {
        use AlertStatus::*;
        for status in [Open, Escalated, AutoClosed, Resolved] {
            assert!(!status.can_transition_to(status));
            let err = status.ensure_can_transition_to(status).unwrap_err();
            assert!(matches!(err, SentinelError::InvalidTransition { .. }));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!AlertStatus::Open.is_terminal());
        assert!(!AlertStatus::Escalated.is_terminal());
        assert!(AlertStatus::AutoClosed.is_terminal());
        assert!(AlertStatus::Resolved.is_terminal());
    }

    #[test]
    fn test_severity_ordering_for_promotion() {
        assert!(AlertSeverity::Critical > AlertSeverity::Warning);
        assert!(AlertSeverity::Warning > AlertSeverity::Info);
    }

    #[test]
    fn test_creation_record_shape() {
        let now = Utc::now();
        let record = AlertStateTransition::creation(now);
        assert_eq!(record.from_status, AlertStatus::Open);
        assert_eq!(record.to_status, AlertStatus::Open);
        assert_eq!(record.reason, CREATION_REASON);
        assert_eq!(record.triggered_by, SYSTEM_ACTOR);
        assert!(record.rule_triggered.is_none());
    }

    #[test]
    fn test_metadata_accessors() {
        let mut alert_metadata = Map::new();
        alert_metadata.insert("driver_id".into(), Value::String("DRV001".into()));
        alert_metadata.insert("document_valid".into(), Value::Bool(false));
        alert_metadata.insert("speed_kmh".into(), Value::from(92));

        let now = Utc::now();
        let alert = Alert {
            alert_id: "OSP-2025-00001".into(),
            source_type: SourceType::Overspeeding,
            severity: AlertSeverity::Warning,
            status: AlertStatus::Open,
            timestamp: now,
            metadata: alert_metadata,
            state_history: vec![AlertStateTransition::creation(now)],
            escalated_at: None,
            closed_at: None,
            resolved_at: None,
            auto_close_reason: None,
            expires_at: None,
            resolved_by: None,
            resolution_notes: None,
            created_at: now,
            updated_at: None,
        };

        assert_eq!(alert.driver_id(), Some("DRV001"));
        assert_eq!(alert.document_valid(), Some(false));
        assert!(alert.is_open());
    }

    #[test]
    fn test_status_wire_values() {
        assert_eq!(
            serde_json::to_string(&AlertStatus::AutoClosed).unwrap(),
            "\"AUTO_CLOSED\""
        );
        let parsed: AlertStatus = "AUTO_CLOSED".parse().unwrap();
        assert_eq!(parsed, AlertStatus::AutoClosed);
    }
}
