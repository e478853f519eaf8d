//! Alert entity and its status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::ids::AlertId;

/// How urgent an alert is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational.
    Low,
    /// Needs attention during normal operations.
    Medium,
    /// Needs attention soon.
    High,
    /// Needs attention now.
    Critical,
}

impl AlertSeverity {
    /// Wire / storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse a bus-supplied severity, falling back to `Medium` for anything
    /// unrecognized.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse().ok()).unwrap_or(Self::Medium)
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

/// Lifecycle status of an alert.
///
/// Statuses are totally ordered; an alert may only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Newly raised.
    Open,
    /// Someone has seen it.
    Acknowledged,
    /// Being worked on.
    InProgress,
    /// Root cause fixed.
    Resolved,
    /// Terminal.
    Closed,
}

impl AlertStatus {
    /// Wire / storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Acknowledged => 1,
            Self::InProgress => 2,
            Self::Resolved => 3,
            Self::Closed => 4,
        }
    }

    /// Whether moving from `self` to `next` advances the lifecycle.
    ///
    /// Staying in the same status is not a transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "acknowledged" => Ok(Self::Acknowledged),
            "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            "closed" => Ok(Self::Closed),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

/// A string did not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

/// A persisted alert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert identifier.
    pub id: AlertId,
    /// Short human-readable summary.
    pub title: String,
    /// Longer description, if any.
    pub description: Option<String>,
    /// Urgency.
    pub severity: AlertSeverity,
    /// Lifecycle status.
    pub status: AlertStatus,
    /// Asset the alert concerns, if known.
    pub asset_id: Option<i64>,
    /// Free-form classification (e.g. `"threshold"`).
    pub alert_type: Option<String>,
    /// Where the alert came from.
    pub source: String,
    /// Configured limit that was crossed.
    pub threshold_value: Option<f64>,
    /// Observed value.
    pub actual_value: Option<f64>,
    /// When the condition occurred.
    pub occurred_at: DateTime<Utc>,
}

impl Alert {
    /// The `data` object pushed to clients for this alert.
    pub fn summary(&self) -> Value {
        json!({
            "id": self.id,
            "title": self.title,
            "severity": self.severity,
            "status": self.status,
            "asset_id": self.asset_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [AlertStatus; 5] = [
        AlertStatus::Open,
        AlertStatus::Acknowledged,
        AlertStatus::InProgress,
        AlertStatus::Resolved,
        AlertStatus::Closed,
    ];

    #[test]
    fn forward_transitions_allowed() {
        assert!(AlertStatus::Open.can_transition_to(AlertStatus::Acknowledged));
        assert!(AlertStatus::Open.can_transition_to(AlertStatus::Resolved));
        assert!(AlertStatus::Acknowledged.can_transition_to(AlertStatus::Closed));
        assert!(AlertStatus::Resolved.can_transition_to(AlertStatus::Closed));
    }

    #[test]
    fn never_regresses() {
        for (i, from) in ALL.iter().enumerate() {
            for to in &ALL[..=i] {
                assert!(!from.can_transition_to(*to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn closed_is_terminal() {
        assert!(AlertStatus::Closed.is_terminal());
        assert!(ALL.iter().all(|s| !AlertStatus::Closed.can_transition_to(*s)));
    }

    #[test]
    fn status_string_roundtrip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<AlertStatus>().unwrap(), status);
        }
        let json = serde_json::to_string(&AlertStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn severity_parse_is_case_insensitive() {
        assert_eq!("CRITICAL".parse::<AlertSeverity>().unwrap(), AlertSeverity::Critical);
        assert_eq!(" high ".parse::<AlertSeverity>().unwrap(), AlertSeverity::High);
    }

    #[test]
    fn lenient_severity_defaults_to_medium() {
        assert_eq!(AlertSeverity::parse_lenient(None), AlertSeverity::Medium);
        assert_eq!(AlertSeverity::parse_lenient(Some("urgent")), AlertSeverity::Medium);
        assert_eq!(AlertSeverity::parse_lenient(Some("low")), AlertSeverity::Low);
    }

    #[test]
    fn unknown_variant_error_names_input() {
        let err = "sideways".parse::<AlertStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown variant: sideways");
    }
}
