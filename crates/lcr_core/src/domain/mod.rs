use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Canonical license record used by rule evaluation and the dashboard.
///
/// Notes:
/// - `expires_at` is a nullable RFC3339 UTC string; when a non-RFC3339 value
///   was provided at ingest, the original is preserved in `expires_at_raw` and
///   validators surface warnings (no silent guessing or defaults).
/// - Seat counts are nullable; rules abstain when a field they need is absent.
/// - Licenses are a read-only snapshot during an evaluation pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct License {
    pub id: i64,
    pub external_id: Option<String>,
    pub fingerprint: String,
    pub name: String,
    pub vendor: Option<String>,
    pub category: Option<String>,
    pub seats_purchased: Option<i64>,
    pub seats_assigned: Option<i64>,
    pub expires_at: Option<String>,
    pub expires_at_raw: Option<String>,
    pub created_at: String,
}

/// One daily usage sample: the maximum concurrent seats observed that day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageObservation {
    pub id: i64,
    pub license_id: i64,
    pub obs_date: String,
    pub seats_used: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::Warning => "Warning",
            Severity::Info => "Info",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "Critical" => Ok(Severity::Critical),
            "Warning" => Ok(Severity::Warning),
            "Info" => Ok(Severity::Info),
            other => Err(AppError::new("DOMAIN_UNKNOWN_SEVERITY", "Unknown severity")
                .with_details(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FindingStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::Open => "Open",
            FindingStatus::Acknowledged => "Acknowledged",
            FindingStatus::Resolved => "Resolved",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "Open" => Ok(FindingStatus::Open),
            "Acknowledged" => Ok(FindingStatus::Acknowledged),
            "Resolved" => Ok(FindingStatus::Resolved),
            other => Err(AppError::new("DOMAIN_UNKNOWN_STATUS", "Unknown finding status")
                .with_details(other.to_string())),
        }
    }

    /// A finding is active while it still needs attention.
    pub fn is_active(&self) -> bool {
        !matches!(self, FindingStatus::Resolved)
    }
}

/// Stable identifier of the rule that produced a finding. The string forms
/// are persisted; renaming one is a schema change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleKey {
    Overuse,
    Expired,
    MissingSeats,
    UnderutilizedSeats,
    UnassignedSeats,
}

impl RuleKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKey::Overuse => "Overuse",
            RuleKey::Expired => "Expired",
            RuleKey::MissingSeats => "MissingSeats",
            RuleKey::UnderutilizedSeats => "UnderutilizedSeats",
            RuleKey::UnassignedSeats => "UnassignedSeats",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "Overuse" => Ok(RuleKey::Overuse),
            "Expired" => Ok(RuleKey::Expired),
            "MissingSeats" => Ok(RuleKey::MissingSeats),
            "UnderutilizedSeats" => Ok(RuleKey::UnderutilizedSeats),
            "UnassignedSeats" => Ok(RuleKey::UnassignedSeats),
            other => Err(AppError::new("DOMAIN_UNKNOWN_RULE_KEY", "Unknown rule key")
                .with_details(other.to_string())),
        }
    }

    pub fn family(&self) -> RuleFamily {
        match self {
            RuleKey::Overuse | RuleKey::Expired | RuleKey::MissingSeats => RuleFamily::Compliance,
            RuleKey::UnderutilizedSeats | RuleKey::UnassignedSeats => RuleFamily::Optimization,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RuleFamily {
    Compliance,
    Optimization,
}

impl RuleFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleFamily::Compliance => "Compliance",
            RuleFamily::Optimization => "Optimization",
        }
    }

    /// Evaluation order within a family is fixed: rule order here is the
    /// order candidates are produced in, which keeps evidence reproducible.
    pub fn rule_keys(&self) -> &'static [RuleKey] {
        match self {
            RuleFamily::Compliance => {
                &[RuleKey::Overuse, RuleKey::Expired, RuleKey::MissingSeats]
            }
            RuleFamily::Optimization => {
                &[RuleKey::UnderutilizedSeats, RuleKey::UnassignedSeats]
            }
        }
    }
}

/// Stateful finding record reconciled across evaluation passes.
///
/// At most one record exists per (license_id, rule_key); passes mutate it in
/// place rather than versioning history. `is_active` mirrors the status and
/// `category` is denormalized from the license for optimization-family rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub id: i64,
    pub license_id: Option<i64>,
    pub rule_key: RuleKey,
    pub severity: Severity,
    pub status: FindingStatus,
    pub title: String,
    pub details: String,
    pub evidence_json: String,
    pub is_active: bool,
    pub category: Option<String>,
    pub detected_at: String,
    pub last_evaluated_at: String,
    pub acknowledged_at: Option<String>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationWarning {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl ValidationWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
