use serde::{Deserialize, Serialize};
use time::Date;

use crate::domain::{License, RuleKey, Severity};
use crate::error::AppError;
use crate::usage::{EvaluationWindow, UsagePeak};

pub mod compliance;
pub mod optimization;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_DETAILS_CHARS: usize = 1000;
pub const MAX_EVIDENCE_BYTES: usize = 2000;

/// Typed evidence payload, one variant per rule key. Serialized to JSON at
/// the storage boundary; the stored form stays a flexible key→value object
/// while the code works with typed fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "rule")]
pub enum Evidence {
    Overuse {
        seats_purchased: i64,
        peak_used: i64,
        peak_date: String,
        window_days: i64,
        source: String,
    },
    Expired {
        expires_on: String,
        days_past_due: i64,
    },
    MissingSeats {
        peak_used: i64,
        peak_date: String,
        window_days: i64,
        source: String,
    },
    UnderutilizedSeats {
        seats_purchased: i64,
        peak_used: i64,
        utilization_pct: String,
        window_days: i64,
    },
    UnassignedSeats {
        seats_purchased: i64,
        seats_assigned: i64,
        unassigned: i64,
    },
}

impl Evidence {
    /// Serialize for storage, bounded to `MAX_EVIDENCE_BYTES`. Values over
    /// the cap are truncated at a char boundary, never rejected.
    pub fn to_bounded_json(&self) -> Result<String, AppError> {
        let json = serde_json::to_string(self).map_err(|e| {
            AppError::new("EVIDENCE_SERIALIZE_FAILED", "Failed to serialize evidence")
                .with_details(e.to_string())
        })?;
        Ok(truncate_bytes(&json, MAX_EVIDENCE_BYTES))
    }
}

/// Truncate to at most `max_chars` characters. Oversized inputs are clipped,
/// never rejected.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

/// Truncate to at most `max_bytes` bytes without splitting a character.
pub fn truncate_bytes(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// What one rule emits when it triggers. Text fields are clipped to their
/// storage bounds on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingCandidate {
    pub rule_key: RuleKey,
    pub severity: Severity,
    pub title: String,
    pub details: String,
    pub evidence: Evidence,
}

impl FindingCandidate {
    pub fn new(
        rule_key: RuleKey,
        severity: Severity,
        title: impl Into<String>,
        details: impl Into<String>,
        evidence: Evidence,
    ) -> Self {
        Self {
            rule_key,
            severity,
            title: truncate_chars(&title.into(), MAX_TITLE_CHARS),
            details: truncate_chars(&details.into(), MAX_DETAILS_CHARS),
            evidence,
        }
    }
}

/// Read-only inputs shared by every rule of a pass: the license snapshot, the
/// family's usage peak (already fallback-adjusted where the family wants
/// that), the effective window, and today's UTC date.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub license: &'a License,
    pub peak: Option<&'a UsagePeak>,
    pub window: EvaluationWindow,
    pub today: Date,
}

/// Evaluate one rule. Rules are pure and abstain (`None`) on both ordinary
/// non-trigger conditions and malformed subject data; they never fail a pass.
pub fn evaluate_rule(key: RuleKey, input: &RuleInput) -> Option<FindingCandidate> {
    match key {
        RuleKey::Overuse => compliance::overuse(input),
        RuleKey::Expired => compliance::expired(input),
        RuleKey::MissingSeats => compliance::missing_seats(input),
        RuleKey::UnderutilizedSeats => optimization::underutilized_seats(input),
        RuleKey::UnassignedSeats => optimization::unassigned_seats(input),
    }
}
