use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::repo::{list_findings, list_licenses, totals_by_status, StatusTotals};
use crate::validate::validate_license;

pub const FINDINGS_DASHBOARD_PAYLOAD_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeverityCount {
    pub severity: String,
    pub count: i64,
    pub finding_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleCount {
    pub rule_key: String,
    pub count: i64,
    pub finding_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LicenseFindingSummary {
    pub license_id: i64,
    pub external_id: Option<String>,
    pub name: String,
    pub open_count: i64,
    pub acknowledged_count: i64,
    pub resolved_count: i64,
    pub warning_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FindingsDashboardPayload {
    pub version: u32,
    pub finding_count: i64,
    pub totals: StatusTotals,
    /// Active (non-resolved) findings only, bucketed by severity.
    pub severity_counts: Vec<SeverityCount>,
    pub rule_counts: Vec<RuleCount>,
    pub licenses: Vec<LicenseFindingSummary>,
}

/// Build the findings dashboard from deterministic store data. Bucket and
/// summary ordering is stable so payloads diff cleanly across runs.
pub fn build_findings_dashboard(conn: &Connection) -> Result<FindingsDashboardPayload, AppError> {
    let findings = list_findings(conn)?;
    let licenses = list_licenses(conn)?;
    let totals = totals_by_status(conn)?;

    let mut severity_map: BTreeMap<&'static str, Vec<i64>> = BTreeMap::new();
    let mut rule_map: BTreeMap<&'static str, Vec<i64>> = BTreeMap::new();
    let mut per_license: BTreeMap<i64, (i64, i64, i64)> = BTreeMap::new();

    for f in &findings {
        if f.is_active {
            severity_map.entry(f.severity.as_str()).or_default().push(f.id);
        }
        rule_map.entry(f.rule_key.as_str()).or_default().push(f.id);

        if let Some(license_id) = f.license_id {
            let entry = per_license.entry(license_id).or_default();
            match f.status {
                crate::domain::FindingStatus::Open => entry.0 += 1,
                crate::domain::FindingStatus::Acknowledged => entry.1 += 1,
                crate::domain::FindingStatus::Resolved => entry.2 += 1,
            }
        }
    }

    let severity_counts = severity_map
        .into_iter()
        .map(|(severity, mut ids)| {
            ids.sort();
            SeverityCount {
                severity: severity.to_string(),
                count: ids.len() as i64,
                finding_ids: ids,
            }
        })
        .collect::<Vec<_>>();

    let rule_counts = rule_map
        .into_iter()
        .map(|(rule_key, mut ids)| {
            ids.sort();
            RuleCount {
                rule_key: rule_key.to_string(),
                count: ids.len() as i64,
                finding_ids: ids,
            }
        })
        .collect::<Vec<_>>();

    let mut license_summaries = Vec::new();
    for lic in &licenses {
        let (open, acknowledged, resolved) =
            per_license.get(&lic.id).copied().unwrap_or_default();
        let warning_count = validate_license(lic).len() as i64;
        license_summaries.push(LicenseFindingSummary {
            license_id: lic.id,
            external_id: lic.external_id.clone(),
            name: lic.name.clone(),
            open_count: open,
            acknowledged_count: acknowledged,
            resolved_count: resolved,
            warning_count,
        });
    }

    // Deterministic ordering: external_id, then name, then id.
    license_summaries.sort_by(|a, b| {
        (
            a.external_id.clone().unwrap_or_default(),
            a.name.clone(),
            a.license_id,
        )
            .cmp(&(
                b.external_id.clone().unwrap_or_default(),
                b.name.clone(),
                b.license_id,
            ))
    });

    Ok(FindingsDashboardPayload {
        version: FINDINGS_DASHBOARD_PAYLOAD_VERSION,
        finding_count: findings.len() as i64,
        totals,
        severity_counts,
        rule_counts,
        licenses: license_summaries,
    })
}
