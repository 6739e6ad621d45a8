use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime, UtcOffset};

use crate::domain::{Finding, FindingStatus, License, RuleFamily, RuleKey};
use crate::error::AppError;
use crate::normalize::timestamps::format_iso_date;
use crate::repo;
use crate::rules::{evaluate_rule, FindingCandidate, RuleInput};
use crate::usage::{reduce_peaks, EvaluationWindow, UsagePeak, UsageSource};

/// Explicit per-pass context. `now` is the single logical instant of the
/// pass (all stamps derive from it) and the correlation id links the audit
/// row to the caller's job run; neither is read from ambient state.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub now: OffsetDateTime,
    pub correlation_id: Option<&'a str>,
    /// Cooperative cancellation, checked between subjects only; a cancelled
    /// pass rolls back and leaves the store untouched.
    pub cancel: Option<&'a AtomicBool>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now,
            correlation_id: None,
            cancel: None,
        }
    }
}

/// Outcome of one evaluation pass: what this pass changed, and store-wide
/// status totals recomputed after the pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationResult {
    pub family: RuleFamily,
    pub window_start: String,
    pub window_end: String,
    pub opened: i64,
    pub resolved: i64,
    pub updated: i64,
    pub total_open: i64,
    pub total_acknowledged: i64,
    pub total_resolved: i64,
}

fn fmt_rfc3339_utc(dt: OffsetDateTime) -> Result<String, AppError> {
    dt.to_offset(UtcOffset::UTC).format(&Rfc3339).map_err(|e| {
        AppError::new("TIME_FORMAT_FAILED", "Failed to format timestamp")
            .with_details(e.to_string())
    })
}

/// Run one evaluation pass for a rule family.
///
/// The whole pass executes inside a single transaction: either every create,
/// update, and resolution of the pass is committed together with its audit
/// row, or nothing is. Callers must serialize passes per family; concurrent
/// passes would race the triggered-set reconciliation.
///
/// Window bounds are optional and may be given in either order; see
/// [`EvaluationWindow::resolve`].
pub fn evaluate(
    conn: &mut Connection,
    family: RuleFamily,
    window_start: Option<Date>,
    window_end: Option<Date>,
    ctx: &EvaluationContext<'_>,
) -> Result<EvaluationResult, AppError> {
    let today = ctx.now.to_offset(UtcOffset::UTC).date();
    let window = EvaluationWindow::resolve(window_start, window_end, today);
    let now_str = fmt_rfc3339_utc(ctx.now)?;

    let tx = conn.transaction().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to start evaluation transaction")
            .with_details(e.to_string())
    })?;

    // Consistent snapshot for the whole pass (spec of the store interface):
    // subjects, in-window usage, and the family's stored findings.
    let licenses = repo::list_licenses(&tx)?;
    let observations = repo::list_usage_in_window(&tx, window.start, window.end)?;
    let peaks = reduce_peaks(&observations);

    let mut existing: BTreeMap<(i64, RuleKey), Finding> = BTreeMap::new();
    for finding in repo::load_active_findings(&tx, family.rule_keys())? {
        let license_id = finding
            .license_id
            .ok_or_else(|| AppError::new("ENGINE_BAD_SNAPSHOT", "Subject-less finding in snapshot"))?;
        existing.insert((license_id, finding.rule_key), finding);
    }

    let mut triggered: BTreeSet<(i64, RuleKey)> = BTreeSet::new();
    let mut opened = 0i64;
    let mut updated = 0i64;
    let mut resolved = 0i64;

    for license in &licenses {
        if let Some(cancel) = ctx.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(AppError::new("EVAL_CANCELLED", "Evaluation pass cancelled")
                    .with_retryable(true));
            }
        }

        let peak = family_peak(family, license, &peaks, today);
        let input = RuleInput {
            license,
            peak: peak.as_ref(),
            window,
            today,
        };

        for key in family.rule_keys() {
            let Some(candidate) = evaluate_rule(*key, &input) else {
                continue;
            };
            triggered.insert((license.id, *key));
            upsert_candidate(
                &tx,
                &mut existing,
                family,
                license,
                candidate,
                &now_str,
                &mut opened,
                &mut updated,
            )?;
        }
    }

    // The in-memory triggered set governs resolution; findings created this
    // pass are all triggered, so only stale snapshot entries resolve here.
    for ((license_id, rule_key), finding) in existing.iter_mut() {
        if triggered.contains(&(*license_id, *rule_key)) || !finding.status.is_active() {
            continue;
        }
        finding.status = FindingStatus::Resolved;
        finding.is_active = false;
        finding.resolved_at = Some(now_str.clone());
        finding.last_evaluated_at = now_str.clone();
        repo::update_finding(&tx, finding)?;
        resolved += 1;
    }

    let totals = repo::totals_by_status(&tx)?;
    let window_start_str = format_iso_date(window.start);
    let window_end_str = format_iso_date(window.end);
    repo::record_evaluation_run(
        &tx,
        family.as_str(),
        ctx.correlation_id,
        &window_start_str,
        &window_end_str,
        opened,
        updated,
        resolved,
        &now_str,
        &now_str,
    )?;

    tx.commit().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to commit evaluation transaction")
            .with_details(e.to_string())
            .with_retryable(true)
    })?;

    Ok(EvaluationResult {
        family,
        window_start: window_start_str,
        window_end: window_end_str,
        opened,
        resolved,
        updated,
        total_open: totals.open,
        total_acknowledged: totals.acknowledged,
        total_resolved: totals.resolved,
    })
}

/// The compliance family falls back to assigned seats (dated today) when a
/// license has no in-window usage; the optimization family evaluates observed
/// usage only and its rules treat "no data" as a zero peak.
fn family_peak(
    family: RuleFamily,
    license: &License,
    peaks: &BTreeMap<i64, UsagePeak>,
    today: Date,
) -> Option<UsagePeak> {
    let observed = peaks.get(&license.id).copied();
    match family {
        RuleFamily::Optimization => observed,
        RuleFamily::Compliance => observed.or_else(|| {
            license.seats_assigned.map(|assigned| UsagePeak {
                seats_used: assigned,
                peak_date: today,
                source: UsageSource::AssignedFallback,
            })
        }),
    }
}

#[allow(clippy::too_many_arguments)]
fn upsert_candidate(
    conn: &Connection,
    existing: &mut BTreeMap<(i64, RuleKey), Finding>,
    family: RuleFamily,
    license: &License,
    candidate: FindingCandidate,
    now: &str,
    opened: &mut i64,
    updated: &mut i64,
) -> Result<(), AppError> {
    let evidence_json = candidate.evidence.to_bounded_json()?;
    // Denormalized category travels with optimization findings and must be
    // refreshed on every write, not just on create.
    let category = match family {
        RuleFamily::Optimization => license.category.clone(),
        RuleFamily::Compliance => None,
    };

    match existing.get_mut(&(license.id, candidate.rule_key)) {
        None => {
            let finding = Finding {
                id: 0,
                license_id: Some(license.id),
                rule_key: candidate.rule_key,
                severity: candidate.severity,
                status: FindingStatus::Open,
                title: candidate.title,
                details: candidate.details,
                evidence_json,
                is_active: true,
                category,
                detected_at: now.to_string(),
                last_evaluated_at: now.to_string(),
                acknowledged_at: None,
                acknowledged_by: None,
                resolved_at: None,
            };
            let id = repo::insert_finding(conn, &finding)?;
            existing.insert((license.id, candidate.rule_key), Finding { id, ..finding });
            *opened += 1;
        }
        Some(finding) if finding.status == FindingStatus::Resolved => {
            // Full reopen: back to Open with a fresh detection timestamp and
            // cleared acknowledgement/resolution history.
            finding.status = FindingStatus::Open;
            finding.is_active = true;
            finding.severity = candidate.severity;
            finding.title = candidate.title;
            finding.details = candidate.details;
            finding.evidence_json = evidence_json;
            finding.category = category;
            finding.detected_at = now.to_string();
            finding.last_evaluated_at = now.to_string();
            finding.acknowledged_at = None;
            finding.acknowledged_by = None;
            finding.resolved_at = None;
            repo::update_finding(conn, finding)?;
            *opened += 1;
        }
        Some(finding) => {
            // Open or Acknowledged: refresh content in place, keep status
            // (no auto-escalation out of Acknowledged).
            finding.severity = candidate.severity;
            finding.title = candidate.title;
            finding.details = candidate.details;
            finding.evidence_json = evidence_json;
            finding.category = category;
            finding.is_active = true;
            finding.last_evaluated_at = now.to_string();
            repo::update_finding(conn, finding)?;
            *updated += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::repo::NewLicense;
    use pretty_assertions::assert_eq;
    use time::macros::{date, datetime};

    const NOW: &str = "2026-01-30T12:00:00Z";

    fn test_conn() -> Connection {
        let mut conn = db::open_in_memory().expect("open");
        db::migrate(&mut conn).expect("migrate");
        conn
    }

    fn ctx() -> EvaluationContext<'static> {
        EvaluationContext::new(datetime!(2026-01-30 12:00 UTC))
    }

    fn later_ctx() -> EvaluationContext<'static> {
        EvaluationContext::new(datetime!(2026-02-02 12:00 UTC))
    }

    fn add_license(
        conn: &Connection,
        name: &str,
        seats_purchased: Option<i64>,
        seats_assigned: Option<i64>,
        expires_at: Option<&str>,
    ) -> i64 {
        repo::insert_license(
            conn,
            &NewLicense {
                external_id: Some(format!("LIC-{name}")),
                fingerprint: format!("fp-{name}"),
                name: name.to_string(),
                vendor: Some("Vendor".to_string()),
                category: Some("Engineering".to_string()),
                seats_purchased,
                seats_assigned,
                expires_at: expires_at.map(|s| s.to_string()),
                expires_at_raw: None,
            },
            NOW,
        )
        .expect("insert license")
    }

    fn add_usage(conn: &Connection, license_id: i64, day: Date, seats: i64) {
        repo::upsert_usage_observation(conn, license_id, day, seats, NOW).expect("usage");
    }

    fn evidence(finding: &Finding) -> serde_json::Value {
        serde_json::from_str(&finding.evidence_json).expect("evidence json")
    }

    #[test]
    fn overuse_scenario_opens_a_critical_finding() {
        let mut conn = test_conn();
        let id = add_license(&conn, "cad", Some(10), Some(10), None);
        add_usage(&conn, id, date!(2026 - 01 - 15), 15);

        let result = evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx()).unwrap();
        assert_eq!(result.opened, 1);
        assert_eq!(result.resolved, 0);
        assert_eq!(result.updated, 0);
        assert_eq!(result.total_open, 1);
        assert_eq!(result.window_start, "2026-01-01");
        assert_eq!(result.window_end, "2026-01-30");

        let findings = repo::list_findings(&conn).unwrap();
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.rule_key, RuleKey::Overuse);
        assert_eq!(f.severity, crate::domain::Severity::Critical);
        assert_eq!(f.status, FindingStatus::Open);
        assert_eq!(f.detected_at, NOW);

        let ev = evidence(f);
        assert_eq!(ev["peak_used"], 15);
        assert_eq!(ev["seats_purchased"], 10);
        assert_eq!(ev["source"], "observed");
    }

    #[test]
    fn expired_scenario_counts_days_past_due() {
        let mut conn = test_conn();
        add_license(&conn, "old", Some(5), None, Some("2026-01-28T00:00:00Z"));

        let result = evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx()).unwrap();
        assert_eq!(result.opened, 1);

        let findings = repo::list_findings(&conn).unwrap();
        assert_eq!(findings[0].rule_key, RuleKey::Expired);
        let ev = evidence(&findings[0]);
        assert_eq!(ev["days_past_due"], 2);
        assert_eq!(ev["expires_on"], "2026-01-28");
    }

    #[test]
    fn compliance_fallback_peak_uses_assigned_seats() {
        let mut conn = test_conn();
        // No usage data at all: peak falls back to the 15 assigned seats,
        // which exceeds the 10 purchased.
        add_license(&conn, "cad", Some(10), Some(15), None);

        let result = evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx()).unwrap();
        assert_eq!(result.opened, 1);

        let findings = repo::list_findings(&conn).unwrap();
        assert_eq!(findings[0].rule_key, RuleKey::Overuse);
        let ev = evidence(&findings[0]);
        assert_eq!(ev["source"], "assigned_fallback");
        assert_eq!(ev["peak_used"], 15);
        assert_eq!(ev["peak_date"], "2026-01-30");
    }

    #[test]
    fn missing_seats_scenario_warns() {
        let mut conn = test_conn();
        let id = add_license(&conn, "untracked", None, None, None);
        add_usage(&conn, id, date!(2026 - 01 - 10), 4);

        evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx()).unwrap();
        let findings = repo::list_findings(&conn).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_key, RuleKey::MissingSeats);
        assert_eq!(findings[0].severity, crate::domain::Severity::Warning);
    }

    #[test]
    fn underutilized_scenario_with_no_usage_is_critical() {
        let mut conn = test_conn();
        add_license(&conn, "farm", Some(100), Some(15), None);

        let result = evaluate(&mut conn, RuleFamily::Optimization, None, None, &ctx()).unwrap();
        // UnderutilizedSeats (peak defaults to 0) and UnassignedSeats (85 unassigned).
        assert_eq!(result.opened, 2);

        let findings = repo::list_findings(&conn).unwrap();
        let under = findings
            .iter()
            .find(|f| f.rule_key == RuleKey::UnderutilizedSeats)
            .expect("underutilized finding");
        assert_eq!(under.severity, crate::domain::Severity::Critical);
        assert_eq!(under.category.as_deref(), Some("Engineering"));
        let ev = evidence(under);
        assert_eq!(ev["utilization_pct"], "0.0%");
        assert_eq!(ev["peak_used"], 0);
    }

    #[test]
    fn unassigned_scenario_warns_at_percentage_threshold() {
        let mut conn = test_conn();
        let id = add_license(&conn, "suite", Some(50), Some(30), None);
        // Healthy utilization so UnderutilizedSeats stays quiet.
        add_usage(&conn, id, date!(2026 - 01 - 20), 28);

        let result = evaluate(&mut conn, RuleFamily::Optimization, None, None, &ctx()).unwrap();
        assert_eq!(result.opened, 1);

        let findings = repo::list_findings(&conn).unwrap();
        assert_eq!(findings[0].rule_key, RuleKey::UnassignedSeats);
        let ev = evidence(&findings[0]);
        assert_eq!(ev["unassigned"], 20);
    }

    #[test]
    fn second_run_is_idempotent() {
        let mut conn = test_conn();
        let id = add_license(&conn, "cad", Some(10), Some(10), None);
        add_usage(&conn, id, date!(2026 - 01 - 15), 15);

        let first = evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx()).unwrap();
        assert_eq!((first.opened, first.resolved, first.updated), (1, 0, 0));

        let second = evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx()).unwrap();
        assert_eq!((second.opened, second.resolved, second.updated), (0, 0, 1));
        assert_eq!(second.total_open, 1);

        // Still exactly one finding for the (license, rule) pair.
        assert_eq!(repo::list_findings(&conn).unwrap().len(), 1);
    }

    #[test]
    fn cessation_resolves_without_touching_content() {
        let mut conn = test_conn();
        let id = add_license(&conn, "cad", Some(10), Some(10), None);
        add_usage(&conn, id, date!(2026 - 01 - 15), 15);

        evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx()).unwrap();
        let before = repo::list_findings(&conn).unwrap().remove(0);

        // Usage drops back under the purchased count.
        add_usage(&conn, id, date!(2026 - 01 - 15), 8);
        let result = evaluate(&mut conn, RuleFamily::Compliance, None, None, &later_ctx()).unwrap();
        assert_eq!((result.opened, result.resolved, result.updated), (0, 1, 0));
        assert_eq!(result.total_resolved, 1);

        let after = repo::list_findings(&conn).unwrap().remove(0);
        assert_eq!(after.status, FindingStatus::Resolved);
        assert!(!after.is_active);
        assert_eq!(after.resolved_at.as_deref(), Some("2026-02-02T12:00:00Z"));
        // Content keeps its last triggered values.
        assert_eq!(after.title, before.title);
        assert_eq!(after.details, before.details);
        assert_eq!(after.evidence_json, before.evidence_json);
        assert_eq!(after.detected_at, before.detected_at);
    }

    #[test]
    fn retrigger_after_resolution_reopens_fully() {
        let mut conn = test_conn();
        let id = add_license(&conn, "cad", Some(10), Some(10), None);
        add_usage(&conn, id, date!(2026 - 01 - 15), 15);

        evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx()).unwrap();
        let fid = repo::list_findings(&conn).unwrap()[0].id;
        repo::acknowledge_finding(&conn, fid, "ops", NOW).unwrap();

        add_usage(&conn, id, date!(2026 - 01 - 15), 8);
        evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx()).unwrap();
        assert_eq!(
            repo::get_finding(&conn, fid).unwrap().status,
            FindingStatus::Resolved
        );

        add_usage(&conn, id, date!(2026 - 01 - 15), 16);
        let result = evaluate(&mut conn, RuleFamily::Compliance, None, None, &later_ctx()).unwrap();
        assert_eq!((result.opened, result.resolved, result.updated), (1, 0, 0));

        let reopened = repo::get_finding(&conn, fid).unwrap();
        assert_eq!(reopened.status, FindingStatus::Open);
        assert_eq!(reopened.detected_at, "2026-02-02T12:00:00Z");
        assert_eq!(reopened.acknowledged_at, None);
        assert_eq!(reopened.acknowledged_by, None);
        assert_eq!(reopened.resolved_at, None);
        let ev = evidence(&reopened);
        assert_eq!(ev["peak_used"], 16);
    }

    #[test]
    fn acknowledged_findings_update_in_place_without_escalation() {
        let mut conn = test_conn();
        let id = add_license(&conn, "cad", Some(10), Some(10), None);
        add_usage(&conn, id, date!(2026 - 01 - 15), 15);

        evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx()).unwrap();
        let fid = repo::list_findings(&conn).unwrap()[0].id;
        repo::acknowledge_finding(&conn, fid, "ops", NOW).unwrap();

        add_usage(&conn, id, date!(2026 - 01 - 16), 20);
        let result = evaluate(&mut conn, RuleFamily::Compliance, None, None, &later_ctx()).unwrap();
        assert_eq!((result.opened, result.resolved, result.updated), (0, 0, 1));

        let f = repo::get_finding(&conn, fid).unwrap();
        assert_eq!(f.status, FindingStatus::Acknowledged);
        assert_eq!(f.acknowledged_by.as_deref(), Some("ops"));
        assert_eq!(f.last_evaluated_at, "2026-02-02T12:00:00Z");
        assert_eq!(evidence(&f)["peak_used"], 20);
    }

    #[test]
    fn window_bounds_may_be_passed_in_either_order() {
        let a = date!(2026 - 01 - 05);
        let b = date!(2026 - 01 - 25);

        let mut results = Vec::new();
        for (start, end) in [(a, b), (b, a)] {
            let mut conn = test_conn();
            let id = add_license(&conn, "cad", Some(10), Some(10), None);
            add_usage(&conn, id, date!(2026 - 01 - 15), 15);
            results.push(
                evaluate(
                    &mut conn,
                    RuleFamily::Compliance,
                    Some(start),
                    Some(end),
                    &ctx(),
                )
                .unwrap(),
            );
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0].window_start, "2026-01-05");
        assert_eq!(results[0].window_end, "2026-01-25");
    }

    #[test]
    fn category_is_refreshed_on_update_in_place() {
        let mut conn = test_conn();
        let id = add_license(&conn, "farm", Some(100), Some(15), None);

        evaluate(&mut conn, RuleFamily::Optimization, None, None, &ctx()).unwrap();

        conn.execute("UPDATE licenses SET category = 'Media' WHERE id = ?1", [id])
            .unwrap();
        evaluate(&mut conn, RuleFamily::Optimization, None, None, &later_ctx()).unwrap();

        for f in repo::list_findings(&conn).unwrap() {
            assert_eq!(f.category.as_deref(), Some("Media"));
        }
    }

    #[test]
    fn families_do_not_disturb_each_other() {
        let mut conn = test_conn();
        let id = add_license(&conn, "cad", Some(100), Some(15), None);
        add_usage(&conn, id, date!(2026 - 01 - 15), 5);

        // Optimization opens findings; a compliance pass that triggers
        // nothing must not resolve them.
        let opt = evaluate(&mut conn, RuleFamily::Optimization, None, None, &ctx()).unwrap();
        assert_eq!(opt.opened, 2);

        let comp = evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx()).unwrap();
        assert_eq!((comp.opened, comp.resolved, comp.updated), (0, 0, 0));
        assert_eq!(comp.total_open, 2);
    }

    #[test]
    fn cancelled_pass_leaves_the_store_untouched() {
        let mut conn = test_conn();
        let id = add_license(&conn, "cad", Some(10), Some(10), None);
        add_usage(&conn, id, date!(2026 - 01 - 15), 15);

        let cancel = AtomicBool::new(true);
        let ctx = EvaluationContext {
            now: datetime!(2026-01-30 12:00 UTC),
            correlation_id: None,
            cancel: Some(&cancel),
        };
        let err = evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx).unwrap_err();
        assert_eq!(err.code, "EVAL_CANCELLED");
        assert!(err.retryable);

        assert_eq!(repo::list_findings(&conn).unwrap().len(), 0);
        assert_eq!(repo::list_evaluation_runs(&conn).unwrap().len(), 0);
    }

    #[test]
    fn each_pass_records_an_audit_row() {
        let mut conn = test_conn();
        let id = add_license(&conn, "cad", Some(10), Some(10), None);
        add_usage(&conn, id, date!(2026 - 01 - 15), 15);

        let ctx = EvaluationContext {
            now: datetime!(2026-01-30 12:00 UTC),
            correlation_id: Some("job-42"),
            cancel: None,
        };
        evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx).unwrap();

        let runs = repo::list_evaluation_runs(&conn).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].family, "Compliance");
        assert_eq!(runs[0].correlation_id.as_deref(), Some("job-42"));
        assert_eq!(runs[0].opened, 1);
        assert_eq!(runs[0].window_start, "2026-01-01");
    }
}
