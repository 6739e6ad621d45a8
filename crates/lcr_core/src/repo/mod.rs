use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::domain::{Finding, FindingStatus, License, RuleKey, Severity, UsageObservation};
use crate::error::AppError;
use crate::normalize::timestamps::{format_iso_date, parse_iso_date};

/// Column list shared by every license query so row mapping stays in one place.
const LICENSE_COLUMNS: &str = "id, external_id, fingerprint, name, vendor, category, \
     seats_purchased, seats_assigned, expires_at, expires_at_raw, created_at";

const FINDING_COLUMNS: &str = "id, license_id, rule_key, severity, status, title, details, \
     evidence_json, is_active, category, detected_at, last_evaluated_at, \
     acknowledged_at, acknowledged_by, resolved_at";

fn map_license(row: &rusqlite::Row<'_>) -> rusqlite::Result<License> {
    Ok(License {
        id: row.get(0)?,
        external_id: row.get(1)?,
        fingerprint: row.get(2)?,
        name: row.get(3)?,
        vendor: row.get(4)?,
        category: row.get(5)?,
        seats_purchased: row.get(6)?,
        seats_assigned: row.get(7)?,
        expires_at: row.get(8)?,
        expires_at_raw: row.get(9)?,
        created_at: row.get(10)?,
    })
}

// Raw row shape before the enum columns are parsed; parsing happens outside
// the rusqlite closure so failures surface as AppError, not rusqlite errors.
struct FindingRow {
    id: i64,
    license_id: Option<i64>,
    rule_key: String,
    severity: String,
    status: String,
    title: String,
    details: String,
    evidence_json: String,
    is_active: bool,
    category: Option<String>,
    detected_at: String,
    last_evaluated_at: String,
    acknowledged_at: Option<String>,
    acknowledged_by: Option<String>,
    resolved_at: Option<String>,
}

fn map_finding_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FindingRow> {
    Ok(FindingRow {
        id: row.get(0)?,
        license_id: row.get(1)?,
        rule_key: row.get(2)?,
        severity: row.get(3)?,
        status: row.get(4)?,
        title: row.get(5)?,
        details: row.get(6)?,
        evidence_json: row.get(7)?,
        is_active: row.get(8)?,
        category: row.get(9)?,
        detected_at: row.get(10)?,
        last_evaluated_at: row.get(11)?,
        acknowledged_at: row.get(12)?,
        acknowledged_by: row.get(13)?,
        resolved_at: row.get(14)?,
    })
}

fn finish_finding(raw: FindingRow) -> Result<Finding, AppError> {
    Ok(Finding {
        id: raw.id,
        license_id: raw.license_id,
        rule_key: RuleKey::parse(&raw.rule_key)?,
        severity: Severity::parse(&raw.severity)?,
        status: FindingStatus::parse(&raw.status)?,
        title: raw.title,
        details: raw.details,
        evidence_json: raw.evidence_json,
        is_active: raw.is_active,
        category: raw.category,
        detected_at: raw.detected_at,
        last_evaluated_at: raw.last_evaluated_at,
        acknowledged_at: raw.acknowledged_at,
        acknowledged_by: raw.acknowledged_by,
        resolved_at: raw.resolved_at,
    })
}

pub fn list_licenses(conn: &Connection) -> Result<Vec<License>, AppError> {
    let mut stmt = conn
        .prepare(&format!("SELECT {LICENSE_COLUMNS} FROM licenses ORDER BY id"))
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to prepare licenses query")
                .with_details(e.to_string())
        })?;

    let rows = stmt.query_map([], map_license).map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to query licenses").with_details(e.to_string())
    })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode license row")
                .with_details(e.to_string())
        })?);
    }
    Ok(out)
}

pub fn get_license(conn: &Connection, id: i64) -> Result<License, AppError> {
    conn.query_row(
        &format!("SELECT {LICENSE_COLUMNS} FROM licenses WHERE id = ?1"),
        [id],
        map_license,
    )
    .map_err(|e| AppError::new("DB_NOT_FOUND", "License not found").with_details(e.to_string()))
}

pub fn count_licenses(conn: &Connection) -> Result<i64, AppError> {
    conn.query_row("SELECT COUNT(*) FROM licenses", [], |row| row.get(0))
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to count licenses")
                .with_details(e.to_string())
        })
}

/// Insert payload for a license; `id`/`created_at` are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewLicense {
    pub external_id: Option<String>,
    pub fingerprint: String,
    pub name: String,
    pub vendor: Option<String>,
    pub category: Option<String>,
    pub seats_purchased: Option<i64>,
    pub seats_assigned: Option<i64>,
    pub expires_at: Option<String>,
    pub expires_at_raw: Option<String>,
}

pub fn insert_license(conn: &Connection, license: &NewLicense, now: &str) -> Result<i64, AppError> {
    conn.execute(
        r#"
      INSERT INTO licenses(
        external_id, fingerprint, name, vendor, category,
        seats_purchased, seats_assigned, expires_at, expires_at_raw, created_at
      ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
      "#,
        params![
            license.external_id,
            license.fingerprint,
            license.name,
            license.vendor,
            license.category,
            license.seats_purchased,
            license.seats_assigned,
            license.expires_at,
            license.expires_at_raw,
            now,
        ],
    )
    .map_err(|e| {
        AppError::new("DB_INSERT_FAILED", "Failed to insert license").with_details(e.to_string())
    })?;
    Ok(conn.last_insert_rowid())
}

pub fn update_license(conn: &Connection, id: i64, license: &NewLicense) -> Result<(), AppError> {
    let changed = conn
        .execute(
            r#"
      UPDATE licenses SET
        external_id = ?1, name = ?2, vendor = ?3, category = ?4,
        seats_purchased = ?5, seats_assigned = ?6, expires_at = ?7, expires_at_raw = ?8
      WHERE id = ?9
      "#,
            params![
                license.external_id,
                license.name,
                license.vendor,
                license.category,
                license.seats_purchased,
                license.seats_assigned,
                license.expires_at,
                license.expires_at_raw,
                id,
            ],
        )
        .map_err(|e| {
            AppError::new("DB_UPDATE_FAILED", "Failed to update license")
                .with_details(e.to_string())
        })?;
    if changed == 0 {
        return Err(AppError::new("DB_NOT_FOUND", "License not found").with_details(id.to_string()));
    }
    Ok(())
}

pub fn find_license_id_by_fingerprint(
    conn: &Connection,
    fingerprint: &str,
) -> Result<Option<i64>, AppError> {
    conn.query_row(
        "SELECT id FROM licenses WHERE fingerprint = ?1",
        [fingerprint],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to look up license by fingerprint")
            .with_details(e.to_string())
    })
}

pub fn find_license_id_by_external_id(
    conn: &Connection,
    external_id: &str,
) -> Result<Option<i64>, AppError> {
    conn.query_row(
        "SELECT id FROM licenses WHERE external_id = ?1",
        [external_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to look up license by external id")
            .with_details(e.to_string())
    })
}

/// One observation per (license, date); re-importing a day overwrites it.
pub fn upsert_usage_observation(
    conn: &Connection,
    license_id: i64,
    obs_date: Date,
    seats_used: i64,
    now: &str,
) -> Result<(), AppError> {
    conn.execute(
        r#"
      INSERT INTO usage_observations(license_id, obs_date, seats_used, created_at)
      VALUES (?1, ?2, ?3, ?4)
      ON CONFLICT(license_id, obs_date) DO UPDATE SET seats_used = excluded.seats_used
      "#,
        params![license_id, format_iso_date(obs_date), seats_used, now],
    )
    .map_err(|e| {
        AppError::new("DB_INSERT_FAILED", "Failed to upsert usage observation")
            .with_details(e.to_string())
    })?;
    Ok(())
}

pub fn list_usage_observations(conn: &Connection) -> Result<Vec<UsageObservation>, AppError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, license_id, obs_date, seats_used, created_at FROM usage_observations \
             ORDER BY license_id, obs_date",
        )
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to prepare usage query")
                .with_details(e.to_string())
        })?;

    let rows = stmt
        .query_map([], |row| {
            Ok(UsageObservation {
                id: row.get(0)?,
                license_id: row.get(1)?,
                obs_date: row.get(2)?,
                seats_used: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to query usage observations")
                .with_details(e.to_string())
        })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode usage observation row")
                .with_details(e.to_string())
        })?);
    }
    Ok(out)
}

/// In-window observations as `(license_id, date, seats_used)` tuples ready
/// for peak reduction. Rows whose stored date does not parse are skipped;
/// ingest normalizes dates so such rows are data damage, not pass failures.
pub fn list_usage_in_window(
    conn: &Connection,
    start: Date,
    end: Date,
) -> Result<Vec<(i64, Date, i64)>, AppError> {
    let mut stmt = conn
        .prepare(
            "SELECT license_id, obs_date, seats_used FROM usage_observations \
             WHERE obs_date >= ?1 AND obs_date <= ?2 ORDER BY license_id, obs_date",
        )
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to prepare usage window query")
                .with_details(e.to_string())
        })?;

    let rows = stmt
        .query_map(
            params![format_iso_date(start), format_iso_date(end)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to query usage window")
                .with_details(e.to_string())
        })?;

    let mut out = Vec::new();
    for r in rows {
        let (license_id, raw_date, seats_used) = r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode usage window row")
                .with_details(e.to_string())
        })?;
        if let Some(date) = parse_iso_date(&raw_date) {
            out.push((license_id, date, seats_used));
        }
    }
    Ok(out)
}

/// Snapshot of stored findings for a rule family, for reconciliation. Only
/// subject-bound findings participate; global (subject-less) findings are
/// left alone.
pub fn load_active_findings(
    conn: &Connection,
    rule_keys: &[RuleKey],
) -> Result<Vec<Finding>, AppError> {
    if rule_keys.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (1..=rule_keys.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {FINDING_COLUMNS} FROM findings \
         WHERE license_id IS NOT NULL AND rule_key IN ({placeholders}) ORDER BY id"
    );

    let mut stmt = conn.prepare(&sql).map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to prepare findings query")
            .with_details(e.to_string())
    })?;

    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(rule_keys.iter().map(|k| k.as_str())),
            map_finding_row,
        )
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to query findings")
                .with_details(e.to_string())
        })?;

    let mut out = Vec::new();
    for r in rows {
        let raw = r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode finding row")
                .with_details(e.to_string())
        })?;
        out.push(finish_finding(raw)?);
    }
    Ok(out)
}

pub fn list_findings(conn: &Connection) -> Result<Vec<Finding>, AppError> {
    let mut stmt = conn
        .prepare(&format!("SELECT {FINDING_COLUMNS} FROM findings ORDER BY id"))
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to prepare findings query")
                .with_details(e.to_string())
        })?;

    let rows = stmt.query_map([], map_finding_row).map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to query findings").with_details(e.to_string())
    })?;

    let mut out = Vec::new();
    for r in rows {
        let raw = r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode finding row")
                .with_details(e.to_string())
        })?;
        out.push(finish_finding(raw)?);
    }
    Ok(out)
}

pub fn get_finding(conn: &Connection, id: i64) -> Result<Finding, AppError> {
    let raw = conn
        .query_row(
            &format!("SELECT {FINDING_COLUMNS} FROM findings WHERE id = ?1"),
            [id],
            map_finding_row,
        )
        .map_err(|e| {
            AppError::new("DB_NOT_FOUND", "Finding not found").with_details(e.to_string())
        })?;
    finish_finding(raw)
}

pub fn insert_finding(conn: &Connection, finding: &Finding) -> Result<i64, AppError> {
    conn.execute(
        r#"
      INSERT INTO findings(
        license_id, rule_key, severity, status, title, details, evidence_json,
        is_active, category, detected_at, last_evaluated_at,
        acknowledged_at, acknowledged_by, resolved_at
      ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
      "#,
        params![
            finding.license_id,
            finding.rule_key.as_str(),
            finding.severity.as_str(),
            finding.status.as_str(),
            finding.title,
            finding.details,
            finding.evidence_json,
            finding.is_active,
            finding.category,
            finding.detected_at,
            finding.last_evaluated_at,
            finding.acknowledged_at,
            finding.acknowledged_by,
            finding.resolved_at,
        ],
    )
    .map_err(|e| {
        AppError::new("DB_INSERT_FAILED", "Failed to insert finding").with_details(e.to_string())
    })?;
    Ok(conn.last_insert_rowid())
}

pub fn update_finding(conn: &Connection, finding: &Finding) -> Result<(), AppError> {
    let changed = conn
        .execute(
            r#"
      UPDATE findings SET
        severity = ?1, status = ?2, title = ?3, details = ?4, evidence_json = ?5,
        is_active = ?6, category = ?7, detected_at = ?8, last_evaluated_at = ?9,
        acknowledged_at = ?10, acknowledged_by = ?11, resolved_at = ?12
      WHERE id = ?13
      "#,
            params![
                finding.severity.as_str(),
                finding.status.as_str(),
                finding.title,
                finding.details,
                finding.evidence_json,
                finding.is_active,
                finding.category,
                finding.detected_at,
                finding.last_evaluated_at,
                finding.acknowledged_at,
                finding.acknowledged_by,
                finding.resolved_at,
                finding.id,
            ],
        )
        .map_err(|e| {
            AppError::new("DB_UPDATE_FAILED", "Failed to update finding")
                .with_details(e.to_string())
        })?;
    if changed == 0 {
        return Err(
            AppError::new("DB_NOT_FOUND", "Finding not found").with_details(finding.id.to_string())
        );
    }
    Ok(())
}

/// Store-wide finding counts by status (both rule families).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusTotals {
    pub open: i64,
    pub acknowledged: i64,
    pub resolved: i64,
}

pub fn totals_by_status(conn: &Connection) -> Result<StatusTotals, AppError> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM findings GROUP BY status")
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to prepare status totals query")
                .with_details(e.to_string())
        })?;

    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to query status totals")
                .with_details(e.to_string())
        })?;

    let mut totals = StatusTotals::default();
    for r in rows {
        let (status, count) = r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode status total row")
                .with_details(e.to_string())
        })?;
        match FindingStatus::parse(&status)? {
            FindingStatus::Open => totals.open = count,
            FindingStatus::Acknowledged => totals.acknowledged = count,
            FindingStatus::Resolved => totals.resolved = count,
        }
    }
    Ok(totals)
}

/// External acknowledgement action. Only an Open finding can be acknowledged;
/// the engine itself never drives this transition.
pub fn acknowledge_finding(
    conn: &Connection,
    id: i64,
    acknowledged_by: &str,
    now: &str,
) -> Result<Finding, AppError> {
    let finding = get_finding(conn, id)?;
    if finding.status != FindingStatus::Open {
        return Err(AppError::new(
            "FINDING_NOT_OPEN",
            "Only an Open finding can be acknowledged",
        )
        .with_details(format!("id={id}; status={}", finding.status.as_str())));
    }

    conn.execute(
        "UPDATE findings SET status = ?1, acknowledged_at = ?2, acknowledged_by = ?3 WHERE id = ?4",
        params![
            FindingStatus::Acknowledged.as_str(),
            now,
            acknowledged_by,
            id
        ],
    )
    .map_err(|e| {
        AppError::new("DB_UPDATE_FAILED", "Failed to acknowledge finding")
            .with_details(e.to_string())
    })?;

    get_finding(conn, id)
}

/// Audit row written at the end of every evaluation pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationRun {
    pub id: i64,
    pub family: String,
    pub correlation_id: Option<String>,
    pub window_start: String,
    pub window_end: String,
    pub opened: i64,
    pub updated: i64,
    pub resolved: i64,
    pub started_at: String,
    pub finished_at: String,
}

#[allow(clippy::too_many_arguments)]
pub fn record_evaluation_run(
    conn: &Connection,
    family: &str,
    correlation_id: Option<&str>,
    window_start: &str,
    window_end: &str,
    opened: i64,
    updated: i64,
    resolved: i64,
    started_at: &str,
    finished_at: &str,
) -> Result<i64, AppError> {
    conn.execute(
        r#"
      INSERT INTO evaluation_runs(
        family, correlation_id, window_start, window_end,
        opened, updated, resolved, started_at, finished_at
      ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
      "#,
        params![
            family,
            correlation_id,
            window_start,
            window_end,
            opened,
            updated,
            resolved,
            started_at,
            finished_at,
        ],
    )
    .map_err(|e| {
        AppError::new("DB_INSERT_FAILED", "Failed to record evaluation run")
            .with_details(e.to_string())
    })?;
    Ok(conn.last_insert_rowid())
}

pub fn list_evaluation_runs(conn: &Connection) -> Result<Vec<EvaluationRun>, AppError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, family, correlation_id, window_start, window_end, \
             opened, updated, resolved, started_at, finished_at \
             FROM evaluation_runs ORDER BY id",
        )
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to prepare evaluation runs query")
                .with_details(e.to_string())
        })?;

    let rows = stmt
        .query_map([], |row| {
            Ok(EvaluationRun {
                id: row.get(0)?,
                family: row.get(1)?,
                correlation_id: row.get(2)?,
                window_start: row.get(3)?,
                window_end: row.get(4)?,
                opened: row.get(5)?,
                updated: row.get(6)?,
                resolved: row.get(7)?,
                started_at: row.get(8)?,
                finished_at: row.get(9)?,
            })
        })
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to query evaluation runs")
                .with_details(e.to_string())
        })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode evaluation run row")
                .with_details(e.to_string())
        })?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use pretty_assertions::assert_eq;
    use time::macros::date;

    const NOW: &str = "2026-01-30T00:00:00Z";

    fn test_conn() -> Connection {
        let mut conn = db::open_in_memory().expect("open");
        db::migrate(&mut conn).expect("migrate");
        conn
    }

    fn sample_license(name: &str) -> NewLicense {
        NewLicense {
            external_id: Some(format!("LIC-{name}")),
            fingerprint: format!("fp-{name}"),
            name: name.to_string(),
            vendor: Some("Vendor".to_string()),
            category: Some("Engineering".to_string()),
            seats_purchased: Some(10),
            seats_assigned: Some(8),
            expires_at: None,
            expires_at_raw: None,
        }
    }

    fn sample_finding(license_id: i64) -> Finding {
        Finding {
            id: 0,
            license_id: Some(license_id),
            rule_key: RuleKey::Overuse,
            severity: Severity::Critical,
            status: FindingStatus::Open,
            title: "t".to_string(),
            details: "d".to_string(),
            evidence_json: "{}".to_string(),
            is_active: true,
            category: None,
            detected_at: NOW.to_string(),
            last_evaluated_at: NOW.to_string(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
        }
    }

    #[test]
    fn license_insert_and_fingerprint_lookup() {
        let conn = test_conn();
        let id = insert_license(&conn, &sample_license("cad"), NOW).expect("insert");
        assert_eq!(find_license_id_by_fingerprint(&conn, "fp-cad").unwrap(), Some(id));
        assert_eq!(find_license_id_by_fingerprint(&conn, "fp-nope").unwrap(), None);
        assert_eq!(count_licenses(&conn).unwrap(), 1);

        let loaded = get_license(&conn, id).expect("get");
        assert_eq!(loaded.name, "cad");
        assert_eq!(loaded.seats_purchased, Some(10));
    }

    #[test]
    fn usage_upsert_overwrites_same_day() {
        let conn = test_conn();
        let id = insert_license(&conn, &sample_license("cad"), NOW).expect("insert");
        let day = date!(2026 - 01 - 10);
        upsert_usage_observation(&conn, id, day, 5, NOW).unwrap();
        upsert_usage_observation(&conn, id, day, 7, NOW).unwrap();

        let rows = list_usage_in_window(&conn, date!(2026 - 01 - 01), date!(2026 - 01 - 30)).unwrap();
        assert_eq!(rows, vec![(id, day, 7)]);

        // Out-of-window observations are excluded.
        let rows = list_usage_in_window(&conn, date!(2026 - 01 - 11), date!(2026 - 01 - 30)).unwrap();
        assert_eq!(rows, vec![]);
    }

    #[test]
    fn findings_filtered_by_rule_keys_and_subject() {
        let conn = test_conn();
        let id = insert_license(&conn, &sample_license("cad"), NOW).expect("insert");

        insert_finding(&conn, &sample_finding(id)).unwrap();
        let mut global = sample_finding(id);
        global.license_id = None;
        global.rule_key = RuleKey::Expired;
        insert_finding(&conn, &global).unwrap();
        let mut other_family = sample_finding(id);
        other_family.rule_key = RuleKey::UnassignedSeats;
        insert_finding(&conn, &other_family).unwrap();

        let loaded =
            load_active_findings(&conn, &[RuleKey::Overuse, RuleKey::Expired, RuleKey::MissingSeats])
                .unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].rule_key, RuleKey::Overuse);
        assert_eq!(loaded[0].license_id, Some(id));
    }

    #[test]
    fn acknowledge_requires_open_status() {
        let conn = test_conn();
        let id = insert_license(&conn, &sample_license("cad"), NOW).expect("insert");
        let fid = insert_finding(&conn, &sample_finding(id)).unwrap();

        let acked = acknowledge_finding(&conn, fid, "ops@example.com", NOW).expect("ack");
        assert_eq!(acked.status, FindingStatus::Acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("ops@example.com"));
        assert_eq!(acked.acknowledged_at.as_deref(), Some(NOW));

        let err = acknowledge_finding(&conn, fid, "ops@example.com", NOW).unwrap_err();
        assert_eq!(err.code, "FINDING_NOT_OPEN");
    }

    #[test]
    fn status_totals_cover_the_whole_store() {
        let conn = test_conn();
        let id = insert_license(&conn, &sample_license("cad"), NOW).expect("insert");

        insert_finding(&conn, &sample_finding(id)).unwrap();
        let mut resolved = sample_finding(id);
        resolved.rule_key = RuleKey::UnderutilizedSeats;
        resolved.status = FindingStatus::Resolved;
        resolved.is_active = false;
        resolved.resolved_at = Some(NOW.to_string());
        insert_finding(&conn, &resolved).unwrap();

        let totals = totals_by_status(&conn).unwrap();
        assert_eq!(
            totals,
            StatusTotals {
                open: 1,
                acknowledged: 0,
                resolved: 1
            }
        );
    }

    #[test]
    fn evaluation_runs_round_trip() {
        let conn = test_conn();
        record_evaluation_run(
            &conn,
            "Compliance",
            Some("corr-1"),
            "2026-01-01",
            "2026-01-30",
            2,
            1,
            0,
            NOW,
            NOW,
        )
        .unwrap();

        let runs = list_evaluation_runs(&conn).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].family, "Compliance");
        assert_eq!(runs[0].correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(runs[0].opened, 2);
    }
}
