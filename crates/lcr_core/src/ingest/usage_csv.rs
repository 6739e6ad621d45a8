use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::domain::ValidationWarning;
use crate::error::AppError;
use crate::normalize::timestamps::parse_iso_date;
use crate::repo::{find_license_id_by_external_id, upsert_usage_observation};

/// Maps CSV column headers to usage fields. All three columns are required:
/// an observation without a license, date, or seat count is meaningless.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageCsvMapping {
    pub license_external_id: String,
    pub obs_date: String,
    pub seats_used: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageImportConflict {
    pub row: usize,
    pub reason: String,
    pub license_external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub conflicts: Vec<UsageImportConflict>,
    pub warnings: Vec<ValidationWarning>,
}

fn get<'a>(
    row: &'a csv::StringRecord,
    headers: &'a csv::StringRecord,
    header_name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .position(|h| h == header_name)
        .and_then(|idx| row.get(idx))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Import daily usage observations from CSV text. Each row upserts one
/// (license, date) observation; rows that cannot be resolved to a license or
/// parsed deterministically are skipped with a conflict record.
pub fn import_usage_csv(
    conn: &mut Connection,
    csv_text: &str,
    mapping: &UsageCsvMapping,
    now: &str,
) -> Result<UsageImportSummary, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| {
            AppError::new("INGEST_CSV_HEADERS_FAILED", "Failed to read CSV headers")
                .with_details(e.to_string())
        })?
        .clone();

    let mut summary = UsageImportSummary {
        imported: 0,
        skipped: 0,
        conflicts: Vec::new(),
        warnings: Vec::new(),
    };

    let tx = conn.transaction().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to start import transaction")
            .with_details(e.to_string())
    })?;

    for (i, record) in reader.records().enumerate() {
        let row_no = i + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                summary.skipped += 1;
                summary.conflicts.push(UsageImportConflict {
                    row: row_no,
                    reason: format!("Unreadable CSV row: {e}"),
                    license_external_id: None,
                });
                continue;
            }
        };

        let external_id = get(&record, &headers, &mapping.license_external_id)
            .map(|s| s.to_string());
        let Some(external_id) = external_id else {
            summary.skipped += 1;
            summary.conflicts.push(UsageImportConflict {
                row: row_no,
                reason: "Missing license external id".to_string(),
                license_external_id: None,
            });
            continue;
        };

        let Some(license_id) = find_license_id_by_external_id(&tx, &external_id)? else {
            summary.skipped += 1;
            summary.conflicts.push(UsageImportConflict {
                row: row_no,
                reason: "No license with this external id".to_string(),
                license_external_id: Some(external_id),
            });
            continue;
        };

        let obs_date = get(&record, &headers, &mapping.obs_date).and_then(parse_iso_date);
        let Some(obs_date) = obs_date else {
            summary.skipped += 1;
            summary.conflicts.push(UsageImportConflict {
                row: row_no,
                reason: "Missing or non-ISO observation date".to_string(),
                license_external_id: Some(external_id),
            });
            continue;
        };

        let seats_used = match get(&record, &headers, &mapping.seats_used) {
            Some(s) => match s.parse::<i64>() {
                Ok(v) if v >= 0 => v,
                _ => {
                    summary.skipped += 1;
                    summary.warnings.push(
                        ValidationWarning::new(
                            "INGEST_SEATS_PARSE_FAILED",
                            format!("Unusable seats_used in row {row_no}"),
                        )
                        .with_details(format!("value={s}")),
                    );
                    continue;
                }
            },
            None => {
                summary.skipped += 1;
                summary.conflicts.push(UsageImportConflict {
                    row: row_no,
                    reason: "Missing seats_used".to_string(),
                    license_external_id: Some(external_id),
                });
                continue;
            }
        };

        upsert_usage_observation(&tx, license_id, obs_date, seats_used, now)?;
        summary.imported += 1;
    }

    tx.commit().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to commit import transaction")
            .with_details(e.to_string())
    })?;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::repo::{insert_license, list_usage_observations, NewLicense};
    use pretty_assertions::assert_eq;

    const NOW: &str = "2026-01-30T00:00:00Z";

    fn mapping() -> UsageCsvMapping {
        UsageCsvMapping {
            license_external_id: "License".to_string(),
            obs_date: "Date".to_string(),
            seats_used: "Seats".to_string(),
        }
    }

    fn conn_with_license() -> Connection {
        let mut conn = db::open_in_memory().expect("open");
        db::migrate(&mut conn).expect("migrate");
        insert_license(
            &conn,
            &NewLicense {
                external_id: Some("LIC-1".to_string()),
                fingerprint: "fp".to_string(),
                name: "CAD Suite".to_string(),
                vendor: None,
                category: None,
                seats_purchased: Some(10),
                seats_assigned: None,
                expires_at: None,
                expires_at_raw: None,
            },
            NOW,
        )
        .unwrap();
        conn
    }

    #[test]
    fn imports_and_overwrites_per_day() {
        let mut conn = conn_with_license();
        let csv = "License,Date,Seats\n\
                   LIC-1,2026-01-10,5\n\
                   LIC-1,2026-01-10,7\n\
                   LIC-1,2026-01-11,6\n";
        let summary = import_usage_csv(&mut conn, csv, &mapping(), NOW).unwrap();
        assert_eq!(summary.imported, 3);
        assert_eq!(summary.skipped, 0);

        let obs = list_usage_observations(&conn).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].obs_date, "2026-01-10");
        assert_eq!(obs[0].seats_used, 7);
        assert_eq!(obs[1].seats_used, 6);
    }

    #[test]
    fn unknown_license_and_bad_rows_are_skipped_with_conflicts() {
        let mut conn = conn_with_license();
        let csv = "License,Date,Seats\n\
                   LIC-404,2026-01-10,5\n\
                   LIC-1,10/01/2026,5\n\
                   LIC-1,2026-01-10,lots\n\
                   LIC-1,2026-01-12,4\n";
        let summary = import_usage_csv(&mut conn, csv, &mapping(), NOW).unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.conflicts.len(), 2);
        assert_eq!(summary.warnings.len(), 1);

        let obs = list_usage_observations(&conn).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].obs_date, "2026-01-12");
    }
}
