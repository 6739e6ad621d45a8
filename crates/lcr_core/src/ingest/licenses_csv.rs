use sha2::{Digest, Sha256};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::domain::ValidationWarning;
use crate::error::AppError;
use crate::normalize::timestamps::normalize_timestamp;
use crate::repo::{find_license_id_by_fingerprint, insert_license, update_license, NewLicense};

/// Maps CSV column headers to license fields. `name` is the only required
/// column; everything else is nullable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LicenseCsvMapping {
    pub external_id: Option<String>,
    pub name: String,
    pub vendor: Option<String>,
    pub category: Option<String>,
    pub seats_purchased: Option<String>,
    pub seats_assigned: Option<String>,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LicenseImportConflict {
    pub row: usize,
    pub reason: String,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LicenseImportSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub conflicts: Vec<LicenseImportConflict>,
    pub warnings: Vec<ValidationWarning>,
}

fn normalize_for_fingerprint(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_lowercase()
}

/// Stable license identity for import dedup: normalized name + vendor.
/// Re-importing the same export updates records instead of duplicating them.
pub fn license_fingerprint(name: &str, vendor: Option<&str>) -> String {
    let payload = format!(
        "name={}|vendor={}",
        normalize_for_fingerprint(name),
        normalize_for_fingerprint(vendor.unwrap_or(""))
    );
    let digest = Sha256::digest(payload.as_bytes());
    hex::encode(digest)
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

fn parse_seats(
    raw: Option<&str>,
    field: &str,
    row: usize,
    warnings: &mut Vec<ValidationWarning>,
) -> Option<i64> {
    let s = raw?;
    match s.parse::<i64>() {
        Ok(v) if v >= 0 => Some(v),
        Ok(v) => {
            warnings.push(
                ValidationWarning::new(
                    "INGEST_SEATS_NEGATIVE",
                    format!("Negative {field} in row {row}"),
                )
                .with_details(format!("value={v}")),
            );
            None
        }
        Err(e) => {
            warnings.push(
                ValidationWarning::new(
                    "INGEST_SEATS_PARSE_FAILED",
                    format!("Failed to parse {field} in row {row}"),
                )
                .with_details(format!("value={s}; err={e}")),
            );
            None
        }
    }
}

/// Import licenses from CSV text. Rows are matched to existing records by
/// fingerprint: matches update in place, the rest insert. Rows without a
/// usable name are recorded as conflicts and skipped; the import itself only
/// fails on store errors.
pub fn import_licenses_csv(
    conn: &mut Connection,
    csv_text: &str,
    mapping: &LicenseCsvMapping,
    now: &str,
) -> Result<LicenseImportSummary, AppError> {
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

    let mut summary = LicenseImportSummary {
        inserted: 0,
        updated: 0,
        skipped: 0,
        conflicts: Vec::new(),
        warnings: Vec::new(),
    };

    let tx = conn.transaction().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to start import transaction")
            .with_details(e.to_string())
    })?;

    for (i, record) in reader.records().enumerate() {
        let row_no = i + 2; // 1-based, after the header row
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                summary.skipped += 1;
                summary.conflicts.push(LicenseImportConflict {
                    row: row_no,
                    reason: format!("Unreadable CSV row: {e}"),
                    external_id: None,
                });
                continue;
            }
        };

        let external_id = mapping
            .external_id
            .as_deref()
            .and_then(|h| get(&record, &headers, h))
            .map(|s| s.to_string());

        let Some(name) = get(&record, &headers, &mapping.name) else {
            summary.skipped += 1;
            summary.conflicts.push(LicenseImportConflict {
                row: row_no,
                reason: "Missing license name".to_string(),
                external_id,
            });
            continue;
        };

        let vendor = mapping
            .vendor
            .as_deref()
            .and_then(|h| get(&record, &headers, h))
            .map(|s| s.to_string());
        let category = mapping
            .category
            .as_deref()
            .and_then(|h| get(&record, &headers, h))
            .map(|s| s.to_string());

        let seats_purchased = parse_seats(
            mapping
                .seats_purchased
                .as_deref()
                .and_then(|h| get(&record, &headers, h)),
            "seats_purchased",
            row_no,
            &mut summary.warnings,
        );
        let seats_assigned = parse_seats(
            mapping
                .seats_assigned
                .as_deref()
                .and_then(|h| get(&record, &headers, h)),
            "seats_assigned",
            row_no,
            &mut summary.warnings,
        );

        let (expires_at, expires_at_raw) = match mapping
            .expires_at
            .as_deref()
            .and_then(|h| get(&record, &headers, h))
        {
            Some(raw) => {
                let normalized =
                    normalize_timestamp("expires_at", raw, &mut summary.warnings);
                (normalized.canonical_rfc3339_utc, normalized.raw)
            }
            None => (None, None),
        };

        let fingerprint = license_fingerprint(name, vendor.as_deref());
        let license = NewLicense {
            external_id,
            fingerprint: fingerprint.clone(),
            name: name.to_string(),
            vendor,
            category,
            seats_purchased,
            seats_assigned,
            expires_at,
            expires_at_raw,
        };

        match find_license_id_by_fingerprint(&tx, &fingerprint)? {
            Some(id) => {
                update_license(&tx, id, &license)?;
                summary.updated += 1;
            }
            None => {
                insert_license(&tx, &license, now)?;
                summary.inserted += 1;
            }
        }
    }

    tx.commit().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to commit import transaction")
            .with_details(e.to_string())
    })?;

    Ok(summary)
}
