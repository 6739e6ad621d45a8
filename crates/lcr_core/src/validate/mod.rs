use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::domain::{License, ValidationWarning};
use crate::error::AppError;

/// Validate a license record. Warnings never block evaluation — rules abstain
/// over bad fields on their own — but the UI surfaces them so data owners can
/// fix the source.
pub fn validate_license(license: &License) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    for (field, value) in [
        ("seats_purchased", license.seats_purchased),
        ("seats_assigned", license.seats_assigned),
    ] {
        if let Some(v) = value {
            if v < 0 {
                warnings.push(
                    ValidationWarning::new(
                        "VALIDATION_SEATS_NEGATIVE",
                        format!("{field} is negative"),
                    )
                    .with_details(format!("value={v}")),
                );
            }
        }
    }

    if let (Some(purchased), Some(assigned)) = (license.seats_purchased, license.seats_assigned) {
        if purchased >= 0 && assigned > purchased {
            warnings.push(
                ValidationWarning::new(
                    "VALIDATION_ASSIGNED_EXCEEDS_PURCHASED",
                    "More seats assigned than purchased",
                )
                .with_details(format!("purchased={purchased}; assigned={assigned}")),
            );
        }
    }

    match license.expires_at.as_deref() {
        Some(s) => {
            if OffsetDateTime::parse(s, &Rfc3339).is_err() {
                warnings.push(
                    ValidationWarning::new(
                        "VALIDATION_TS_PARSE_FAILED",
                        "Failed to parse expires_at",
                    )
                    .with_details(format!("value={s}")),
                );
            }
        }
        None => {
            // Raw-but-uncanonical expiry: provided, preserved, unusable.
            if let Some(raw) = license.expires_at_raw.as_deref() {
                warnings.push(
                    ValidationWarning::new(
                        "VALIDATION_TS_RAW_PRESENT",
                        "Non-canonical expiry preserved; canonical is UNKNOWN",
                    )
                    .with_details(format!("raw={raw}")),
                );
            }
        }
    }

    warnings
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LicenseValidationReportItem {
    pub id: i64,
    pub external_id: Option<String>,
    pub name: String,
    pub warnings: Vec<ValidationWarning>,
}

pub fn validate_all_licenses(
    conn: &Connection,
) -> Result<Vec<LicenseValidationReportItem>, AppError> {
    let licenses = crate::repo::list_licenses(conn)?;
    let mut out = Vec::new();

    for lic in licenses {
        let warnings = validate_license(&lic);
        out.push(LicenseValidationReportItem {
            id: lic.id,
            external_id: lic.external_id,
            name: lic.name,
            warnings,
        });
    }

    // Deterministic ordering.
    out.sort_by(|a, b| {
        (
            a.external_id.clone().unwrap_or_default(),
            a.name.clone(),
            a.id,
        )
            .cmp(&(
                b.external_id.clone().unwrap_or_default(),
                b.name.clone(),
                b.id,
            ))
    });

    Ok(out)
}
