use time::format_description;
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::domain::ValidationWarning;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTimestamp {
    /// Canonical RFC3339 UTC string, if deterministically parseable.
    pub canonical_rfc3339_utc: Option<String>,
    /// Raw input preserved for non-RFC3339 (or unparseable) inputs.
    pub raw: Option<String>,
}

fn canonicalize_rfc3339_utc(dt: OffsetDateTime) -> Option<String> {
    dt.to_offset(UtcOffset::UTC).format(&Rfc3339).ok()
}

fn parse_primitive_assume_utc(
    raw: &str,
    fmt: &str,
    field: &str,
    warnings: &mut Vec<ValidationWarning>,
) -> Option<String> {
    let items = match format_description::parse(fmt) {
        Ok(i) => i,
        Err(e) => {
            warnings.push(
                ValidationWarning::new(
                    "INGEST_TS_FORMAT_CONFIG_FAILED",
                    format!("Timestamp format config error for {field}"),
                )
                .with_details(format!("fmt={fmt}; err={e}")),
            );
            return None;
        }
    };

    let pdt = PrimitiveDateTime::parse(raw, &items).ok()?;

    // This format carries no timezone. We assume UTC deterministically but MUST warn explicitly.
    warnings.push(
        ValidationWarning::new(
            "INGEST_TS_TZ_ASSUMED_UTC",
            format!("Assumed UTC timezone for {field}"),
        )
        .with_details(format!("value={raw}; fmt={fmt}")),
    );

    canonicalize_rfc3339_utc(pdt.assume_utc())
}

/// Normalize an expiry (or other) timestamp into canonical RFC3339 UTC while
/// preserving raw inputs.
///
/// Contract:
/// - RFC3339 input: canonical stored, `raw=None`.
/// - Deterministic allowlisted forms without a timezone (`YYYY-MM-DD`,
///   `YYYY-MM-DD HH:MM[:SS]`, and the `T`-separated variants): canonicalized
///   assuming UTC, raw preserved, explicit warnings emitted.
/// - Anything else: canonical stays `None`, raw preserved, explicit warning.
pub fn normalize_timestamp(
    field: &str,
    raw_input: &str,
    warnings: &mut Vec<ValidationWarning>,
) -> NormalizedTimestamp {
    let trimmed = raw_input.trim();
    if trimmed.is_empty() {
        return NormalizedTimestamp {
            canonical_rfc3339_utc: None,
            raw: None,
        };
    }

    if let Ok(dt) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return NormalizedTimestamp {
            canonical_rfc3339_utc: canonicalize_rfc3339_utc(dt),
            raw: None,
        };
    }

    // Bare dates are common in license exports; treat them as midnight UTC.
    if let Some(date) = parse_iso_date(trimmed) {
        let canon = canonicalize_rfc3339_utc(date.midnight().assume_utc());
        if let Some(canon) = canon {
            warnings.push(
                ValidationWarning::new(
                    "INGEST_TS_DATE_ONLY",
                    format!("Date-only value for {field}; canonicalized as midnight UTC"),
                )
                .with_details(format!("raw={trimmed}; canonical={canon}")),
            );
            return NormalizedTimestamp {
                canonical_rfc3339_utc: Some(canon),
                raw: Some(trimmed.to_string()),
            };
        }
    }

    for fmt in [
        "[year]-[month]-[day] [hour]:[minute]:[second]",
        "[year]-[month]-[day] [hour]:[minute]",
        "[year]-[month]-[day]T[hour]:[minute]:[second]",
        "[year]-[month]-[day]T[hour]:[minute]",
    ] {
        if let Some(canon) = parse_primitive_assume_utc(trimmed, fmt, field, warnings) {
            warnings.push(
                ValidationWarning::new(
                    "INGEST_TS_NORMALIZED",
                    format!("Normalized non-RFC3339 timestamp for {field}"),
                )
                .with_details(format!("raw={trimmed}; canonical={canon}")),
            );
            return NormalizedTimestamp {
                canonical_rfc3339_utc: Some(canon),
                raw: Some(trimmed.to_string()),
            };
        }
    }

    warnings.push(
        ValidationWarning::new(
            "INGEST_TS_UNPARSEABLE",
            format!("Unparseable timestamp for {field}; preserved raw"),
        )
        .with_details(format!("raw={trimmed}")),
    );

    NormalizedTimestamp {
        canonical_rfc3339_utc: None,
        raw: Some(trimmed.to_string()),
    }
}

/// Parse a `YYYY-MM-DD` calendar date. Returns `None` for anything else; no
/// fuzzy parsing.
pub fn parse_iso_date(raw: &str) -> Option<Date> {
    let items = format_description::parse("[year]-[month]-[day]").ok()?;
    Date::parse(raw.trim(), &items).ok()
}

/// Format a calendar date as `YYYY-MM-DD`.
pub fn format_iso_date(date: Date) -> String {
    // The format description is static; parse failure here would be a bug in
    // the literal, so fall back to Display ordering which is also ISO-like.
    match format_description::parse("[year]-[month]-[day]") {
        Ok(items) => date.format(&items).unwrap_or_else(|_| date.to_string()),
        Err(_) => date.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use time::Month;

    #[test]
    fn rfc3339_input_is_canonical_without_raw() {
        let mut warnings = Vec::new();
        let n = normalize_timestamp("expires_at", "2026-03-01T12:30:00+02:00", &mut warnings);
        assert_eq!(
            n.canonical_rfc3339_utc.as_deref(),
            Some("2026-03-01T10:30:00Z")
        );
        assert_eq!(n.raw, None);
        assert!(warnings.is_empty());
    }

    #[test]
    fn date_only_input_becomes_midnight_utc_with_warning() {
        let mut warnings = Vec::new();
        let n = normalize_timestamp("expires_at", "2026-03-01", &mut warnings);
        assert_eq!(
            n.canonical_rfc3339_utc.as_deref(),
            Some("2026-03-01T00:00:00Z")
        );
        assert_eq!(n.raw.as_deref(), Some("2026-03-01"));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, "INGEST_TS_DATE_ONLY");
    }

    #[test]
    fn unparseable_input_preserves_raw_only() {
        let mut warnings = Vec::new();
        let n = normalize_timestamp("expires_at", "next spring", &mut warnings);
        assert_eq!(n.canonical_rfc3339_utc, None);
        assert_eq!(n.raw.as_deref(), Some("next spring"));
        assert!(warnings.iter().any(|w| w.code == "INGEST_TS_UNPARSEABLE"));
    }

    #[test]
    fn iso_date_round_trip() {
        let d = parse_iso_date("2026-02-07").expect("parse");
        assert_eq!(d.year(), 2026);
        assert_eq!(d.month(), Month::February);
        assert_eq!(d.day(), 7);
        assert_eq!(format_iso_date(d), "2026-02-07");
        assert_eq!(parse_iso_date("07/02/2026"), None);
    }
}
