use rusqlite::Connection;

use crate::error::AppError;
use crate::ingest::licenses_csv::{import_licenses_csv, LicenseCsvMapping, LicenseImportSummary};
use crate::ingest::usage_csv::{import_usage_csv, UsageCsvMapping, UsageImportSummary};

const DEMO_NOW: &str = "2026-01-30T00:00:00Z";

fn demo_licenses_csv() -> String {
    // Sanitized, deterministic dataset covering every rule at least once.
    // Expiry timestamps stay RFC3339 so canonical values survive ingest.
    let mut out = String::new();
    out.push_str("Id,Name,Vendor,Category,Purchased,Assigned,Expires\n");
    out.push_str("LIC-001,CAD Suite,Draftworks,Engineering,10,10,2027-01-01T00:00:00Z\n");
    out.push_str("LIC-002,Render Farm,Pixelsmith,Media,100,15,2027-01-01T00:00:00Z\n");
    out.push_str("LIC-003,Ledger Pro,Countable,Finance,50,30,2027-01-01T00:00:00Z\n");
    out.push_str("LIC-004,Old Archiver,Shelfware,Operations,5,5,2026-01-28T00:00:00Z\n");
    out.push_str("LIC-005,Sketch Beta,Draftworks,Engineering,,,\n");
    out.push_str("LIC-006,Helpdesk Hub,Ticketeer,Support,20,18,2027-01-01T00:00:00Z\n");
    out
}

fn demo_usage_csv() -> String {
    let mut out = String::new();
    out.push_str("License,Date,Seats\n");

    // LIC-001 runs hot: peaks over its 10 purchased seats mid-month.
    for day in 5..=20 {
        let seats = if day == 15 { 15 } else { 8 };
        out.push_str(&format!("LIC-001,2026-01-{day:02},{seats}\n"));
    }
    // LIC-003 sits comfortably inside its purchase.
    for day in 5..=20 {
        out.push_str(&format!("LIC-003,2026-01-{day:02},28\n"));
    }
    // LIC-005 has usage but no purchased seat count on record.
    out.push_str("LIC-005,2026-01-12,4\n");
    out.push_str("LIC-005,2026-01-19,6\n");
    // LIC-006 is healthy.
    for day in 5..=20 {
        out.push_str(&format!("LIC-006,2026-01-{day:02},16\n"));
    }
    out
}

/// Seed the deterministic demo dataset through the real ingest path.
pub fn seed_demo_dataset(
    conn: &mut Connection,
) -> Result<(LicenseImportSummary, UsageImportSummary), AppError> {
    let license_mapping = LicenseCsvMapping {
        external_id: Some("Id".to_string()),
        name: "Name".to_string(),
        vendor: Some("Vendor".to_string()),
        category: Some("Category".to_string()),
        seats_purchased: Some("Purchased".to_string()),
        seats_assigned: Some("Assigned".to_string()),
        expires_at: Some("Expires".to_string()),
    };
    let licenses = import_licenses_csv(conn, &demo_licenses_csv(), &license_mapping, DEMO_NOW)?;

    let usage_mapping = UsageCsvMapping {
        license_external_id: "License".to_string(),
        obs_date: "Date".to_string(),
        seats_used: "Seats".to_string(),
    };
    let usage = import_usage_csv(conn, &demo_usage_csv(), &usage_mapping, DEMO_NOW)?;

    Ok((licenses, usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::domain::{RuleFamily, RuleKey};
    use crate::engine::{evaluate, EvaluationContext};
    use crate::repo;
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    #[test]
    fn demo_dataset_exercises_every_rule() {
        let mut conn = db::open_in_memory().expect("open");
        db::migrate(&mut conn).expect("migrate");

        let (licenses, usage) = seed_demo_dataset(&mut conn).expect("seed");
        assert_eq!(licenses.inserted, 6);
        assert_eq!(licenses.skipped, 0);
        assert_eq!(usage.skipped, 0);

        let ctx = EvaluationContext::new(datetime!(2026-01-30 12:00 UTC));
        evaluate(&mut conn, RuleFamily::Compliance, None, None, &ctx).unwrap();
        evaluate(&mut conn, RuleFamily::Optimization, None, None, &ctx).unwrap();

        let mut seen: Vec<RuleKey> = repo::list_findings(&conn)
            .unwrap()
            .iter()
            .map(|f| f.rule_key)
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(
            seen,
            vec![
                RuleKey::Overuse,
                RuleKey::Expired,
                RuleKey::MissingSeats,
                RuleKey::UnderutilizedSeats,
                RuleKey::UnassignedSeats,
            ]
        );
    }

    #[test]
    fn seeding_twice_does_not_duplicate_licenses() {
        let mut conn = db::open_in_memory().expect("open");
        db::migrate(&mut conn).expect("migrate");

        seed_demo_dataset(&mut conn).expect("first seed");
        let (licenses, _) = seed_demo_dataset(&mut conn).expect("second seed");
        assert_eq!(licenses.inserted, 0);
        assert_eq!(licenses.updated, 6);
        assert_eq!(repo::count_licenses(&conn).unwrap(), 6);
    }
}
