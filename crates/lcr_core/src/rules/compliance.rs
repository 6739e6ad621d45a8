use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::domain::{RuleKey, Severity};
use crate::normalize::timestamps::format_iso_date;

use super::{Evidence, FindingCandidate, RuleInput};

/// Peak concurrent usage exceeds the purchased seat count.
pub fn overuse(input: &RuleInput) -> Option<FindingCandidate> {
    let purchased = input.license.seats_purchased.filter(|&p| p > 0)?;
    let peak = input.peak?;
    if peak.seats_used <= purchased {
        return None;
    }

    let peak_date = format_iso_date(peak.peak_date);
    Some(FindingCandidate::new(
        RuleKey::Overuse,
        Severity::Critical,
        format!("Seat overuse: {}", input.license.name),
        format!(
            "Peak concurrent usage of {} seats exceeds the {} purchased for \"{}\" (peak on {}).",
            peak.seats_used, purchased, input.license.name, peak_date
        ),
        Evidence::Overuse {
            seats_purchased: purchased,
            peak_used: peak.seats_used,
            peak_date,
            window_days: input.window.days(),
            source: peak.source.as_str().to_string(),
        },
    ))
}

/// License expiry date (UTC date comparison, time of day ignored) is today or
/// earlier. Abstains when the expiry is missing or not canonical RFC3339.
pub fn expired(input: &RuleInput) -> Option<FindingCandidate> {
    let raw = input.license.expires_at.as_deref()?;
    let expires = OffsetDateTime::parse(raw, &Rfc3339).ok()?;
    let expires_on = expires.to_offset(UtcOffset::UTC).date();
    if expires_on > input.today {
        return None;
    }

    let days_past_due = (input.today.to_julian_day() - expires_on.to_julian_day()) as i64;
    Some(FindingCandidate::new(
        RuleKey::Expired,
        Severity::Critical,
        format!("License expired: {}", input.license.name),
        format!(
            "\"{}\" expired on {} ({} day(s) past due).",
            input.license.name,
            format_iso_date(expires_on),
            days_past_due
        ),
        Evidence::Expired {
            expires_on: format_iso_date(expires_on),
            days_past_due,
        },
    ))
}

/// Usage was observed but no purchased seat count is recorded, so compliance
/// cannot be judged at all.
pub fn missing_seats(input: &RuleInput) -> Option<FindingCandidate> {
    if input.license.seats_purchased.is_some() {
        return None;
    }
    let peak = input.peak.filter(|p| p.seats_used > 0)?;

    let peak_date = format_iso_date(peak.peak_date);
    Some(FindingCandidate::new(
        RuleKey::MissingSeats,
        Severity::Warning,
        format!("No purchased seat count: {}", input.license.name),
        format!(
            "Usage peaked at {} seats for \"{}\" but no purchased seat count is recorded.",
            peak.seats_used, input.license.name
        ),
        Evidence::MissingSeats {
            peak_used: peak.seats_used,
            peak_date,
            window_days: input.window.days(),
            source: peak.source.as_str().to_string(),
        },
    ))
}
