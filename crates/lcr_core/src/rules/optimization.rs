use crate::domain::{RuleKey, Severity};

use super::{Evidence, FindingCandidate, RuleInput};

/// Peak usage is at or below 30% of purchased seats. Missing usage data
/// counts as a peak of zero; thresholds are compared in integer arithmetic so
/// the 30% and 10% boundaries are exact.
pub fn underutilized_seats(input: &RuleInput) -> Option<FindingCandidate> {
    let purchased = input.license.seats_purchased.filter(|&p| p > 0)?;
    let peak_used = input.peak.map(|p| p.seats_used).unwrap_or(0).max(0);

    // utilization <= 0.30  <=>  peak * 10 <= purchased * 3
    if peak_used * 10 > purchased * 3 {
        return None;
    }
    // utilization <= 0.10  <=>  peak * 10 <= purchased
    let severity = if peak_used * 10 <= purchased {
        Severity::Critical
    } else {
        Severity::Warning
    };

    let utilization_pct = format!("{:.1}%", (peak_used as f64 / purchased as f64) * 100.0);
    Some(FindingCandidate::new(
        RuleKey::UnderutilizedSeats,
        severity,
        format!("Underutilized seats: {}", input.license.name),
        format!(
            "Peak usage of {} seat(s) is {} of the {} purchased for \"{}\".",
            peak_used, utilization_pct, purchased, input.license.name
        ),
        Evidence::UnderutilizedSeats {
            seats_purchased: purchased,
            peak_used,
            utilization_pct,
            window_days: input.window.days(),
        },
    ))
}

/// A meaningful share of purchased seats was never assigned to anyone:
/// at least 5 seats, or at least 20% of the purchase (rounded up).
pub fn unassigned_seats(input: &RuleInput) -> Option<FindingCandidate> {
    let purchased = input.license.seats_purchased.filter(|&p| p > 0)?;
    let assigned = input.license.seats_assigned?;
    let unassigned = purchased - assigned;
    if unassigned <= 0 {
        return None;
    }

    // ceil(0.20 * purchased) == ceil(purchased / 5)
    let pct_threshold = (purchased + 4) / 5;
    if unassigned < 5 && unassigned < pct_threshold {
        return None;
    }

    Some(FindingCandidate::new(
        RuleKey::UnassignedSeats,
        Severity::Warning,
        format!("Unassigned seats: {}", input.license.name),
        format!(
            "{} of {} purchased seat(s) for \"{}\" are not assigned to anyone.",
            unassigned, purchased, input.license.name
        ),
        Evidence::UnassignedSeats {
            seats_purchased: purchased,
            seats_assigned: assigned,
            unassigned,
        },
    ))
}
