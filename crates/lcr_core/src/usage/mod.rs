use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{Date, Duration};

/// Inclusive date window an evaluation pass looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationWindow {
    pub start: Date,
    pub end: Date,
}

impl EvaluationWindow {
    /// Normalize caller-supplied bounds.
    ///
    /// - `end` defaults to today (UTC).
    /// - `start` defaults to `end - 29 days` (a 30-day trailing window).
    /// - Reversed bounds are swapped rather than rejected; callers may pass
    ///   either order.
    pub fn resolve(start: Option<Date>, end: Option<Date>, today: Date) -> Self {
        let end = end.unwrap_or(today);
        let start = start.unwrap_or_else(|| end.checked_sub(Duration::days(29)).unwrap_or(end));
        if start > end {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    /// Window length in days, inclusive of both bounds.
    pub fn days(&self) -> i64 {
        (self.end.to_julian_day() - self.start.to_julian_day()) as i64 + 1
    }

    pub fn contains(&self, date: Date) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UsageSource {
    /// Peak taken from recorded usage observations inside the window.
    Observed,
    /// No observation in the window; peak derived from assigned seats.
    AssignedFallback,
}

impl UsageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageSource::Observed => "observed",
            UsageSource::AssignedFallback => "assigned_fallback",
        }
    }
}

/// Peak concurrent seat usage for one license inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsagePeak {
    pub seats_used: i64,
    pub peak_date: Date,
    pub source: UsageSource,
}

/// Reduce in-window observations to one peak per license.
///
/// Maximum `seats_used` wins; ties prefer the most recent date. The reduction
/// is order-independent: any permutation of the input produces the same map.
pub fn reduce_peaks(observations: &[(i64, Date, i64)]) -> BTreeMap<i64, UsagePeak> {
    let mut peaks: BTreeMap<i64, UsagePeak> = BTreeMap::new();
    for &(license_id, date, seats_used) in observations {
        match peaks.get_mut(&license_id) {
            None => {
                peaks.insert(
                    license_id,
                    UsagePeak {
                        seats_used,
                        peak_date: date,
                        source: UsageSource::Observed,
                    },
                );
            }
            Some(peak) => {
                if seats_used > peak.seats_used
                    || (seats_used == peak.seats_used && date > peak.peak_date)
                {
                    peak.seats_used = seats_used;
                    peak.peak_date = date;
                }
            }
        }
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use time::macros::date;

    #[test]
    fn resolve_defaults_to_trailing_thirty_days() {
        let today = date!(2026 - 02 - 15);
        let w = EvaluationWindow::resolve(None, None, today);
        assert_eq!(w.end, today);
        assert_eq!(w.start, date!(2026 - 01 - 17));
        assert_eq!(w.days(), 30);
    }

    #[test]
    fn resolve_swaps_reversed_bounds() {
        let today = date!(2026 - 02 - 15);
        let a = date!(2026 - 01 - 01);
        let b = date!(2026 - 01 - 10);
        let w1 = EvaluationWindow::resolve(Some(a), Some(b), today);
        let w2 = EvaluationWindow::resolve(Some(b), Some(a), today);
        assert_eq!(w1, w2);
        assert_eq!(w1.days(), 10);
    }

    #[test]
    fn reduction_is_order_independent_with_recent_date_tie_break() {
        let obs = vec![
            (1, date!(2026 - 01 - 03), 7),
            (1, date!(2026 - 01 - 09), 9),
            (1, date!(2026 - 01 - 05), 9),
            (2, date!(2026 - 01 - 04), 2),
        ];
        let forward = reduce_peaks(&obs);
        let mut reversed = obs.clone();
        reversed.reverse();
        assert_eq!(forward, reduce_peaks(&reversed));

        let peak = forward.get(&1).expect("peak for license 1");
        assert_eq!(peak.seats_used, 9);
        assert_eq!(peak.peak_date, date!(2026 - 01 - 09));
        assert_eq!(peak.source, UsageSource::Observed);
        assert_eq!(forward.get(&2).unwrap().seats_used, 2);
    }
}
