//! Overdue fine calculation.

use chrono::{DateTime, Utc};

/// Fine charged per started hour overdue, in currency units.
pub const FINE_PER_HOUR: f64 = 0.5;

/// Compute the fine owed on a loan due at `due_date` as of `now`.
///
/// Returns 0 while the loan is not yet overdue. Past the due date every
/// started hour counts as a full hour. Pure and callable at any time, not
/// just at return, so the UI can show a running total.
pub fn fine(due_date: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    if now <= due_date {
        return 0.0;
    }

    let late_ms = (now - due_date).num_milliseconds();
    let late_hours = (late_ms + 3_599_999) / 3_600_000;
    late_hours as f64 * FINE_PER_HOUR
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_no_fine_before_or_at_due_date() {
        assert_eq!(fine(due(), due() - Duration::days(3)), 0.0);
        assert_eq!(fine(due(), due()), 0.0);
    }

    #[test]
    fn test_partial_hour_counts_as_full_hour() {
        assert_eq!(fine(due(), due() + Duration::seconds(1)), 0.5);
        assert_eq!(fine(due(), due() + Duration::minutes(30)), 0.5);
        assert_eq!(fine(due(), due() + Duration::hours(1)), 0.5);
    }

    #[test]
    fn test_second_hour_starts_a_new_unit() {
        assert_eq!(
            fine(due(), due() + Duration::hours(1) + Duration::seconds(1)),
            1.0
        );
    }

    #[test]
    fn test_whole_hours() {
        assert_eq!(fine(due(), due() + Duration::hours(25)), 12.5);
        // 8 days late: 192 started hours
        assert_eq!(fine(due(), due() + Duration::days(8)), 96.0);
    }
}
