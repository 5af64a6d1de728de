//! # Temporal Helpers
//!
//! All instants are `DateTime<Utc>`; calendar dates (due dates, issue dates)
//! are `NaiveDate`. Display formats match the spreadsheets and notes the
//! back office has always produced (`dd/MM/yyyy HH:mm`).

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Format used in notes and exported spreadsheets.
pub const DISPLAY_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Date-only display format.
pub const DATE_FORMAT: &str = "%d/%m/%Y";

/// Render an instant as `dd/MM/yyyy HH:mm`.
pub fn display(at: &DateTime<Utc>) -> String {
    at.format(DISPLAY_FORMAT).to_string()
}

/// Render a calendar date as `dd/MM/yyyy`.
pub fn display_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Whole days elapsed since `due`, or 0 when `due` is today or later.
pub fn days_overdue(due: NaiveDate, today: NaiveDate) -> i64 {
    (today - due).num_days().max(0)
}

/// Whether two instants fall in the same calendar month.
pub fn same_month(a: &DateTime<Utc>, b: &DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn display_uses_day_first() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 14, 5, 0).unwrap();
        assert_eq!(display(&at), "07/03/2025 14:05");
        assert_eq!(display_date(&at.date_naive()), "07/03/2025");
    }

    #[test]
    fn days_overdue_never_negative() {
        let due = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let before = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let after = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        assert_eq!(days_overdue(due, before), 0);
        assert_eq!(days_overdue(due, after), 5);
    }

    #[test]
    fn same_month_checks_year() {
        let a = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 3, 31, 23, 0, 0).unwrap();
        let c = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert!(same_month(&a, &b));
        assert!(!same_month(&a, &c));
    }
}
