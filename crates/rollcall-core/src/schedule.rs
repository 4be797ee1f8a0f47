//! Schedule-window resolution.
//!
//! Pure policy over candidate sessions; the store supplies the rows.

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::types::Session;

/// Find the session whose weekly window contains `now`, optionally
/// restricted to one lecturer's sessions.
///
/// The window is half-open: a capture at exactly `start` is inside the
/// session, a capture at exactly `end` is not. If overlapping windows
/// match (an administrative data error), the smallest session id wins so
/// the result never depends on row order. No match is `None`, not an
/// error — gaps between periods are normal.
pub fn resolve_active<'a>(
    sessions: &'a [Session],
    now: NaiveDateTime,
    lecturer_scope: Option<&str>,
) -> Option<&'a Session> {
    let weekday = now.weekday();
    let time = now.time();

    sessions
        .iter()
        .filter(|s| s.weekday == weekday)
        .filter(|s| s.start <= time && time < s.end)
        .filter(|s| lecturer_scope.map_or(true, |l| s.lecturer_number == l))
        .min_by_key(|s| s.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, Weekday};

    fn session(id: i64, weekday: Weekday, start: &str, end: &str, lecturer: &str) -> Session {
        Session {
            id,
            course_code: "CS101".into(),
            lecturer_number: lecturer.into(),
            weekday,
            start: NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            end: NaiveTime::parse_from_str(end, "%H:%M").unwrap(),
            venue: "B2-L14".into(),
        }
    }

    fn monday_at(time: &str) -> NaiveDateTime {
        // 2025-09-01 is a Monday.
        NaiveDate::from_ymd_opt(2025, 9, 1)
            .unwrap()
            .and_time(NaiveTime::parse_from_str(time, "%H:%M").unwrap())
    }

    #[test]
    fn test_start_is_inclusive_end_is_exclusive() {
        let sessions = vec![session(1, Weekday::Mon, "10:00", "11:00", "L1")];

        assert!(resolve_active(&sessions, monday_at("10:00"), None).is_some());
        assert!(resolve_active(&sessions, monday_at("10:59"), None).is_some());
        assert!(resolve_active(&sessions, monday_at("11:00"), None).is_none());
    }

    #[test]
    fn test_before_window_is_none() {
        let sessions = vec![session(1, Weekday::Mon, "10:00", "11:00", "L1")];
        assert!(resolve_active(&sessions, monday_at("09:59"), None).is_none());
    }

    #[test]
    fn test_wrong_weekday_is_none() {
        let sessions = vec![session(1, Weekday::Tue, "10:00", "11:00", "L1")];
        assert!(resolve_active(&sessions, monday_at("10:30"), None).is_none());
    }

    #[test]
    fn test_overlap_picks_smallest_id() {
        let sessions = vec![
            session(7, Weekday::Mon, "10:00", "12:00", "L1"),
            session(3, Weekday::Mon, "09:00", "11:00", "L1"),
            session(5, Weekday::Mon, "10:00", "11:00", "L1"),
        ];

        let active = resolve_active(&sessions, monday_at("10:30"), None).unwrap();
        assert_eq!(active.id, 3);
    }

    #[test]
    fn test_lecturer_scope_filters() {
        let sessions = vec![
            session(1, Weekday::Mon, "10:00", "11:00", "L1"),
            session(2, Weekday::Mon, "10:00", "11:00", "L2"),
        ];

        let active = resolve_active(&sessions, monday_at("10:30"), Some("L2")).unwrap();
        assert_eq!(active.id, 2);
        assert!(resolve_active(&sessions, monday_at("10:30"), Some("L9")).is_none());
    }

    #[test]
    fn test_empty_schedule_is_none() {
        assert!(resolve_active(&[], monday_at("10:30"), None).is_none());
    }
}
