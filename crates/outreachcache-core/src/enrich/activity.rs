use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Naive datetime layouts accepted after RFC 3339 fails. Interpreted as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an upstream timestamp.
///
/// Accepts RFC 3339 (`Z` or an offset), naive date-times and bare dates
/// (midnight UTC). Anything else is `None`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// A time range with optional bounds, inclusive at both ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityWindow {
    pub open: Option<DateTime<Utc>>,
    pub close: Option<DateTime<Utc>>,
}

impl ActivityWindow {
    pub fn parse(open: Option<&str>, close: Option<&str>) -> Self {
        Self {
            open: open.and_then(parse_timestamp),
            close: close.and_then(parse_timestamp),
        }
    }

    /// `Some(open <= now <= close)`, or `None` when either bound is unknown.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> Option<bool> {
        match (self.open, self.close) {
            (Some(open), Some(close)) => Some(open <= now && now <= close),
            _ => None,
        }
    }
}

/// Activity flags for one course.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CourseActivity {
    /// From `start`/`end`; the broad window during which edits are tracked.
    pub tracking: Option<bool>,
    /// From `timeline_start`/`timeline_end`; the event itself.
    pub event: Option<bool>,
}

impl CourseActivity {
    pub fn compute(
        start: Option<&str>,
        end: Option<&str>,
        timeline_start: Option<&str>,
        timeline_end: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tracking: ActivityWindow::parse(start, end).is_active_at(now),
            event: ActivityWindow::parse(timeline_start, timeline_end).is_active_at(now),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(raw: &str) -> DateTime<Utc> {
        parse_timestamp(raw).unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-15T10:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T10:30:00.000Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T12:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15 10:30:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-15"),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_timestamp_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("   "), None);
        assert_eq!(parse_timestamp("soon"), None);
        assert_eq!(parse_timestamp("2024-13-45"), None);
        assert_eq!(parse_timestamp("01/15/2024"), None);
    }

    #[test]
    fn test_window_inclusive_bounds() {
        let window = ActivityWindow::parse(Some("2024-01-01"), Some("2024-01-31"));
        assert_eq!(window.is_active_at(at("2024-01-15")), Some(true));
        assert_eq!(window.is_active_at(at("2024-01-01")), Some(true));
        assert_eq!(window.is_active_at(at("2024-01-31")), Some(true));
        assert_eq!(window.is_active_at(at("2024-02-01")), Some(false));
        assert_eq!(window.is_active_at(at("2023-12-31")), Some(false));
    }

    #[test]
    fn test_window_missing_bound_is_unknown() {
        let now = at("2024-01-15");
        assert_eq!(ActivityWindow::parse(Some("2024-01-01"), None).is_active_at(now), None);
        assert_eq!(ActivityWindow::parse(None, Some("2024-01-31")).is_active_at(now), None);
        assert_eq!(ActivityWindow::parse(None, None).is_active_at(now), None);
    }

    #[test]
    fn test_window_unparsable_bound_is_unknown() {
        let now = at("2024-01-15");
        let window = ActivityWindow::parse(Some("2024-01-01"), Some("whenever"));
        assert_eq!(window.is_active_at(now), None);
        assert_eq!(ActivityWindow::parse(Some(""), Some("2024-01-31")).is_active_at(now), None);
    }

    #[test]
    fn test_course_activity_windows_are_independent() {
        let now = at("2024-03-10T12:00:00Z");
        let activity = CourseActivity::compute(
            Some("2024-03-01T00:00:00Z"),
            Some("2024-03-31T23:59:59Z"),
            Some("2024-03-09T00:00:00Z"),
            Some("not a date"),
            now,
        );
        assert_eq!(activity.tracking, Some(true));
        assert_eq!(activity.event, None);

        let activity = CourseActivity::compute(
            None,
            None,
            Some("2024-03-09T00:00:00Z"),
            Some("2024-03-09T23:59:59Z"),
            now,
        );
        assert_eq!(activity.tracking, None);
        assert_eq!(activity.event, Some(false));
    }
}
