use serde::{Deserialize, Serialize};

use super::course::{CourseEnrollment, CourseUser};

/// A user's courses with a summary of the roles they hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCourses {
    pub username: String,
    pub courses: Vec<CourseEnrollment>,
    pub is_instructor: bool,
    pub is_student: bool,
    pub max_project: Option<String>,
}

/// A course roster, one record per username, split by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRoster {
    pub slug: String,
    pub facilitators: Vec<CourseUser>,
    pub participants: Vec<CourseUser>,
    pub all_users: Vec<CourseUser>,
    pub active_event: Option<bool>,
    pub active_tracking: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveCourseStaff {
    pub course_slug: String,
    pub course_title: String,
    pub staff: Vec<String>,
}

/// Staff across every currently active course of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveStaff {
    pub username: String,
    /// Sorted, deduplicated union of `courses[*].staff`.
    pub all_staff: Vec<String>,
    pub courses: Vec<ActiveCourseStaff>,
}

/// Lightweight presence/activity summary for a user.
///
/// Counts only include courses whose flag is known to be `true`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStatus {
    pub username: String,
    pub has_any_courses: bool,
    pub has_active_event: bool,
    pub has_active_tracking: bool,
    pub active_event_count: usize,
    pub tracked_count: usize,
    pub total_courses: usize,
}

impl DashboardStatus {
    /// Status for a user the upstream doesn't know about.
    pub fn empty(username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `"ok"` when the cache backend is reachable, `"degraded"` otherwise.
    pub status: String,
    pub backend_connected: bool,
    pub uptime_seconds: f64,
}
