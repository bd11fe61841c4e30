use std::collections::BTreeSet;

use crate::models::{ActiveCourseStaff, ActiveStaff, CourseEnrollment, DashboardStatus};

/// `(is_instructor, is_student)` across a user's courses.
///
/// Any role other than `"student"` counts as instructing.
pub fn role_summary(courses: &[CourseEnrollment]) -> (bool, bool) {
    let is_instructor = courses.iter().any(|c| !c.is_student());
    let is_student = courses.iter().any(CourseEnrollment::is_student);
    (is_instructor, is_student)
}

/// True when at least one course's event window is known to be active.
pub fn has_active_event(courses: &[CourseEnrollment]) -> bool {
    courses.iter().any(|c| c.active_event == Some(true))
}

/// Aggregate activity over enriched courses. Unknown flags never count.
pub fn dashboard_status(username: &str, courses: &[CourseEnrollment]) -> DashboardStatus {
    let active_event_count = courses
        .iter()
        .filter(|c| c.active_event == Some(true))
        .count();
    let tracked_count = courses
        .iter()
        .filter(|c| c.active_tracking == Some(true))
        .count();

    DashboardStatus {
        username: username.to_string(),
        has_any_courses: !courses.is_empty(),
        has_active_event: active_event_count > 0,
        has_active_tracking: tracked_count > 0,
        active_event_count,
        tracked_count,
        total_courses: courses.len(),
    }
}

/// Staff of every active course that has any.
///
/// Activity is judged on the tracking window unless `use_event_dates` is set,
/// in which case the narrower event window is used.
pub fn active_staff(
    username: &str,
    courses: &[CourseEnrollment],
    use_event_dates: bool,
) -> ActiveStaff {
    let mut all_staff = BTreeSet::new();
    let mut active_courses = Vec::new();

    for course in courses {
        let active = if use_event_dates {
            course.active_event
        } else {
            course.active_tracking
        };
        let Some(staff) = course.staff.as_ref().filter(|s| !s.is_empty()) else {
            continue;
        };
        if active != Some(true) {
            continue;
        }

        all_staff.extend(staff.iter().cloned());
        active_courses.push(ActiveCourseStaff {
            course_slug: course.course_slug.clone(),
            course_title: course.course_title.clone(),
            staff: staff.clone(),
        });
    }

    ActiveStaff {
        username: username.to_string(),
        all_staff: all_staff.into_iter().collect(),
        courses: active_courses,
    }
}

// ============================================================================
// Tests
// ============================================================================
