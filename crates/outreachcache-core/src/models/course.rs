use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::enrich::CourseActivity;

/// Parse each element of a JSON array, skipping elements that don't fit `T`.
fn parse_list<T: serde::de::DeserializeOwned>(items: Option<&Value>, what: &str) -> Vec<T> {
    let Some(items) = items.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!(kind = what, error = %e, "Skipping malformed record");
                None
            }
        })
        .collect()
}

/// A user's enrollment in a course, from `/courses/{slug}/users.json`.
///
/// Role 0 is a participant; anything higher is a facilitator. Attributes this
/// crate doesn't interpret are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub role: u32,
    #[serde(default)]
    pub enrolled_at: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl CourseUser {
    pub fn new(username: &str, role: u32, enrolled_at: &str) -> Self {
        Self {
            id: None,
            username: username.to_string(),
            role,
            enrolled_at: enrolled_at.to_string(),
            attributes: Map::new(),
        }
    }

    pub fn is_facilitator(&self) -> bool {
        self.role >= 1
    }

    /// Roster records from a raw users payload (`{"course": {"users": [...]}}`).
    /// Records without a username are dropped.
    pub fn list_from_payload(payload: &Value) -> Vec<Self> {
        let users = payload.get("course").and_then(|c| c.get("users"));
        parse_list::<Self>(users, "course user")
            .into_iter()
            .filter(|u| !u.username.is_empty())
            .collect()
    }
}

/// Course metadata from `/courses/{slug}/course.json`.
///
/// `start`/`end` bound the tracking window, `timeline_start`/`timeline_end`
/// the event window. The `active_*` and `staff` fields are filled in by
/// enrichment; `None` means unknown, not inactive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseDetails {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub school: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub timeline_start: Option<String>,
    #[serde(default)]
    pub timeline_end: Option<String>,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub ended: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(rename = "type", default)]
    pub course_type: Option<String>,
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default)]
    pub student_count: i64,
    #[serde(default)]
    pub active_event: Option<bool>,
    #[serde(default)]
    pub active_tracking: Option<bool>,
    #[serde(default)]
    pub staff: Option<Vec<String>>,
}

impl CourseDetails {
    /// Parse the `course` object of a raw details payload.
    pub fn from_payload(payload: &Value) -> Result<Self, serde_json::Error> {
        let course = payload
            .get("course")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        serde_json::from_value(course)
    }

    pub fn activity_at(&self, now: DateTime<Utc>) -> CourseActivity {
        CourseActivity::compute(
            self.start.as_deref(),
            self.end.as_deref(),
            self.timeline_start.as_deref(),
            self.timeline_end.as_deref(),
            now,
        )
    }
}

/// A course as listed in `/user_stats.json` under `courses_details`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseEnrollment {
    #[serde(default)]
    pub course_id: i64,
    #[serde(default)]
    pub course_title: String,
    #[serde(default)]
    pub course_school: String,
    #[serde(default)]
    pub course_term: String,
    #[serde(default)]
    pub user_count: i64,
    #[serde(default)]
    pub user_role: String,
    pub course_slug: String,

    // Filled in by enrichment
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub timeline_start: Option<String>,
    #[serde(default)]
    pub timeline_end: Option<String>,
    #[serde(default)]
    pub active_event: Option<bool>,
    #[serde(default)]
    pub active_tracking: Option<bool>,
    #[serde(default)]
    pub staff: Option<Vec<String>>,
}

impl CourseEnrollment {
    /// Enrollments from a raw user stats payload.
    pub fn list_from_payload(payload: &Value) -> Vec<Self> {
        parse_list(payload.get("courses_details"), "course enrollment")
    }

    /// Split `course_slug` into `(school, title_slug)`.
    pub fn slug_parts(&self) -> Option<(&str, &str)> {
        self.course_slug.split_once('/')
    }

    pub fn is_student(&self) -> bool {
        self.user_role == "student"
    }
}
