//! Data models for Outreach Dashboard entities.
//!
//! - `CourseUser`: one roster record from a course's users payload
//! - `CourseDetails`: course metadata and its two activity windows
//! - `CourseEnrollment`: a course as listed in a user's stats payload
//! - Response types returned by the service flows

pub mod course;
pub mod response;

pub use course::{CourseDetails, CourseEnrollment, CourseUser};
pub use response::{
    ActiveCourseStaff, ActiveStaff, CourseRoster, DashboardStatus, HealthReport, UserCourses,
};
