//! Enrichment of upstream payloads.
//!
//! Pure, synchronous transforms with no I/O:
//! - Roster deduplication and role partitioning
//! - Staff name extraction
//! - Activity windows (tracking and event) and per-course activity flags
//! - Aggregate status across a user's courses

pub mod activity;
pub mod roster;
pub mod status;

pub use activity::{parse_timestamp, ActivityWindow, CourseActivity};
pub use roster::{dedup_roster, partition_roles, staff_usernames};
pub use status::{active_staff, dashboard_status, has_active_event, role_summary};
