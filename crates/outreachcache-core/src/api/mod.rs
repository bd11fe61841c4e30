//! REST API client module for the Outreach Dashboard.
//!
//! This module provides the `OutreachClient` for fetching user stats, course
//! rosters and course details, and the `CourseSource` trait the service flows
//! fetch through. The upstream API is public and read-only.

pub mod client;
pub mod error;
pub mod source;

pub use client::OutreachClient;
pub use error::ApiError;
pub use source::CourseSource;
