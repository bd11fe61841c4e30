//! outreachcache-core - caching and reconciliation in front of the Outreach Dashboard.
//!
//! This crate contains everything except the command-line front end:
//! - `cache`: stale-while-revalidate store over pluggable backends
//! - `refresh`: per-key deduplicated background revalidation
//! - `enrich`: roster dedup, role split, staff lists, activity windows
//! - `api`: HTTP client for the upstream dashboard
//! - `service`: the read-through request flows tying it all together

pub mod api;
pub mod cache;
pub mod config;
pub mod enrich;
pub mod models;
pub mod refresh;
pub mod service;

pub use api::{ApiError, CourseSource, OutreachClient};
pub use cache::{CacheBackend, CacheState, FileBackend, MemoryBackend, SwrCache};
pub use config::Settings;
pub use refresh::RefreshCoordinator;
pub use service::{CacheTtls, OutreachService, ServiceError};
