//! Read-through request flows.
//!
//! `OutreachService` answers the questions clients ask (a user's courses, a
//! course roster, course details, active staff, dashboard status) from the
//! SWR cache, falling back to the upstream source on a miss and revalidating
//! stale entries in the background.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::CourseSource;
use crate::cache::{make_key, CacheBackend, CacheState, SwrCache};
use crate::config::Settings;
use crate::enrich;
use crate::models::{
    ActiveStaff, CourseDetails, CourseEnrollment, CourseRoster, CourseUser, DashboardStatus,
    HealthReport, UserCourses,
};
use crate::refresh::RefreshCoordinator;

/// Maximum courses enriched concurrently.
/// Each enrichment may hit upstream twice, so keep this modest.
const MAX_CONCURRENT_ENRICHMENTS: usize = 10;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0} not found or upstream unavailable")]
    Unavailable(String),

    #[error("Invalid upstream payload: {0}")]
    InvalidPayload(String),
}

/// Freshness windows per resource, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub user: u64,
    pub course: u64,
    pub course_users: u64,
}

impl From<&Settings> for CacheTtls {
    fn from(settings: &Settings) -> Self {
        Self {
            user: settings.user_cache_ttl,
            course: settings.course_cache_ttl,
            course_users: settings.course_users_cache_ttl,
        }
    }
}

/// An upstream resource and how it is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resource {
    User(String),
    CourseUsers { school: String, title_slug: String },
    Course { school: String, title_slug: String },
}

impl Resource {
    fn course_users(school: &str, title_slug: &str) -> Self {
        Resource::CourseUsers {
            school: school.to_string(),
            title_slug: title_slug.to_string(),
        }
    }

    fn course(school: &str, title_slug: &str) -> Self {
        Resource::Course {
            school: school.to_string(),
            title_slug: title_slug.to_string(),
        }
    }

    fn key(&self) -> String {
        match self {
            Resource::User(username) => make_key(&["user", username]),
            Resource::CourseUsers { school, title_slug } => {
                make_key(&["course_users", &format!("{}/{}", school, title_slug)])
            }
            Resource::Course { school, title_slug } => {
                make_key(&["course", &format!("{}/{}", school, title_slug)])
            }
        }
    }

    fn ttl(&self, ttls: &CacheTtls) -> u64 {
        match self {
            Resource::User(_) => ttls.user,
            Resource::CourseUsers { .. } => ttls.course_users,
            Resource::Course { .. } => ttls.course,
        }
    }

    async fn fetch(&self, source: &dyn CourseSource) -> anyhow::Result<Value> {
        match self {
            Resource::User(username) => source.user_stats(username).await,
            Resource::CourseUsers { school, title_slug } => {
                source.course_users(school, title_slug).await
            }
            Resource::Course { school, title_slug } => {
                source.course_details(school, title_slug).await
            }
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::User(username) => write!(f, "User {}", username),
            Resource::CourseUsers { school, title_slug } => {
                write!(f, "Roster of {}/{}", school, title_slug)
            }
            Resource::Course { school, title_slug } => {
                write!(f, "Course {}/{}", school, title_slug)
            }
        }
    }
}

/// Cached access to the Outreach Dashboard. Clone is cheap; clones share the
/// cache and the pending-refresh set.
#[derive(Clone)]
pub struct OutreachService {
    source: Arc<dyn CourseSource>,
    cache: SwrCache,
    refresher: RefreshCoordinator,
    ttls: CacheTtls,
    started_at: Instant,
}

impl OutreachService {
    pub fn new(
        source: Arc<dyn CourseSource>,
        cache: SwrCache,
        ttls: CacheTtls,
        max_concurrent_refreshes: usize,
    ) -> Self {
        let refresher =
            RefreshCoordinator::with_max_concurrent(cache.clone(), max_concurrent_refreshes);
        Self {
            source,
            cache,
            refresher,
            ttls,
            started_at: Instant::now(),
        }
    }

    pub fn from_settings(
        source: Arc<dyn CourseSource>,
        backend: Arc<dyn CacheBackend>,
        settings: &Settings,
    ) -> Self {
        let cache = SwrCache::new(backend, settings.stale_ttl_multiplier);
        Self::new(
            source,
            cache,
            CacheTtls::from(settings),
            settings.max_concurrent_refreshes,
        )
    }

    pub fn cache(&self) -> &SwrCache {
        &self.cache
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    fn now(&self) -> DateTime<Utc> {
        self.cache.clock().now_utc()
    }

    // ===== Cache plumbing =====

    /// Serve `resource` from cache, revalidating it in the background when
    /// stale and fetching it on a miss.
    async fn resolve(&self, resource: &Resource) -> anyhow::Result<Value> {
        let key = resource.key();
        let ttl = resource.ttl(&self.ttls);

        let (cached, state) = self.cache.get(&key, ttl).await;
        if let Some(value) = cached {
            if state == CacheState::Stale {
                self.schedule_refresh(key, resource.clone(), ttl);
            }
            return Ok(value);
        }

        let value = resource.fetch(self.source.as_ref()).await?;
        self.cache.set(&key, &value, ttl).await;
        Ok(value)
    }

    fn schedule_refresh(&self, key: String, resource: Resource, ttl: u64) {
        let source = Arc::clone(&self.source);
        let scheduled = self.refresher.schedule(
            key,
            move || async move { resource.fetch(source.as_ref()).await },
            ttl,
        );
        debug!(scheduled = scheduled, "Stale entry served");
    }

    /// Primary lookup of a request: upstream failure on a miss is an error.
    async fn read_through(&self, resource: Resource) -> Result<Value, ServiceError> {
        self.resolve(&resource).await.map_err(|e| {
            warn!(resource = %resource, error = %e, "Upstream fetch failed");
            ServiceError::Unavailable(resource.to_string())
        })
    }

    /// Secondary lookup used while enriching: failure just means the extra
    /// data is missing.
    async fn lookup(&self, resource: Resource) -> Option<Value> {
        match self.resolve(&resource).await {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(resource = %resource, error = %e, "Enrichment lookup failed");
                None
            }
        }
    }

    // ===== Request flows =====

    /// Courses a user is enrolled in, optionally with activity flags and
    /// staff lists per course.
    pub async fn user_courses(
        &self,
        username: &str,
        enrich: bool,
    ) -> Result<UserCourses, ServiceError> {
        let raw = self.read_through(Resource::User(username.to_string())).await?;

        let mut courses = CourseEnrollment::list_from_payload(&raw);
        if enrich {
            courses = self.enrich_courses(courses).await;
        }
        let (is_instructor, is_student) = enrich::role_summary(&courses);

        Ok(UserCourses {
            username: username.to_string(),
            courses,
            is_instructor,
            is_student,
            max_project: raw
                .get("max_project")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Deduplicated roster of a course, split into facilitators and
    /// participants. With `enrich`, the course's activity flags are added.
    pub async fn course_roster(
        &self,
        school: &str,
        title_slug: &str,
        enrich: bool,
    ) -> Result<CourseRoster, ServiceError> {
        let raw = self
            .read_through(Resource::course_users(school, title_slug))
            .await?;

        let all_users = enrich::dedup_roster(CourseUser::list_from_payload(&raw));
        let (facilitators, participants) = enrich::partition_roles(&all_users);
        let mut roster = CourseRoster {
            slug: format!("{}/{}", school, title_slug),
            facilitators,
            participants,
            all_users,
            active_event: None,
            active_tracking: None,
        };

        if enrich {
            if let Some(details) = self.lookup_details(school, title_slug).await {
                let activity = details.activity_at(self.now());
                roster.active_event = activity.event;
                roster.active_tracking = activity.tracking;
            }
        }
        Ok(roster)
    }

    /// Course metadata. With `enrich`, activity flags and the staff list are
    /// added.
    pub async fn course_details(
        &self,
        school: &str,
        title_slug: &str,
        enrich: bool,
    ) -> Result<CourseDetails, ServiceError> {
        let raw = self.read_through(Resource::course(school, title_slug)).await?;
        let mut details = CourseDetails::from_payload(&raw)
            .map_err(|e| ServiceError::InvalidPayload(e.to_string()))?;

        if enrich {
            let activity = details.activity_at(self.now());
            details.active_event = activity.event;
            details.active_tracking = activity.tracking;
            details.staff = self.lookup_staff(school, title_slug).await;
        }
        Ok(details)
    }

    /// Staff of every currently active course the user is enrolled in.
    pub async fn active_staff(
        &self,
        username: &str,
        use_event_dates: bool,
    ) -> Result<ActiveStaff, ServiceError> {
        let raw = self.read_through(Resource::User(username.to_string())).await?;
        let courses = self
            .enrich_courses(CourseEnrollment::list_from_payload(&raw))
            .await;
        Ok(enrich::active_staff(username, &courses, use_event_dates))
    }

    /// Activity summary for a user. A user the upstream can't produce gets an
    /// empty status rather than an error.
    pub async fn dashboard_status(&self, username: &str) -> DashboardStatus {
        let raw = match self.read_through(Resource::User(username.to_string())).await {
            Ok(raw) => raw,
            Err(_) => return DashboardStatus::empty(username),
        };
        let courses = self
            .enrich_courses(CourseEnrollment::list_from_payload(&raw))
            .await;
        enrich::dashboard_status(username, &courses)
    }

    /// Fetch a user's stats and store them regardless of what is cached.
    pub async fn preload_user(&self, username: &str) -> Result<(), ServiceError> {
        let resource = Resource::User(username.to_string());
        let value = resource
            .fetch(self.source.as_ref())
            .await
            .map_err(|e| {
                warn!(resource = %resource, error = %e, "Preload fetch failed");
                ServiceError::Unavailable(resource.to_string())
            })?;
        self.cache
            .set(&resource.key(), &value, resource.ttl(&self.ttls))
            .await;
        info!(username = username, "Preloaded user");
        Ok(())
    }

    pub async fn health(&self) -> HealthReport {
        let backend_connected = self.cache.ping().await;
        HealthReport {
            status: if backend_connected { "ok" } else { "degraded" }.to_string(),
            backend_connected,
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
        }
    }

    // ===== Enrichment =====

    async fn lookup_details(&self, school: &str, title_slug: &str) -> Option<CourseDetails> {
        let raw = self.lookup(Resource::course(school, title_slug)).await?;
        match CourseDetails::from_payload(&raw) {
            Ok(details) => Some(details),
            Err(e) => {
                debug!(
                    school = school,
                    title_slug = title_slug,
                    error = %e,
                    "Unusable course details"
                );
                None
            }
        }
    }

    async fn lookup_staff(&self, school: &str, title_slug: &str) -> Option<Vec<String>> {
        let raw = self.lookup(Resource::course_users(school, title_slug)).await?;
        Some(enrich::staff_usernames(&CourseUser::list_from_payload(&raw)))
    }

    /// Add window dates, activity flags and staff lists to each course.
    /// Order is preserved; courses whose slug isn't `school/title` are
    /// returned untouched.
    pub async fn enrich_courses(&self, courses: Vec<CourseEnrollment>) -> Vec<CourseEnrollment> {
        let now = self.now();
        stream::iter(courses)
            .map(|course| self.enrich_course(course, now))
            .buffered(MAX_CONCURRENT_ENRICHMENTS)
            .collect()
            .await
    }

    async fn enrich_course(
        &self,
        mut course: CourseEnrollment,
        now: DateTime<Utc>,
    ) -> CourseEnrollment {
        let Some((school, title_slug)) = course
            .slug_parts()
            .map(|(school, title)| (school.to_string(), title.to_string()))
        else {
            debug!(slug = %course.course_slug, "Skipping enrichment for malformed slug");
            return course;
        };

        let (details, staff) = tokio::join!(
            self.lookup_details(&school, &title_slug),
            self.lookup_staff(&school, &title_slug),
        );

        if let Some(details) = details {
            let activity = details.activity_at(now);
            course.active_tracking = activity.tracking;
            course.active_event = activity.event;
            course.start = details.start;
            course.end = details.end;
            course.timeline_start = details.timeline_start;
            course.timeline_end = details.timeline_end;
        }
        if staff.is_some() {
            course.staff = staff;
        }
        course
    }
}

// ============================================================================
// Tests
// ============================================================================
