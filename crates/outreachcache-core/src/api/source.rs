use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Where raw payloads come from.
///
/// Implementations return the parsed JSON body or an error; callers treat
/// "not found" and transient failures alike.
#[async_trait]
pub trait CourseSource: Send + Sync {
    /// `/user_stats.json?username={username}`
    async fn user_stats(&self, username: &str) -> Result<Value>;

    /// `/courses/{school}/{title_slug}/users.json`
    async fn course_users(&self, school: &str, title_slug: &str) -> Result<Value>;

    /// `/courses/{school}/{title_slug}/course.json`
    async fn course_details(&self, school: &str, title_slug: &str) -> Result<Value>;
}
