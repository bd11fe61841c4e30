//! API client for the Outreach Dashboard REST API.
//!
//! This module provides the `OutreachClient` struct for fetching the raw JSON
//! payloads the cache stores.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiError, CourseSource};
use crate::config::Settings;

// ============================================================================
// Constants
// ============================================================================

/// Initial backoff delay in milliseconds for rate limiting and server errors.
/// 1 second is polite to the server while not making callers wait too long.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the Outreach Dashboard.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct OutreachClient {
    client: Client,
    base_url: String,
    max_retries: u32,
    initial_backoff: Duration,
}

impl OutreachClient {
    /// Create a new client for `base_url`.
    pub fn new(base_url: &str, timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.base_url,
            Duration::from_secs(settings.http_timeout_secs),
            settings.http_max_retries,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn user_stats_url(&self) -> String {
        format!("{}/user_stats.json", self.base_url)
    }

    fn course_url(&self, school: &str, title_slug: &str, resource: &str) -> String {
        format!("{}/courses/{}/{}/{}", self.base_url, school, title_slug, resource)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// GET a JSON document, retrying rate limits and server errors with
    /// exponential backoff.
    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self
                .client
                .get(url)
                .header(header::ACCEPT, "application/json")
                .query(query)
                .send()
                .await
                .map_err(ApiError::from)
                .with_context(|| format!("Failed to send GET request to {}", url))?;

            match Self::check_response(response).await {
                Ok(response) => {
                    debug!(url = url, "Upstream responded");
                    return response
                        .json()
                        .await
                        .with_context(|| format!("Failed to parse JSON response from {}", url));
                }
                Err(e) if e.is_transient() && retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        url = url,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient upstream error, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2; // Exponential backoff
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ===== Data Fetching Methods =====

    /// Fetch the stats and course list for a dashboard user
    pub async fn fetch_user_stats(&self, username: &str) -> Result<Value> {
        self.get_json(&self.user_stats_url(), &[("username", username)])
            .await
            .with_context(|| format!("Failed to fetch user stats for {}", username))
    }

    /// Fetch the roster of a course
    pub async fn fetch_course_users(&self, school: &str, title_slug: &str) -> Result<Value> {
        self.get_json(&self.course_url(school, title_slug, "users.json"), &[])
            .await
            .with_context(|| format!("Failed to fetch course users for {}/{}", school, title_slug))
    }

    /// Fetch metadata and timeline of a course
    pub async fn fetch_course_details(&self, school: &str, title_slug: &str) -> Result<Value> {
        self.get_json(&self.course_url(school, title_slug, "course.json"), &[])
            .await
            .with_context(|| {
                format!("Failed to fetch course details for {}/{}", school, title_slug)
            })
    }
}

#[async_trait]
impl CourseSource for OutreachClient {
    async fn user_stats(&self, username: &str) -> Result<Value> {
        self.fetch_user_stats(username).await
    }

    async fn course_users(&self, school: &str, title_slug: &str) -> Result<Value> {
        self.fetch_course_users(school, title_slug).await
    }

    async fn course_details(&self, school: &str, title_slug: &str) -> Result<Value> {
        self.fetch_course_details(school, title_slug).await
    }
}
