//! Application configuration management.
//!
//! Settings cover the upstream endpoint, HTTP behaviour and cache lifetimes.
//! They are read from `~/.config/outreachcache/config.json` when present and
//! then overridden by `OUTREACH_*` environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "outreachcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Public Outreach Dashboard instance
const DEFAULT_BASE_URL: &str = "https://outreachdashboard.wmflabs.org";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub http_timeout_secs: u64,
    pub http_max_retries: u32,

    /// Freshness of a user's stats, in seconds.
    pub user_cache_ttl: u64,
    /// Freshness of course metadata, in seconds.
    pub course_cache_ttl: u64,
    /// Freshness of a course roster, in seconds.
    pub course_users_cache_ttl: u64,

    /// Stale entries are served for up to `ttl × stale_ttl_multiplier`.
    pub stale_ttl_multiplier: f64,
    /// Cap on simultaneous background refreshes (0 = unbounded).
    pub max_concurrent_refreshes: usize,

    /// Overrides the platform cache directory for the file backend.
    pub cache_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            http_timeout_secs: 30,
            http_max_retries: 3,
            user_cache_ttl: 3600,     // 1 hour
            course_cache_ttl: 86400,  // 24 hours
            course_users_cache_ttl: 3600,
            stale_ttl_multiplier: 2.0,
            max_concurrent_refreshes: 16,
            cache_dir: None,
        }
    }
}

impl Settings {
    /// Load from the default config file (if any), then apply environment
    /// overrides and validate.
    pub fn load() -> Result<Self> {
        let mut settings = match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the file cache backend.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("OUTREACH_BASE_URL") {
            self.base_url = url;
        }
        if let Some(dir) = lookup("OUTREACH_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        override_parsed(&lookup, "OUTREACH_HTTP_TIMEOUT", &mut self.http_timeout_secs);
        override_parsed(&lookup, "OUTREACH_HTTP_MAX_RETRIES", &mut self.http_max_retries);
        override_parsed(&lookup, "OUTREACH_USER_CACHE_TTL", &mut self.user_cache_ttl);
        override_parsed(&lookup, "OUTREACH_COURSE_CACHE_TTL", &mut self.course_cache_ttl);
        override_parsed(
            &lookup,
            "OUTREACH_COURSE_USERS_CACHE_TTL",
            &mut self.course_users_cache_ttl,
        );
        override_parsed(
            &lookup,
            "OUTREACH_STALE_TTL_MULTIPLIER",
            &mut self.stale_ttl_multiplier,
        );
        override_parsed(
            &lookup,
            "OUTREACH_MAX_CONCURRENT_REFRESHES",
            &mut self.max_concurrent_refreshes,
        );
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.stale_ttl_multiplier > 1.0) {
            bail!(
                "stale_ttl_multiplier must be greater than 1, got {}",
                self.stale_ttl_multiplier
            );
        }
        if self.user_cache_ttl == 0
            || self.course_cache_ttl == 0
            || self.course_users_cache_ttl == 0
        {
            bail!("cache TTLs must be at least one second");
        }
        if self.base_url.trim().is_empty() {
            bail!("base_url must not be empty");
        }
        Ok(())
    }
}

/// Replace `target` with the parsed value of `name`, keeping the old value
/// (with a warning) when it doesn't parse.
fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(variable = name, value = %raw, "Ignoring unparsable setting"),
    }
}
