//! outreachcache - cached lookups against the Outreach Dashboard.
//!
//! Each subcommand runs one request flow through the SWR cache and prints the
//! result as JSON. `preload` warms the cache for a list of users and
//! `inspect` shows raw upstream payloads, bypassing the cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use outreachcache_core::{
    CacheBackend, FileBackend, MemoryBackend, OutreachClient, OutreachService, Settings,
};

#[derive(Parser, Debug)]
#[command(name = "outreachcache")]
#[command(version, about = "Cached, enriched lookups against the Outreach Dashboard")]
struct Cli {
    /// Where cache entries are kept
    #[arg(
        long,
        global = true,
        env = "OUTREACH_CACHE_BACKEND",
        value_enum,
        default_value_t = BackendKind::File
    )]
    backend: BackendKind,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, env = "OUTREACH_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Seconds to wait for background refreshes before exiting
    #[arg(long, global = true, default_value_t = 30)]
    refresh_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BackendKind {
    /// One JSON file per key in the cache directory
    File,
    /// Process memory; nothing survives the run
    Memory,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Lookup(LookupCommands),
    /// Show raw upstream payloads without touching the cache
    #[command(subcommand)]
    Inspect(InspectCommands),
}

/// Commands answered through the cache.
#[derive(Subcommand, Debug)]
enum LookupCommands {
    /// Courses a user is enrolled in
    User {
        username: String,
        /// Add activity flags and staff lists per course
        #[arg(long)]
        enrich: bool,
    },
    /// Course metadata
    Course {
        school: String,
        title_slug: String,
        /// Add activity flags and the staff list
        #[arg(long)]
        enrich: bool,
    },
    /// Deduplicated course roster split by role
    Roster {
        school: String,
        title_slug: String,
        /// Add the course's activity flags
        #[arg(long)]
        enrich: bool,
    },
    /// Staff of the user's currently active courses
    ActiveStaff {
        username: String,
        /// Judge activity by the event window instead of the tracking window
        #[arg(long)]
        event_dates: bool,
    },
    /// Activity summary for a user
    Status { username: String },
    /// Cache backend health
    Health,
    /// Fetch and cache user stats for each name
    Preload {
        #[arg(required = true)]
        usernames: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum InspectCommands {
    /// Raw user stats
    User { username: String },
    /// Raw course roster
    CourseUsers { school: String, title_slug: String },
    /// Raw course metadata
    CourseDetails { school: String, title_slug: String },
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g., RUST_LOG=outreachcache_core=debug).
/// The returned guard flushes the log file and must be held until exit.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Invalid log file path: {}", path.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
    Ok(Some(guard))
}

fn open_backend(kind: BackendKind, settings: &Settings) -> Result<Arc<dyn CacheBackend>> {
    Ok(match kind {
        BackendKind::File => {
            let dir = settings.cache_dir()?;
            info!(dir = %dir.display(), "Using file cache");
            Arc::new(FileBackend::new(dir)?)
        }
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    })
}

async fn preload(service: &OutreachService, usernames: &[String]) -> Value {
    let mut loaded = Vec::new();
    let mut failed = Vec::new();
    for username in usernames {
        match service.preload_user(username).await {
            Ok(()) => loaded.push(username.clone()),
            Err(e) => {
                warn!(username = %username, error = %e, "Preload failed");
                failed.push(username.clone());
            }
        }
    }
    json!({ "preloaded": loaded, "failed": failed })
}

async fn inspect(client: &OutreachClient, command: InspectCommands) -> Result<Value> {
    match command {
        InspectCommands::User { username } => client.fetch_user_stats(&username).await,
        InspectCommands::CourseUsers { school, title_slug } => {
            client.fetch_course_users(&school, &title_slug).await
        }
        InspectCommands::CourseDetails { school, title_slug } => {
            client.fetch_course_details(&school, &title_slug).await
        }
    }
}

async fn lookup(service: &OutreachService, command: LookupCommands) -> Result<Value> {
    Ok(match command {
        LookupCommands::User { username, enrich } => {
            serde_json::to_value(service.user_courses(&username, enrich).await?)?
        }
        LookupCommands::Course {
            school,
            title_slug,
            enrich,
        } => serde_json::to_value(service.course_details(&school, &title_slug, enrich).await?)?,
        LookupCommands::Roster {
            school,
            title_slug,
            enrich,
        } => serde_json::to_value(service.course_roster(&school, &title_slug, enrich).await?)?,
        LookupCommands::ActiveStaff {
            username,
            event_dates,
        } => serde_json::to_value(service.active_staff(&username, event_dates).await?)?,
        LookupCommands::Status { username } => {
            serde_json::to_value(service.dashboard_status(&username).await)?
        }
        LookupCommands::Health => serde_json::to_value(service.health().await)?,
        LookupCommands::Preload { usernames } => preload(service, &usernames).await,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref())?;

    let settings = Settings::load()?;
    let client = OutreachClient::from_settings(&settings)?;
    info!(base_url = client.base_url(), "outreachcache starting");

    let command = match cli.command {
        Commands::Inspect(command) => {
            let payload = inspect(&client, command).await?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
            return Ok(());
        }
        Commands::Lookup(command) => command,
    };

    let backend = open_backend(cli.backend, &settings)?;
    let service = OutreachService::from_settings(Arc::new(client), backend, &settings);

    let output = lookup(&service, command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    // Let stale entries served above finish revalidating before the runtime stops
    let wait = Duration::from_secs(cli.refresh_timeout);
    if tokio::time::timeout(wait, service.refresher().wait_idle())
        .await
        .is_err()
    {
        warn!(
            pending = service.refresher().pending_count(),
            "Background refreshes still running at exit"
        );
    }
    Ok(())
}
