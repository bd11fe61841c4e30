use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::backend::{sweep_due, BackendError, CacheBackend};
use super::clock::{Clock, SystemClock};

/// Extension of committed entries. Temp files never end in it.
const ENTRY_EXTENSION: &str = "json";

/// Encoded keys longer than this are shortened to a prefix plus a digest,
/// keeping file names well under the usual 255-byte limit.
const MAX_ENCODED_LEN: usize = 120;

/// Length of the readable prefix kept on shortened names.
const HASHED_PREFIX_LEN: usize = 48;

/// Per-process sequence for temp file names.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// On-disk layout of a single entry.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    expires_at: f64,
    value: String,
}

/// Backend storing one JSON file per key under a cache directory.
///
/// Keys are percent-encoded into file names (long ones are shortened with a
/// SHA-256 digest), so any key maps to exactly one file. Each write goes to
/// its own temp file and is renamed into place, so concurrent writers to a
/// key never interleave and the last rename wins. Expired files are deleted
/// when read, and swept from the whole directory every
/// `SWEEP_EVERY_WRITES` writes.
pub struct FileBackend {
    cache_dir: PathBuf,
    clock: Arc<dyn Clock>,
    writes: AtomicU64,
}

impl FileBackend {
    pub fn new(cache_dir: PathBuf) -> Result<Self, BackendError> {
        Self::with_clock(cache_dir, Arc::new(SystemClock))
    }

    pub fn with_clock(cache_dir: PathBuf, clock: Arc<dyn Clock>) -> Result<Self, BackendError> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            clock,
            writes: AtomicU64::new(0),
        })
    }

    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", encode_file_name(key), ENTRY_EXTENSION))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.cache_dir.join(format!(
            "{}.{}-{}.tmp",
            encode_file_name(key),
            std::process::id(),
            seq
        ))
    }

    async fn load(&self, key: &str) -> Result<Option<FileRecord>, BackendError> {
        let path = self.cache_path(key);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: FileRecord = serde_json::from_str(&contents)?;

        if record.expires_at <= self.clock.now() {
            debug!(key = key, "Removing expired cache file");
            remove_file(&path).await?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Whether the committed entry at `path` has expired. Unreadable or
    /// corrupt files are left alone; a read of their key reports them.
    async fn is_expired_file(&self, path: &Path, now: f64) -> bool {
        let Ok(contents) = tokio::fs::read_to_string(path).await else {
            return false;
        };
        serde_json::from_str::<FileRecord>(&contents).is_ok_and(|record| record.expires_at <= now)
    }
}

async fn remove_file(path: &Path) -> Result<(), BackendError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Map an arbitrary key onto a portable file name.
fn encode_file_name(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    if out.len() <= MAX_ENCODED_LEN {
        return out;
    }

    // Encoded names are ASCII, so any byte index is a char boundary
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}~{}", &out[..HASHED_PREFIX_LEN], digest)
}

#[async_trait]
impl CacheBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.load(key).await?.map(|record| record.value.into_bytes()))
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_seconds: u64,
    ) -> Result<(), BackendError> {
        let value = String::from_utf8(value)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        let record = FileRecord {
            expires_at: self.clock.now() + ttl_seconds as f64,
            value,
        };
        let contents = serde_json::to_string(&record)?;

        // Readers never see a partial entry; the last rename wins
        let tmp = self.temp_path(key);
        if let Err(e) = tokio::fs::write(&tmp, contents).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, self.cache_path(key)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        if sweep_due(&self.writes) {
            match self.purge_expired().await {
                Ok(reclaimed) => debug!(reclaimed = reclaimed, "Swept expired cache files"),
                Err(e) => warn!(error = %e, "Cache sweep failed"),
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        remove_file(&self.cache_path(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.load(key).await?.is_some())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let metadata = tokio::fs::metadata(&self.cache_dir).await?;
        if metadata.is_dir() {
            Ok(())
        } else {
            Err(BackendError::Unavailable(format!(
                "{} is not a directory",
                self.cache_dir.display()
            )))
        }
    }

    async fn purge_expired(&self) -> Result<usize, BackendError> {
        let now = self.clock.now();
        let mut reclaimed = 0;
        let mut dir = tokio::fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if self.is_expired_file(&path, now).await {
                remove_file(&path).await?;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

// ============================================================================
// Tests
// ============================================================================
