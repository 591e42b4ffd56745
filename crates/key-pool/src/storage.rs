//! Durable storage for the key pool
//!
//! The pool persists three records: the credential list, the active cursor
//! and the auto-rotate toggle. They are read once at startup and rewritten
//! after every mutation. A record that is missing or cannot be parsed is
//! treated as absent, so a corrupt file costs the user their key list but
//! never prevents startup.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::error::{Error, Result};

const CREDENTIALS_FILE: &str = "credentials.json";
const ACTIVE_INDEX_FILE: &str = "active_index.json";
const AUTO_ROTATE_FILE: &str = "auto_rotate.json";

/// Everything the pool persists.
///
/// `auto_rotate` is `None` when no value was stored; the pool then applies
/// its configured default.
#[derive(Debug, Clone, Default)]
pub struct StoredPool {
    pub credentials: Vec<Credential>,
    pub active_index: usize,
    pub auto_rotate: Option<bool>,
}

/// Backend the pool reads at startup and writes after each mutation.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn PoolStorage>`).
pub trait PoolStorage: Send + Sync {
    /// Read all records. Never fails: unreadable records come back as defaults.
    fn load(&self) -> Pin<Box<dyn Future<Output = StoredPool> + Send + '_>>;

    /// Write all records.
    fn save<'a>(
        &'a self,
        pool: &'a StoredPool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Directory-backed storage, one JSON file per record.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn load_records(&self) -> StoredPool {
        let credentials: Vec<Credential> = read_record(&self.dir.join(CREDENTIALS_FILE))
            .await
            .unwrap_or_default();
        let active_index: usize = read_record(&self.dir.join(ACTIVE_INDEX_FILE))
            .await
            .unwrap_or_default();
        let auto_rotate: Option<bool> = read_record(&self.dir.join(AUTO_ROTATE_FILE)).await;

        info!(
            dir = %self.dir.display(),
            credentials = credentials.len(),
            active_index,
            "loaded key pool"
        );
        StoredPool {
            credentials,
            active_index,
            auto_rotate,
        }
    }

    async fn save_records(&self, pool: &StoredPool) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Storage(format!("creating state directory: {e}")))?;

        write_atomic(&self.dir.join(CREDENTIALS_FILE), &pool.credentials).await?;
        write_atomic(&self.dir.join(ACTIVE_INDEX_FILE), &pool.active_index).await?;
        if let Some(auto_rotate) = pool.auto_rotate {
            write_atomic(&self.dir.join(AUTO_ROTATE_FILE), &auto_rotate).await?;
        }
        Ok(())
    }
}

impl PoolStorage for FileStorage {
    fn load(&self) -> Pin<Box<dyn Future<Output = StoredPool> + Send + '_>> {
        Box::pin(self.load_records())
    }

    fn save<'a>(
        &'a self,
        pool: &'a StoredPool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.save_records(pool))
    }
}

/// In-process storage. Keeps the last saved snapshot and counts saves.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<StoredPool>,
    saves: AtomicUsize,
}

impl MemoryStorage {
    /// Storage that will hand `initial` to the pool on load.
    pub fn with_state(initial: StoredPool) -> Self {
        Self {
            state: Mutex::new(initial),
            saves: AtomicUsize::new(0),
        }
    }

    /// Last saved snapshot.
    pub fn snapshot(&self) -> StoredPool {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl PoolStorage for MemoryStorage {
    fn load(&self) -> Pin<Box<dyn Future<Output = StoredPool> + Send + '_>> {
        let snapshot = self.snapshot();
        Box::pin(async move { snapshot })
    }

    fn save<'a>(
        &'a self,
        pool: &'a StoredPool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self
                .state
                .lock()
                .map_err(|_| Error::Storage("memory storage lock poisoned".into()))?;
            *state = pool.clone();
            self.saves.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }
}

/// Read one JSON record. Missing files are silent; unreadable or corrupt
/// ones are logged and treated as absent.
async fn read_record<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "record not found");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read record, treating as absent");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt record, treating as absent");
            None
        }
    }
}

/// Write a record atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the credential record contains raw API keys.
async fn write_atomic<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Storage(format!("serializing {}: {e}", path.display())))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("record path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing temp file for {file_name}: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting permissions on {file_name}: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming temp file for {file_name}: {e}")))?;

    debug!(path = %path.display(), "persisted record");
    Ok(())
}
