//! Stream cursor persistence
//!
//! The cursor is a microsecond timestamp marking how far into the firehose
//! this labeler has read. It is stored as a single plain-text integer.

use crate::error::CursorError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Durable slot holding the last checkpointed cursor
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Read the persisted cursor; `Ok(None)` when nothing has been stored yet
    async fn load(&self) -> Result<Option<u64>, CursorError>;

    /// Persist `cursor`, replacing any previous value
    async fn save(&self, cursor: u64) -> Result<(), CursorError>;
}

/// Cursor stored in a local file, replaced atomically via rename
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "cursor".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> CursorError {
        CursorError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<Option<u64>, CursorError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        content
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| CursorError::Corrupt {
                path: self.path.display().to_string(),
                content,
            })
    }

    async fn save(&self, cursor: u64) -> Result<(), CursorError> {
        let temp_path = self.temp_path();

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(cursor.to_string().as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.sync_all().await.map_err(|e| self.io_error(e))?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(cursor = cursor, path = %self.path.display(), "Cursor saved");
        Ok(())
    }
}

/// Load the persisted cursor, or start at `now_us` and persist it immediately
///
/// Persisting straight away means a crash before the first checkpoint still
/// resumes near startup time rather than from the epoch. Read failures other
/// than absence are returned; the caller cannot safely guess a position.
pub async fn load_or_init(store: &dyn CursorStore, now_us: u64) -> Result<u64, CursorError> {
    if let Some(cursor) = store.load().await? {
        info!(cursor = cursor, "Resuming from persisted cursor");
        return Ok(cursor);
    }

    info!(cursor = now_us, "No persisted cursor, starting from now");
    store.save(now_us).await?;
    Ok(now_us)
}

/// Current wall-clock time in microseconds since the epoch
pub fn now_micros() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0)
}

/// The in-memory cursor shared by event handling, checkpoints, shutdown and
/// reconnects. It only moves forward.
#[derive(Debug, Clone, Default)]
pub struct SharedCursor(Arc<AtomicU64>);

impl SharedCursor {
    pub fn new(initial: u64) -> Self {
        Self(Arc::new(AtomicU64::new(initial)))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Move the cursor to `time_us` if that is ahead; returns whether it moved
    pub fn advance(&self, time_us: u64) -> bool {
        self.0.fetch_max(time_us, Ordering::AcqRel) < time_us
    }
}
