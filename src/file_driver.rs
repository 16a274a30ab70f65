//! File-backed session driver.

use crate::error::{SessionError, SessionResult};
use crate::traits::SessionDriver;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info};

/// File-backed session driver.
///
/// Stores one file per session under a base directory. A record's age is
/// its file modification time: `read` treats records older than the
/// driver's lifetime as absent, and `sweep` unlinks them.
pub struct FileDriver {
    base_path: PathBuf,
    lifetime: Duration,
}

impl FileDriver {
    /// Create a file driver rooted at `base_path`, creating the directory
    /// if it does not exist.
    pub async fn new(base_path: impl Into<PathBuf>, lifetime: Duration) -> SessionResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        info!(path = ?base_path, "initialized file session driver");

        Ok(Self {
            base_path,
            lifetime,
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.base_path.join(id)
    }

    async fn modified(path: &Path) -> Option<SystemTime> {
        fs::metadata(path)
            .await
            .and_then(|metadata| metadata.modified())
            .ok()
    }

    async fn is_expired(path: &Path, max_age: Duration) -> bool {
        match Self::modified(path).await {
            Some(modified) => modified
                .elapsed()
                .map(|age| age > max_age)
                .unwrap_or(false),
            None => false,
        }
    }
}

#[async_trait]
impl SessionDriver for FileDriver {
    async fn read(&self, id: &str) -> SessionResult<Option<String>> {
        let path = self.record_path(id);

        match fs::read_to_string(&path).await {
            Ok(payload) => {
                if Self::is_expired(&path, self.lifetime).await {
                    return Ok(None);
                }
                Ok(Some(payload))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SessionError::BackendRead(err.to_string())),
        }
    }

    async fn write(&self, id: &str, payload: String) -> SessionResult<()> {
        fs::write(self.record_path(id), payload)
            .await
            .map_err(|e| SessionError::BackendWrite(e.to_string()))
    }

    async fn destroy(&self, id: &str) -> SessionResult<()> {
        match fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SessionError::BackendWrite(err.to_string())),
        }
    }

    async fn sweep(&self, max_age: Duration) -> SessionResult<()> {
        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| SessionError::Sweep(e.to_string()))?;

        let mut removed = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SessionError::Sweep(e.to_string()))?
        {
            let path = entry.path();
            if Self::is_expired(&path, max_age).await && fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, path = ?self.base_path, "swept expired session files");
        }
        Ok(())
    }

    async fn close(&self) -> SessionResult<()> {
        Ok(())
    }
}
