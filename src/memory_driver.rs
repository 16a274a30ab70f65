//! In-memory session driver.

use crate::error::SessionResult;
use crate::traits::SessionDriver;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

struct MemoryEntry {
    payload: String,
    written_at: DateTime<Utc>,
}

/// In-memory session driver.
///
/// Keeps session records in a process-local map. Suitable for tests and
/// single-process deployments; records do not survive a restart.
#[derive(Default)]
pub struct MemoryDriver {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryDriver {
    /// Create an empty in-memory driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the driver holds no records.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SessionDriver for MemoryDriver {
    async fn read(&self, id: &str) -> SessionResult<Option<String>> {
        Ok(self
            .entries
            .read()
            .await
            .get(id)
            .map(|entry| entry.payload.clone()))
    }

    async fn write(&self, id: &str, payload: String) -> SessionResult<()> {
        self.entries.write().await.insert(
            id.to_string(),
            MemoryEntry {
                payload,
                written_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn destroy(&self, id: &str) -> SessionResult<()> {
        self.entries.write().await.remove(id);
        Ok(())
    }

    async fn sweep(&self, max_age: Duration) -> SessionResult<()> {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return Ok(());
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return Ok(());
        };

        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.written_at > cutoff);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "swept expired in-memory sessions");
        }
        Ok(())
    }

    async fn close(&self) -> SessionResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_destroy() {
        let driver = MemoryDriver::new();

        driver.write("abc", "payload".to_string()).await.unwrap();
        assert_eq!(driver.read("abc").await.unwrap(), Some("payload".to_string()));

        driver.destroy("abc").await.unwrap();
        assert_eq!(driver.read("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let driver = MemoryDriver::new();
        assert_eq!(driver.read("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_destroy_missing_is_ok() {
        let driver = MemoryDriver::new();
        driver.destroy("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_removes_aged_entries() {
        let driver = MemoryDriver::new();
        driver.write("abc", "payload".to_string()).await.unwrap();

        driver.sweep(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(driver.len().await, 1);

        driver.sweep(Duration::ZERO).await.unwrap();
        assert!(driver.is_empty().await);
    }
}
