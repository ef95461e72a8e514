//! History and parameter storage.
//!
//! Backends implement both [`HistoryStore`] and [`ParameterStore`]:
//!
//! - `MemoryStore`: volatile, for tests and dry runs (`memory://`)
//! - `FileStore`: JSON files in a directory (`file://<dir>`)
//!
//! # Example
//!
//! ```rust,no_run
//! use furnace_monitor::store::open_store;
//!
//! # async fn example() -> furnace_monitor::MonitorResult<()> {
//! let stores = open_store("file:///var/lib/furnace-monitor").await?;
//! let recent = stores.history.latest(10).await?;
//! println!("{} records", recent.len());
//! # Ok(())
//! # }
//! ```

mod file;
mod memory;
mod traits;

use std::sync::Arc;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::{FieldSummary, HistoryRecord, HistoryStatistics, HistoryStore, ParameterStore};

use crate::error::{MonitorError, MonitorResult};

/// Both collections of one opened store.
#[derive(Clone)]
pub struct Stores {
    pub history: Arc<dyn HistoryStore>,
    pub parameters: Arc<dyn ParameterStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            history: store.clone(),
            parameters: store,
        }
    }
}

/// Open the store named by `connection`.
///
/// Accepted forms are `memory://` and `file://<dir>`.
pub async fn open_store(connection: &str) -> MonitorResult<Stores> {
    let connection = connection.trim();
    if connection == "memory://" || connection == "memory" {
        return Ok(Stores::memory());
    }
    if let Some(dir) = connection.strip_prefix("file://") {
        if dir.is_empty() {
            return Err(MonitorError::configuration(
                "file store connection needs a directory: file://<dir>",
            ));
        }
        let store = Arc::new(FileStore::open(dir).await?);
        return Ok(Stores {
            history: store.clone(),
            parameters: store,
        });
    }
    Err(MonitorError::configuration(format!(
        "unsupported store connection '{}' (expected memory:// or file://<dir>)",
        connection
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Snapshot;

    #[tokio::test]
    async fn test_open_memory() {
        let stores = open_store("memory://").await.unwrap();
        stores.history.insert(&Snapshot::default()).await.unwrap();
        assert_eq!(stores.history.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let conn = format!("file://{}", dir.path().display());
        let stores = open_store(&conn).await.unwrap();
        stores.history.insert(&Snapshot::default()).await.unwrap();
        assert!(dir.path().join("history.jsonl").exists());
    }

    #[tokio::test]
    async fn test_open_rejects_unknown() {
        assert!(open_store("mongodb://localhost:27017").await.is_err());
        assert!(open_store("file://").await.is_err());
    }
}
