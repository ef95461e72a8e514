//! Directory-backed store.
//!
//! Layout of the store directory:
//!
//! | File | Content |
//! |------|---------|
//! | `history.jsonl` | one [`HistoryRecord`] per line, appended on insert |
//! | `history.meta.json` | highest record id handed out, written on prune |
//! | `parameters.json` | every [`ParameterSet`], rewritten on change |
//!
//! Both files are loaded into memory on open, so queries never touch the
//! disk. Rewrites go through a temporary file and a rename.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{MonitorError, MonitorResult};
use crate::parameters::{ParameterSet, WorkParameter};
use crate::snapshot::Snapshot;

use super::memory::{HistoryIndex, ParameterBook};
use super::traits::{HistoryRecord, HistoryStore, ParameterStore};

const HISTORY_FILE: &str = "history.jsonl";
const HISTORY_META_FILE: &str = "history.meta.json";
const PARAMETERS_FILE: &str = "parameters.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryMeta {
    last_id: u64,
}

struct HistoryFile {
    path: PathBuf,
    index: HistoryIndex,
    /// `None` after a failed reopen; the next append opens it again.
    writer: Option<File>,
    /// Length of the complete records on disk.
    len: u64,
    /// The file may end in a partial record and must be rebuilt from the index.
    dirty: bool,
}

impl HistoryFile {
    async fn append(&mut self, record: &HistoryRecord) -> MonitorResult<()> {
        if self.dirty {
            self.rewrite().await?;
        }
        if self.writer.is_none() {
            self.writer = Some(open_append(&self.path).await?);
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| MonitorError::storage("history file is not open"))?;

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                self.len += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.discard_tail().await;
                Err(MonitorError::storage(format!("history append failed: {}", e)))
            }
        }
    }

    /// Cut a partially written record off the end of the file.
    async fn discard_tail(&mut self) {
        let truncated = match self.writer.as_mut() {
            Some(writer) => writer.set_len(self.len).await,
            None => return,
        };
        if let Err(e) = truncated {
            warn!(
                file = %self.path.display(),
                error = %e,
                "cannot truncate history, rebuilding on next append"
            );
            self.writer = None;
            self.dirty = true;
        }
    }

    /// Replace the file with the records held in the index.
    async fn rewrite(&mut self) -> MonitorResult<()> {
        let content = encode_history(self.index.records())?;
        replace_file(&self.path, &content).await?;
        self.len = content.len() as u64;
        self.dirty = false;
        self.writer = Some(open_append(&self.path).await?);
        Ok(())
    }
}

/// Durable store kept in a directory of JSON files.
pub struct FileStore {
    dir: PathBuf,
    history: Mutex<HistoryFile>,
    parameters: Mutex<ParameterBook>,
}

impl FileStore {
    /// Open the store in `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> MonitorResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            MonitorError::storage(format!("cannot create store directory {}: {}", dir.display(), e))
        })?;

        let history_path = dir.join(HISTORY_FILE);
        let (mut index, skipped) = load_history(&history_path).await?;
        index.reserve_ids(load_meta(&dir.join(HISTORY_META_FILE)).await?.last_id);
        if skipped > 0 {
            // Drop the unreadable lines so new appends start on a clean line.
            replace_file(&history_path, &encode_history(index.records())?).await?;
        }
        let book = load_parameters(&dir.join(PARAMETERS_FILE)).await?;
        let writer = open_append(&history_path).await?;
        let len = writer
            .metadata()
            .await
            .map_err(|e| {
                MonitorError::storage(format!("cannot stat {}: {}", history_path.display(), e))
            })?
            .len();

        info!(
            dir = %dir.display(),
            records = index.len(),
            parameter_sets = book.sets().len(),
            "file store opened"
        );

        Ok(Self {
            dir,
            history: Mutex::new(HistoryFile {
                path: history_path,
                index,
                writer: Some(writer),
                len,
                dirty: false,
            }),
            parameters: Mutex::new(book),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn save_parameters(&self, book: &ParameterBook) -> MonitorResult<()> {
        let json = serde_json::to_vec_pretty(book.sets())?;
        replace_file(&self.dir.join(PARAMETERS_FILE), &json).await
    }
}

async fn open_append(path: &Path) -> MonitorResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| MonitorError::storage(format!("cannot open {}: {}", path.display(), e)))
}

fn encode_history<'a>(
    records: impl Iterator<Item = &'a HistoryRecord>,
) -> MonitorResult<Vec<u8>> {
    let mut content = Vec::new();
    for record in records {
        serde_json::to_writer(&mut content, record)?;
        content.push(b'\n');
    }
    Ok(content)
}

/// Load every readable record; also returns the number of lines skipped.
async fn load_history(path: &Path) -> MonitorResult<(HistoryIndex, usize)> {
    let mut index = HistoryIndex::default();
    let mut skipped = 0;
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((index, 0)),
        Err(e) => {
            return Err(MonitorError::storage(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )))
        }
    };

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryRecord>(line) {
            Ok(record) => index.insert(record),
            // A torn final write leaves a partial line; keep everything else.
            Err(e) => {
                skipped += 1;
                warn!(
                    file = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "skipping unreadable history line"
                );
            }
        }
    }
    Ok((index, skipped))
}

async fn load_parameters(path: &Path) -> MonitorResult<ParameterBook> {
    match fs::read(path).await {
        Ok(bytes) => {
            let sets: Vec<ParameterSet> = serde_json::from_slice(&bytes).map_err(|e| {
                MonitorError::storage(format!("corrupt {}: {}", path.display(), e))
            })?;
            Ok(ParameterBook::from_sets(sets))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ParameterBook::default()),
        Err(e) => Err(MonitorError::storage(format!(
            "cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn load_meta(path: &Path) -> MonitorResult<HistoryMeta> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| MonitorError::storage(format!("corrupt {}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HistoryMeta::default()),
        Err(e) => Err(MonitorError::storage(format!(
            "cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn replace_file(path: &Path, content: &[u8]) -> MonitorResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)
        .await
        .map_err(|e| MonitorError::storage(format!("cannot write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| MonitorError::storage(format!("cannot replace {}: {}", path.display(), e)))
}

#[async_trait]
impl HistoryStore for FileStore {
    async fn insert(&self, snapshot: &Snapshot) -> MonitorResult<u64> {
        let mut history = self.history.lock().await;
        let record = history.index.prepare(snapshot);
        history.append(&record).await?;
        let id = record.id;
        history.index.insert(record);
        Ok(id)
    }

    async fn latest(&self, limit: usize) -> MonitorResult<Vec<HistoryRecord>> {
        Ok(self.history.lock().await.index.latest(limit))
    }

    async fn range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MonitorResult<Vec<HistoryRecord>> {
        Ok(self.history.lock().await.index.range(start, end))
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> MonitorResult<usize> {
        let mut history = self.history.lock().await;
        if history.index.count_before(cutoff) == 0 {
            return Ok(0);
        }

        // Ids of pruned records must not come back after a reopen.
        let meta = HistoryMeta {
            last_id: history.index.last_id(),
        };
        replace_file(&self.dir.join(HISTORY_META_FILE), &serde_json::to_vec(&meta)?).await?;

        // Rewrite the survivors first so a failed rewrite leaves the store intact.
        let content = encode_history(
            history
                .index
                .records()
                .filter(|record| record.timestamp >= cutoff),
        )?;
        replace_file(&history.path, &content).await?;
        history.len = content.len() as u64;
        history.dirty = false;
        history.writer = match open_append(&history.path).await {
            Ok(writer) => Some(writer),
            Err(e) => {
                warn!(error = %e, "history reopen after prune failed, retrying on next append");
                None
            }
        };

        let removed = history.index.delete_before(cutoff);
        debug!(removed, cutoff = %cutoff, "history pruned");
        Ok(removed)
    }

    async fn count(&self) -> MonitorResult<usize> {
        Ok(self.history.lock().await.index.len())
    }
}

#[async_trait]
impl ParameterStore for FileStore {
    async fn save_parameter_set(&self, set: ParameterSet) -> MonitorResult<ParameterSet> {
        let mut book = self.parameters.lock().await;
        let saved = book.save(set);
        self.save_parameters(&book).await?;
        Ok(saved)
    }

    async fn parameter_sets(&self) -> MonitorResult<Vec<ParameterSet>> {
        Ok(self.parameters.lock().await.ordered())
    }

    async fn upsert_parameters(
        &self,
        set_id: u64,
        parameters: &[WorkParameter],
    ) -> MonitorResult<usize> {
        let mut book = self.parameters.lock().await;
        let written = book.upsert(set_id, parameters)?;
        self.save_parameters(&book).await?;
        Ok(written)
    }

    async fn delete_parameter(&self, parameter_id: u64) -> MonitorResult<bool> {
        let mut book = self.parameters.lock().await;
        let deleted = book.delete(parameter_id);
        if deleted {
            self.save_parameters(&book).await?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn snapshot(secs: i64, temperature: f64) -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.timestamp = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        snapshot.furnace.temperature = temperature;
        snapshot
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            for s in 0..5 {
                store.insert(&snapshot(s, s as f64)).await.unwrap();
            }
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 5);
        let latest = store.latest(1).await.unwrap();
        assert_eq!(latest[0].snapshot.furnace.temperature, 4.0);

        // ids keep increasing after reopen
        let id = store.insert(&snapshot(10, 0.0)).await.unwrap();
        assert_eq!(id, 6);
    }

    #[tokio::test]
    async fn test_prune_rewrites_file() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        for s in 0..6 {
            store.insert(&snapshot(s, 0.0)).await.unwrap();
        }

        let cutoff = snapshot(4, 0.0).timestamp;
        assert_eq!(store.delete_before(cutoff).await.unwrap(), 4);
        assert_eq!(store.delete_before(cutoff).await.unwrap(), 0);
        store.insert(&snapshot(7, 0.0)).await.unwrap();
        drop(store);

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 3);
        let content = std::fs::read_to_string(dir.path().join(HISTORY_FILE)).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_torn_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.insert(&snapshot(0, 1.0)).await.unwrap();
        }
        let path = dir.path().join(HISTORY_FILE);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"id\":2,\"timest");
        std::fs::write(&path, content).unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        store.insert(&snapshot(1, 2.0)).await.unwrap();
        drop(store);

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    /// Leave half a record at the end of the file, as an interrupted write does.
    async fn write_partial_record(store: &FileStore) -> tokio::sync::MutexGuard<'_, HistoryFile> {
        let mut history = store.history.lock().await;
        let writer = history.writer.as_mut().unwrap();
        writer.write_all(b"{\"id\":2,\"timest").await.unwrap();
        writer.flush().await.unwrap();
        history
    }

    #[tokio::test]
    async fn test_failed_append_does_not_swallow_next_record() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.insert(&snapshot(0, 1.0)).await.unwrap();

        write_partial_record(&store).await.discard_tail().await;

        assert_eq!(store.insert(&snapshot(1, 2.0)).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 2);
        drop(store);

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 2);
        let latest = reopened.latest(1).await.unwrap();
        assert_eq!(latest[0].snapshot.furnace.temperature, 2.0);
    }

    #[tokio::test]
    async fn test_untruncatable_tail_is_rebuilt_from_index() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.insert(&snapshot(0, 1.0)).await.unwrap();

        {
            let mut history = write_partial_record(&store).await;
            history.writer = None;
            history.dirty = true;
        }

        store.insert(&snapshot(1, 2.0)).await.unwrap();
        drop(store);

        let content = std::fs::read_to_string(dir.path().join(HISTORY_FILE)).unwrap();
        assert_eq!(content.lines().count(), 2);
        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_full_prune() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            for s in 0..3 {
                store.insert(&snapshot(s, 0.0)).await.unwrap();
            }
            let removed = store.delete_before(snapshot(100, 0.0).timestamp).await.unwrap();
            assert_eq!(removed, 3);
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.insert(&snapshot(200, 0.0)).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_parameters_persist() {
        let dir = TempDir::new().unwrap();
        let set_id = {
            let store = FileStore::open(dir.path()).await.unwrap();
            let set = ParameterSet::new("recipe.xlsx", vec![WorkParameter::new(1, "heat", 850.0)]);
            store.save_parameter_set(set).await.unwrap().id.unwrap()
        };

        let store = FileStore::open(dir.path()).await.unwrap();
        let latest = store.latest_parameter_set().await.unwrap().unwrap();
        assert_eq!(latest.id, Some(set_id));
        assert_eq!(latest.parameters[0].category, "heat");

        store
            .upsert_parameters(set_id, &[WorkParameter::new(2, "hold", 30.0)])
            .await
            .unwrap();
        let sets = store.parameter_sets().await.unwrap();
        assert_eq!(sets[0].parameters.len(), 2);
        assert_eq!(sets[0].parameters[1].id, Some(2));
    }
}
