//! JSON snapshot store.
//!
//! The full state lives in memory and is rewritten to disk after every write
//! (temp file + rename, so a crash never leaves a half-written snapshot).
//! Every mutation is applied to a staged copy first; if persisting fails, the
//! in-memory state is left untouched.
//!
//! The write and rename run on the blocking pool, which owns the write lock
//! until both finish. A caller that is cancelled mid-persist therefore can't
//! let `close()` slip in ahead of the rename.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};

use super::{RecordFilter, Result, Store, StoreCounts, StoreError, StoreState};
use crate::domain::{item::CollectedItem, record::NormalizedRecord};

#[derive(Debug)]
struct Inner {
  state: StoreState,
  closed: bool,
}

#[derive(Debug)]
pub struct FileStore {
  path: PathBuf,
  inner: Arc<RwLock<Inner>>,
}

impl FileStore {
  /// Open the snapshot at `path`, creating an empty store if it doesn't exist.
  ///
  /// A file that exists but can't be read or decoded is an error.
  pub async fn open(path: &Path) -> Result<Self> {
    let state = match tokio::fs::read(path).await {
      Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
      })?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        if let Some(parent) = path.parent() {
          tokio::fs::create_dir_all(parent).await.map_err(|source| StoreError::Write {
            path: parent.to_path_buf(),
            source,
          })?;
        }
        StoreState::default()
      }
      Err(source) => {
        return Err(StoreError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    let counts = state.counts();
    info!(path = %path.display(), items = counts.items, records = counts.records, "Opened file store");

    Ok(Self {
      path: path.to_path_buf(),
      inner: Arc::new(RwLock::new(Inner { state, closed: false })),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Stage a mutation, persist it, then swap it in.
  async fn commit(&self, mutate: impl FnOnce(&mut StoreState)) -> Result<()> {
    let inner = self.inner.clone().write_owned().await;
    if inner.closed {
      return Err(StoreError::Closed);
    }

    let mut staged = inner.state.clone();
    mutate(&mut staged);

    let path = self.path.clone();
    tokio::task::spawn_blocking(move || persist(inner, &path, staged))
      .await
      .map_err(|e| StoreError::Task(e.to_string()))?
  }
}

/// Write `staged` to disk and swap it into `inner`. Blocking.
fn persist(mut inner: OwnedRwLockWriteGuard<Inner>, path: &Path, staged: StoreState) -> Result<()> {
  let bytes = serde_json::to_vec(&staged)?;
  let tmp = path.with_extension("json.tmp");

  if let Err(source) = std::fs::write(&tmp, &bytes) {
    let _ = std::fs::remove_file(&tmp);
    return Err(StoreError::Write { path: tmp, source });
  }
  if let Err(source) = std::fs::rename(&tmp, path) {
    let _ = std::fs::remove_file(&tmp);
    return Err(StoreError::Write {
      path: path.to_path_buf(),
      source,
    });
  }

  inner.state = staged;
  debug!(path = %path.display(), bytes = bytes.len(), "Persisted store snapshot");
  Ok(())
}

#[async_trait::async_trait]
impl Store for FileStore {
  async fn write_item(&self, item: &CollectedItem) -> Result<()> {
    self.commit(|state| state.upsert_item(item)).await
  }

  async fn write_record(&self, record: &NormalizedRecord) -> Result<()> {
    self.commit(|state| state.upsert_record(record)).await
  }

  async fn write_batch(&self, items: &[CollectedItem], records: &[NormalizedRecord]) -> Result<()> {
    self.commit(|state| state.apply_batch(items, records)).await
  }

  async fn get_item(&self, id: &str) -> Result<Option<CollectedItem>> {
    Ok(self.inner.read().await.state.item(id))
  }

  async fn get_record(&self, id: &str) -> Result<Option<NormalizedRecord>> {
    Ok(self.inner.read().await.state.record(id))
  }

  async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<NormalizedRecord>> {
    Ok(self.inner.read().await.state.list_records(filter))
  }

  async fn counts(&self) -> Result<StoreCounts> {
    Ok(self.inner.read().await.state.counts())
  }

  async fn close(&self) -> Result<()> {
    let mut inner = self.inner.write().await;
    if !inner.closed {
      inner.closed = true;
      info!(path = %self.path.display(), "Closed file store");
    }
    Ok(())
  }
}
