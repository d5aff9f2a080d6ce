//! Persistent store for items and records.
//!
//! Writes are idempotent upserts keyed by id. `write_batch` is all-or-nothing:
//! either every item and record in the batch becomes visible or none does.
//! Once [`Store::close`] has returned, every write fails with
//! [`StoreError::Closed`]; reads keep working.

mod file;
mod memory;

use std::{
  collections::{BTreeMap, HashMap},
  path::PathBuf,
  sync::Arc,
};

pub use file::FileStore;
pub use memory::MemoryStore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{
  config::{StoreBackend, StoreConfig},
  item::CollectedItem,
  record::{NormalizedRecord, RecordKind},
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("Store is closed")]
  Closed,
  #[error("Failed to read store file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to write store file {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Store file {path} is corrupt: {source}")]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("Store task failed: {0}")]
  Task(String),
}

impl StoreError {
  /// Label for the failure counter
  pub fn failure_kind(&self) -> &'static str {
    match self {
      Self::Closed => "store_closed",
      Self::Read { .. } => "read_failed",
      Self::Write { .. } => "write_failed",
      Self::Corrupt { .. } => "corrupt",
      Self::Serialization(_) => "serialization_failed",
      Self::Task(_) => "task_failed",
    }
  }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Query over stored records. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
  pub kind: Option<RecordKind>,
  pub item_id: Option<String>,
  pub limit: Option<usize>,
}

impl RecordFilter {
  fn matches(&self, record: &NormalizedRecord) -> bool {
    self.kind.is_none_or(|k| record.kind == k) && self.item_id.as_deref().is_none_or(|id| record.item_id == id)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
  pub items: usize,
  pub records: usize,
  pub records_by_kind: BTreeMap<RecordKind, usize>,
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
  /// Upsert one item by id.
  async fn write_item(&self, item: &CollectedItem) -> Result<()>;

  /// Upsert one record by id.
  async fn write_record(&self, record: &NormalizedRecord) -> Result<()>;

  /// Upsert items and records atomically.
  async fn write_batch(&self, items: &[CollectedItem], records: &[NormalizedRecord]) -> Result<()>;

  async fn get_item(&self, id: &str) -> Result<Option<CollectedItem>>;

  async fn get_record(&self, id: &str) -> Result<Option<NormalizedRecord>>;

  /// Matching records ordered by address, then id.
  async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<NormalizedRecord>>;

  async fn counts(&self) -> Result<StoreCounts>;

  /// Release the store. Later writes fail with [`StoreError::Closed`].
  async fn close(&self) -> Result<()>;
}

impl dyn Store {
  /// Open the configured backend.
  pub async fn open(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    match config.backend {
      StoreBackend::Memory => {
        info!("Using in-memory store");
        Ok(Arc::new(MemoryStore::new()))
      }
      StoreBackend::File => {
        let path = config.resolved_path();
        let store = FileStore::open(&path).await?;
        Ok(Arc::new(store))
      }
    }
  }
}

// ============================================================================
// Shared state
// ============================================================================

/// Items and records held by a store, plus upsert rules shared by backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
  #[serde(default)]
  items: HashMap<String, CollectedItem>,
  #[serde(default)]
  records: HashMap<String, NormalizedRecord>,
}

impl StoreState {
  /// Replace the item, keeping the first collection time.
  fn upsert_item(&mut self, item: &CollectedItem) {
    let mut item = item.clone();
    if let Some(existing) = self.items.get(&item.id) {
      item.collected_at = existing.collected_at;
    }
    self.items.insert(item.id.clone(), item);
  }

  /// Replace the record, keeping the first creation time.
  fn upsert_record(&mut self, record: &NormalizedRecord) {
    let mut record = record.clone();
    if let Some(existing) = self.records.get(&record.id) {
      record.created_at = existing.created_at;
    }
    self.records.insert(record.id.clone(), record);
  }

  fn apply_batch(&mut self, items: &[CollectedItem], records: &[NormalizedRecord]) {
    for item in items {
      self.upsert_item(item);
    }
    for record in records {
      self.upsert_record(record);
    }
  }

  fn item(&self, id: &str) -> Option<CollectedItem> {
    self.items.get(id).cloned()
  }

  fn record(&self, id: &str) -> Option<NormalizedRecord> {
    self.records.get(id).cloned()
  }

  fn list_records(&self, filter: &RecordFilter) -> Vec<NormalizedRecord> {
    let mut matched: Vec<&NormalizedRecord> = self.records.values().filter(|r| filter.matches(r)).collect();
    matched.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.id.cmp(&b.id)));

    let limit = filter.limit.unwrap_or(usize::MAX);
    matched.into_iter().take(limit).cloned().collect()
  }

  fn counts(&self) -> StoreCounts {
    let mut records_by_kind = BTreeMap::new();
    for record in self.records.values() {
      *records_by_kind.entry(record.kind).or_insert(0) += 1;
    }
    StoreCounts {
      items: self.items.len(),
      records: self.records.len(),
      records_by_kind,
    }
  }
}
