//! In-memory store. Contents are lost when the process exits.

use tokio::sync::RwLock;

use super::{RecordFilter, Result, Store, StoreCounts, StoreError, StoreState};
use crate::domain::{item::CollectedItem, record::NormalizedRecord};

#[derive(Debug, Default)]
struct Inner {
  state: StoreState,
  closed: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
  inner: RwLock<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
  async fn write_item(&self, item: &CollectedItem) -> Result<()> {
    let mut inner = self.inner.write().await;
    if inner.closed {
      return Err(StoreError::Closed);
    }
    inner.state.upsert_item(item);
    Ok(())
  }

  async fn write_record(&self, record: &NormalizedRecord) -> Result<()> {
    let mut inner = self.inner.write().await;
    if inner.closed {
      return Err(StoreError::Closed);
    }
    inner.state.upsert_record(record);
    Ok(())
  }

  async fn write_batch(&self, items: &[CollectedItem], records: &[NormalizedRecord]) -> Result<()> {
    // One write guard for the whole batch; readers see all of it or none.
    let mut inner = self.inner.write().await;
    if inner.closed {
      return Err(StoreError::Closed);
    }
    inner.state.apply_batch(items, records);
    Ok(())
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
    self.inner.write().await.closed = true;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{
    item::{ContentType, SourceKind},
    record::RecordKind,
  };

  #[tokio::test]
  async fn test_write_and_read_back() {
    let store = MemoryStore::new();
    let item = CollectedItem::new(SourceKind::ObjectStorage, "s3://b/main.tf", ContentType::Config, "x".into());
    let record = NormalizedRecord::new(&item.id, RecordKind::Module, "module", "vpc", 0, "module.vpc");

    store.write_item(&item).await.unwrap();
    store.write_record(&record).await.unwrap();
    // Upsert, not insert
    store.write_record(&record).await.unwrap();

    assert_eq!(store.get_item(&item.id).await.unwrap(), Some(item.clone()));
    assert_eq!(store.get_record(&record.id).await.unwrap().map(|r| r.address), Some("module.vpc".into()));
    let counts = store.counts().await.unwrap();
    assert_eq!((counts.items, counts.records), (1, 1));
  }

  #[tokio::test]
  async fn test_writes_rejected_after_close() {
    let store = MemoryStore::new();
    let record = NormalizedRecord::new("i", RecordKind::Output, "output", "o", 0, "output.o");
    store.write_record(&record).await.unwrap();
    store.close().await.unwrap();

    assert!(matches!(store.write_record(&record).await, Err(StoreError::Closed)));
    assert!(matches!(store.write_batch(&[], &[record.clone()]).await, Err(StoreError::Closed)));
    // Reads still work
    assert!(store.get_record(&record.id).await.unwrap().is_some());
  }
}
