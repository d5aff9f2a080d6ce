//! Test helpers for pipeline integration tests.
//!
//! Provides scripted collectors, an instrumented store, and `PipelineTestContext`
//! which wires them into a running pipeline with test-friendly timings.

use std::{
  collections::VecDeque,
  future::Future,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{
  collector::{CollectError, Collector},
  domain::{
    item::{CollectedItem, ContentType, SourceKind},
    record::NormalizedRecord,
  },
  metrics::Metrics,
  parser::ParserRegistry,
  pipeline::{Pipeline, PipelineConfig, PipelineHandle},
  store::{MemoryStore, RecordFilter, Result as StoreResult, Store, StoreCounts},
};

pub const SAMPLE_CONFIG: &str = r#"
variable "region" {
  default = "us-east-1"
}

resource "aws_s3_bucket" "logs" {
  bucket = "logs"
}
"#;

pub const SAMPLE_STATE: &str = r#"{
  "version": 4,
  "resources": [
    {
      "mode": "managed",
      "type": "aws_instance",
      "name": "web",
      "provider": "provider[\"registry.terraform.io/hashicorp/aws\"]",
      "instances": [
        { "schema_version": 1, "attributes": { "ami": "ami-1" } },
        { "schema_version": 1, "attributes": { "ami": "ami-2" } }
      ]
    }
  ]
}"#;

pub fn config_item(path: &str, content: &str) -> CollectedItem {
  CollectedItem::new(SourceKind::SourceControl, path, ContentType::Config, content.to_string())
}

pub fn state_item(path: &str, content: &str) -> CollectedItem {
  CollectedItem::new(SourceKind::ObjectStorage, path, ContentType::State, content.to_string())
}

// ============================================================================
// Collectors
// ============================================================================

/// Returns one scripted result per call, then empty batches.
pub struct ScriptedCollector {
  name: String,
  kind: SourceKind,
  script: Mutex<VecDeque<Result<Vec<CollectedItem>, CollectError>>>,
  calls: AtomicUsize,
}

impl ScriptedCollector {
  pub fn new(name: &str, script: Vec<Result<Vec<CollectedItem>, CollectError>>) -> Arc<Self> {
    Arc::new(Self {
      name: name.to_string(),
      kind: SourceKind::ObjectStorage,
      script: Mutex::new(script.into()),
      calls: AtomicUsize::new(0),
    })
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait::async_trait]
impl Collector for ScriptedCollector {
  fn name(&self) -> &str {
    &self.name
  }

  fn source_kind(&self) -> SourceKind {
    self.kind
  }

  async fn collect(&self, _cancel: &CancellationToken) -> Result<Vec<CollectedItem>, CollectError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let next = self.script.lock().unwrap().pop_front();
    next.unwrap_or_else(|| Ok(Vec::new()))
  }
}

// ============================================================================
// Store
// ============================================================================

/// How [`InstrumentedStore`] behaves on each write
#[derive(Debug, Clone, Copy, Default)]
pub enum WriteBehavior {
  #[default]
  Immediate,
  Delay(Duration),
  /// Never completes, regardless of cancellation
  Hang,
}

/// Memory store that records writes attempted after `close()` began.
pub struct InstrumentedStore {
  inner: MemoryStore,
  behavior: WriteBehavior,
  closing: AtomicBool,
  writes: AtomicUsize,
  writes_after_close: AtomicUsize,
  in_flight: AtomicUsize,
  in_flight_at_close: AtomicUsize,
}

/// Counts a write as in flight until dropped, including by task abort.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

impl InstrumentedStore {
  pub fn new(behavior: WriteBehavior) -> Arc<Self> {
    Arc::new(Self {
      inner: MemoryStore::new(),
      behavior,
      closing: AtomicBool::new(false),
      writes: AtomicUsize::new(0),
      writes_after_close: AtomicUsize::new(0),
      in_flight: AtomicUsize::new(0),
      in_flight_at_close: AtomicUsize::new(0),
    })
  }

  pub fn writes(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  pub fn writes_after_close(&self) -> usize {
    self.writes_after_close.load(Ordering::SeqCst)
  }

  /// Writes still running when `close()` was called
  pub fn in_flight_at_close(&self) -> usize {
    self.in_flight_at_close.load(Ordering::SeqCst)
  }

  fn track(&self) -> InFlight<'_> {
    self.in_flight.fetch_add(1, Ordering::SeqCst);
    InFlight(&self.in_flight)
  }

  pub fn is_closed(&self) -> bool {
    self.closing.load(Ordering::SeqCst)
  }

  async fn before_write(&self) {
    if self.closing.load(Ordering::SeqCst) {
      self.writes_after_close.fetch_add(1, Ordering::SeqCst);
    }
    self.writes.fetch_add(1, Ordering::SeqCst);

    match self.behavior {
      WriteBehavior::Immediate => {}
      WriteBehavior::Delay(delay) => tokio::time::sleep(delay).await,
      WriteBehavior::Hang => std::future::pending::<()>().await,
    }
  }
}

#[async_trait::async_trait]
impl Store for InstrumentedStore {
  async fn write_item(&self, item: &CollectedItem) -> StoreResult<()> {
    let _in_flight = self.track();
    self.before_write().await;
    self.inner.write_item(item).await
  }

  async fn write_record(&self, record: &NormalizedRecord) -> StoreResult<()> {
    let _in_flight = self.track();
    self.before_write().await;
    self.inner.write_record(record).await
  }

  async fn write_batch(&self, items: &[CollectedItem], records: &[NormalizedRecord]) -> StoreResult<()> {
    let _in_flight = self.track();
    self.before_write().await;
    self.inner.write_batch(items, records).await
  }

  async fn get_item(&self, id: &str) -> StoreResult<Option<CollectedItem>> {
    self.inner.get_item(id).await
  }

  async fn get_record(&self, id: &str) -> StoreResult<Option<NormalizedRecord>> {
    self.inner.get_record(id).await
  }

  async fn list_records(&self, filter: &RecordFilter) -> StoreResult<Vec<NormalizedRecord>> {
    self.inner.list_records(filter).await
  }

  async fn counts(&self) -> StoreResult<StoreCounts> {
    self.inner.counts().await
  }

  async fn close(&self) -> StoreResult<()> {
    self.in_flight_at_close.store(self.in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
    self.closing.store(true, Ordering::SeqCst);
    self.inner.close().await
  }
}

// ============================================================================
// Context
// ============================================================================

/// A pipeline under test plus the pieces it was built from.
pub struct PipelineTestContext {
  pub handle: PipelineHandle,
  pub store: Arc<InstrumentedStore>,
  pub metrics: Arc<Metrics>,
  pub root: CancellationToken,
}

impl PipelineTestContext {
  /// Fast polling, two parsers, two writers, short grace period.
  pub fn config() -> PipelineConfig {
    PipelineConfig {
      poll_interval: Duration::from_millis(50),
      parser_workers: 2,
      writer_workers: 2,
      shutdown_grace: Duration::from_secs(5),
      queue_metrics_interval: Duration::from_millis(20),
    }
  }

  pub fn start(collectors: Vec<Arc<dyn Collector>>, store: Arc<InstrumentedStore>, config: PipelineConfig) -> Self {
    Self::start_with_registry(collectors, store, config, ParserRegistry::with_defaults())
  }

  pub fn start_with_registry(
    collectors: Vec<Arc<dyn Collector>>,
    store: Arc<InstrumentedStore>,
    config: PipelineConfig,
    registry: ParserRegistry,
  ) -> Self {
    let metrics = Arc::new(Metrics::new());
    let root = CancellationToken::new();
    let pipeline = Pipeline::new(config, collectors, Arc::new(registry), store.clone(), metrics.clone());
    let handle = pipeline.start(&root).expect("pipeline should start");

    Self {
      handle,
      store,
      metrics,
      root,
    }
  }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: Future<Output = bool>,
{
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    if check().await {
      return true;
    }
    if tokio::time::Instant::now() >= deadline {
      return false;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
}
