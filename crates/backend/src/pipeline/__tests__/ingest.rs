//! End-to-end ingestion tests.
//!
//! Items flow from scripted collectors through the real parsers into an
//! instrumented memory store.

#[cfg(test)]
mod tests {
  use std::{collections::HashSet, sync::Arc, time::Duration};

  use pretty_assertions::assert_eq;

  use crate::{
    collector::{CollectError, Collector},
    parser::{ParserRegistry, SnapshotParser},
    pipeline::{
      __tests__::helpers::{
        InstrumentedStore, PipelineTestContext, SAMPLE_CONFIG, SAMPLE_STATE, ScriptedCollector, WriteBehavior,
        config_item, state_item, wait_until,
      },
      parsing::UNSUPPORTED_CONTENT_TYPE,
    },
    store::{RecordFilter, Store},
  };

  /// Test: two ticks of two items each, through 2 parsers and 2 writers, end up
  /// as exactly the records the parsers derive from those four items.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_two_ticks_are_fully_persisted() {
    let tick_one = vec![
      config_item("git://infra/main.tf", SAMPLE_CONFIG),
      state_item("s3://bucket/prod.tfstate", SAMPLE_STATE),
    ];
    let tick_two = vec![
      config_item("git://infra/network.tf", SAMPLE_CONFIG),
      state_item("s3://bucket/staging.tfstate", SAMPLE_STATE),
    ];

    // What the parsers should derive from all four items
    let registry = ParserRegistry::with_defaults();
    let all_items: Vec<_> = tick_one.iter().chain(&tick_two).cloned().collect();
    let mut expected: Vec<String> = all_items
      .iter()
      .flat_map(|item| registry.dispatch(item).unwrap())
      .map(|r| r.id)
      .collect();
    // 2 config records + 2 state instances, per pair of items
    assert_eq!(expected.len(), 8);
    let distinct: HashSet<&String> = expected.iter().collect();
    assert_eq!(distinct.len(), expected.len(), "derivation inputs differ, so ids must too");
    expected.sort();

    let collector = ScriptedCollector::new("scripted", vec![Ok(tick_one), Ok(tick_two)]);
    let store = InstrumentedStore::new(WriteBehavior::Immediate);
    let ctx = PipelineTestContext::start(
      vec![collector.clone() as Arc<dyn Collector>],
      store.clone(),
      PipelineTestContext::config(),
    );

    let drained = wait_until(Duration::from_secs(5), || async {
      let counts = store.counts().await.unwrap();
      counts.items == 4 && counts.records == 8
    })
    .await;
    assert!(drained, "pipeline should persist every item and record");
    assert!(collector.calls() >= 2);

    let report = ctx.handle.shutdown().await.expect("shutdown");
    assert!(report.clean);
    assert_eq!(report.collection.workers, 1);
    assert_eq!(report.parsing.workers, 2);
    assert_eq!(report.persistence.workers, 2);
    assert_eq!(report.parsing.processed, 4);
    // 4 item writes + 8 record writes
    assert_eq!(report.persistence.processed, 12);

    let mut persisted: Vec<String> = store
      .list_records(&RecordFilter::default())
      .await
      .unwrap()
      .into_iter()
      .map(|r| r.id)
      .collect();
    persisted.sort();
    assert_eq!(persisted, expected);

    // Every record's owning item was persisted too
    for record in store.list_records(&RecordFilter::default()).await.unwrap() {
      assert!(store.get_item(&record.item_id).await.unwrap().is_some());
    }

    let totals = ctx.metrics.totals();
    assert_eq!(totals.items_collected, 4);
    assert_eq!(totals.records_parsed, 8);
    assert_eq!(totals.records_written, 8);
    assert_eq!(totals.failures, 0);
    assert_eq!(ctx.metrics.counter("items_collected", &["object-storage", "state"]), 2);
    assert_eq!(ctx.metrics.counter("records_parsed", &["resource", "state"]), 4);
  }

  /// Test: failures are counted per component and never stop a loop.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_failures_are_counted_and_skipped() {
    let collector = ScriptedCollector::new(
      "flaky",
      vec![
        Err(CollectError::Walk("bucket unreachable".into())),
        Ok(vec![
          state_item("s3://bucket/broken.tfstate", "{ not json"),
          state_item("s3://bucket/good.tfstate", SAMPLE_STATE),
        ]),
      ],
    );
    let store = InstrumentedStore::new(WriteBehavior::Immediate);
    let ctx = PipelineTestContext::start(
      vec![collector.clone() as Arc<dyn Collector>],
      store.clone(),
      PipelineTestContext::config(),
    );

    let done = wait_until(Duration::from_secs(5), || async {
      let counts = store.counts().await.unwrap();
      counts.items == 1 && counts.records == 2 && ctx.metrics.counter("failures", &["parser", "decode_failed"]) == 1
    })
    .await;
    assert!(done, "good item should be persisted despite the failures around it");

    assert_eq!(ctx.metrics.counter("failures", &["collector", "walk_failed"]), 1);
    assert!(store.get_item(&state_item("s3://bucket/broken.tfstate", "{ not json").id).await.unwrap().is_none());

    let report = ctx.handle.shutdown().await.unwrap();
    assert_eq!(report.collection.failed, 1);
    assert_eq!(report.parsing.failed, 1);
    assert_eq!(report.parsing.processed, 1);
  }

  /// Test: an item no registered parser accepts is counted, not silently lost.
  #[tokio::test]
  async fn test_unmatched_content_type_is_counted() {
    let collector = ScriptedCollector::new(
      "mixed",
      vec![Ok(vec![
        config_item("git://infra/main.tf", SAMPLE_CONFIG),
        state_item("s3://bucket/prod.tfstate", SAMPLE_STATE),
      ])],
    );
    let store = InstrumentedStore::new(WriteBehavior::Immediate);

    let mut registry = ParserRegistry::new();
    registry.register(SnapshotParser);
    let ctx = PipelineTestContext::start_with_registry(
      vec![collector as Arc<dyn Collector>],
      store.clone(),
      PipelineTestContext::config(),
      registry,
    );

    let done = wait_until(Duration::from_secs(5), || async {
      let counts = store.counts().await.unwrap();
      counts.items == 1
        && counts.records == 2
        && ctx.metrics.counter("failures", &["parser", UNSUPPORTED_CONTENT_TYPE]) == 1
    })
    .await;
    assert!(done);
    assert_eq!(ctx.metrics.counter("records_parsed", &["resource", "config"]), 0);
    ctx.handle.shutdown().await.unwrap();
  }

  /// Test: the sampler publishes queue depths and worker gauges track liveness.
  #[tokio::test]
  async fn test_gauges_track_pipeline_state() {
    let collector = ScriptedCollector::new("idle", Vec::new());
    let store = InstrumentedStore::new(WriteBehavior::Immediate);
    let ctx = PipelineTestContext::start(
      vec![collector as Arc<dyn Collector>],
      store,
      PipelineTestContext::config(),
    );

    let sampled = wait_until(Duration::from_secs(2), || async {
      ctx.metrics.gauge("queue_depth", &["items"]) == Some(0)
        && ctx.metrics.gauge("queue_depth", &["writes"]) == Some(0)
        && ctx.metrics.gauge("worker_up", &["writer", "1"]) == Some(1)
    })
    .await;
    assert!(sampled);

    let metrics = ctx.metrics.clone();
    ctx.handle.shutdown().await.unwrap();
    for (pool, id) in [("collector", "0"), ("parser", "0"), ("parser", "1"), ("writer", "0"), ("writer", "1")] {
      assert_eq!(metrics.gauge("worker_up", &[pool, id]), Some(0), "{pool}/{id} should be down");
    }
  }
}
