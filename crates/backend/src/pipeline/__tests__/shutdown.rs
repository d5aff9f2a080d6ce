//! Shutdown tests: bounded stop, no writes after close, grace-period aborts.

#[cfg(test)]
mod tests {
  use std::{
    sync::Arc,
    time::{Duration, Instant},
  };

  use pretty_assertions::assert_eq;

  use crate::{
    collector::Collector,
    pipeline::__tests__::helpers::{
      InstrumentedStore, PipelineTestContext, SAMPLE_STATE, ScriptedCollector, WriteBehavior, state_item, wait_until,
    },
    store::{Store, StoreError},
  };

  fn state_batch(prefix: &str, count: usize) -> Vec<crate::domain::item::CollectedItem> {
    (0..count)
      .map(|i| state_item(&format!("s3://bucket/{prefix}-{i}.tfstate"), SAMPLE_STATE))
      .collect()
  }

  /// Test: an idle pipeline stops promptly and cleanly.
  #[tokio::test]
  async fn test_idle_shutdown_is_prompt() {
    let collector = ScriptedCollector::new("idle", Vec::new());
    let store = InstrumentedStore::new(WriteBehavior::Immediate);
    let ctx = PipelineTestContext::start(
      vec![collector.clone() as Arc<dyn Collector>],
      store.clone(),
      PipelineTestContext::config(),
    );

    // First tick fires immediately
    assert!(wait_until(Duration::from_secs(1), || async { collector.calls() >= 1 }).await);

    let started = Instant::now();
    let report = tokio::time::timeout(Duration::from_secs(1), ctx.handle.shutdown())
      .await
      .expect("idle shutdown should not wait out the grace period")
      .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(report.clean);
    assert_eq!(report.aborted, 0);
    assert_eq!(report.items_abandoned, 0);
    assert_eq!(report.writes_abandoned, 0);
    assert!(store.is_closed());
    assert_eq!(ctx.metrics.gauge("worker_up", &["parser", "0"]), Some(0));
    assert_eq!(ctx.metrics.gauge("worker_up", &["collector", "0"]), Some(0));
  }

  /// Test: cancelling the parent token stops the pipeline's workers too.
  #[tokio::test]
  async fn test_parent_cancellation_propagates() {
    let collector = ScriptedCollector::new("idle", Vec::new());
    let store = InstrumentedStore::new(WriteBehavior::Immediate);
    let ctx = PipelineTestContext::start(
      vec![collector as Arc<dyn Collector>],
      store,
      PipelineTestContext::config(),
    );

    let pipeline_token = ctx.handle.cancel_token();
    ctx.root.cancel();
    assert!(pipeline_token.is_cancelled());

    let stopped = wait_until(Duration::from_secs(1), || async {
      ctx.metrics.gauge("worker_up", &["writer", "0"]) == Some(0)
        && ctx.metrics.gauge("worker_up", &["parser", "1"]) == Some(0)
    })
    .await;
    assert!(stopped, "workers should exit on parent cancellation");

    let report = ctx.handle.shutdown().await.unwrap();
    assert!(report.clean);
  }

  /// Test: in-flight writes finish before the store is closed, and nothing
  /// reaches the store afterwards.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_no_writes_after_close() {
    let collector = ScriptedCollector::new("busy", vec![Ok(state_batch("slow", 6))]);
    let store = InstrumentedStore::new(WriteBehavior::Delay(Duration::from_millis(50)));
    let ctx = PipelineTestContext::start(
      vec![collector as Arc<dyn Collector>],
      store.clone(),
      PipelineTestContext::config(),
    );

    // Shut down while the writers are mid-flight
    assert!(wait_until(Duration::from_secs(2), || async { store.writes() >= 2 }).await);
    let report = ctx.handle.shutdown().await.unwrap();

    assert!(report.clean);
    assert!(store.is_closed());
    assert_eq!(store.in_flight_at_close(), 0);
    assert_eq!(store.writes_after_close(), 0);

    // Whatever the writers didn't get to is reported, not written
    let counts = store.counts().await.unwrap();
    let persisted = counts.items + counts.records;
    assert_eq!(persisted as u64, report.persistence.processed);
    assert!(persisted + report.writes_abandoned <= 6 * 3);

    // A closed store refuses writes
    let late = state_item("s3://bucket/late.tfstate", SAMPLE_STATE);
    let writes_before = store.writes();
    assert!(matches!(store.write_item(&late).await, Err(StoreError::Closed)));
    assert_eq!(store.writes(), writes_before + 1);
    assert_eq!(store.writes_after_close(), 1);
  }

  /// Test: a writer stuck in the store is aborted once the grace period ends.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_hung_writer_is_aborted_after_grace() {
    let collector = ScriptedCollector::new("stuck", vec![Ok(state_batch("hang", 1))]);
    let store = InstrumentedStore::new(WriteBehavior::Hang);
    let mut config = PipelineTestContext::config();
    config.shutdown_grace = Duration::from_millis(200);
    let ctx = PipelineTestContext::start(vec![collector as Arc<dyn Collector>], store.clone(), config);

    assert!(wait_until(Duration::from_secs(2), || async { store.writes() >= 1 }).await);

    let started = Instant::now();
    let report = tokio::time::timeout(Duration::from_secs(2), ctx.handle.shutdown())
      .await
      .expect("shutdown must be bounded by the grace period")
      .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(!report.clean);
    assert!(report.aborted >= 1);
    assert!(store.is_closed());
    // The aborted write was torn down before the store closed
    assert_eq!(store.in_flight_at_close(), 0);
  }
}
