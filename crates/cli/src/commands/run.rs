//! Run command

use anyhow::{Context, Result};
use tfindex::{Daemon, RuntimeConfig};
use tracing::{info, warn};

/// Run the pipeline in the foreground until a shutdown signal arrives, then
/// print the run summary (shutdown report and final metrics) as JSON.
pub async fn cmd_run(runtime: RuntimeConfig) -> Result<()> {
  let daemon = Daemon::new(runtime);
  let summary = daemon.run().await.context("Failed to run pipeline")?;

  let report = &summary.shutdown;
  if report.clean {
    info!(elapsed_ms = report.elapsed_ms, "Stopped cleanly");
  } else {
    warn!(
      aborted = report.aborted,
      items_abandoned = report.items_abandoned,
      writes_abandoned = report.writes_abandoned,
      "Stopped with workers still running after the grace period"
    );
  }

  println!("{}", serde_json::to_string_pretty(&summary)?);
  Ok(())
}
