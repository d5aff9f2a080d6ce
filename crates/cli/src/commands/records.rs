//! Records command - query the file store

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use tfindex::{
  config::{Config, StoreBackend},
  record::RecordKind,
  store::{FileStore, RecordFilter, Store},
};

pub async fn cmd_records(
  config_path: Option<&Path>,
  kind: Option<&str>,
  item: Option<String>,
  limit: Option<usize>,
  json: bool,
) -> Result<()> {
  let config = Config::load(config_path).context("Failed to load config")?;
  if config.store.backend == StoreBackend::Memory {
    bail!("The memory store does not outlive `tfindex run`; configure [store] backend = \"file\" to query records");
  }

  let kind = kind
    .map(|k| k.parse::<RecordKind>().map_err(|e| anyhow!(e)))
    .transpose()?;
  let filter = RecordFilter {
    kind,
    item_id: item,
    limit,
  };

  let path = config.store.resolved_path();
  let store = FileStore::open(&path)
    .await
    .with_context(|| format!("Failed to open store {}", path.display()))?;
  let records = store.list_records(&filter).await?;

  if json {
    println!("{}", serde_json::to_string_pretty(&records)?);
    return Ok(());
  }

  let counts = store.counts().await?;
  println!("Store: {}", path.display());
  println!("Items: {}  Records: {}", counts.items, counts.records);
  for (kind, count) in &counts.records_by_kind {
    println!("  {:<10} {count}", kind.as_str());
  }
  println!();

  if records.is_empty() {
    println!("No matching records");
    return Ok(());
  }

  for record in &records {
    println!(
      "{}  {:<8}  {}  (item {}, updated {})",
      record.id,
      record.kind.as_str(),
      record.address,
      record.item_id,
      record.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
  }
  println!("\n{} record(s)", records.len());

  Ok(())
}
