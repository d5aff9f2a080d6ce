//! Parse command - run the parsers on one local file

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use tfindex::{
  config::Config,
  item::{CollectedItem, ContentType, SourceKind},
  parser::ParserRegistry,
  store::Store,
};
use tracing::debug;

pub async fn cmd_parse(config_path: Option<&Path>, file: &Path, content_type: Option<&str>, save: bool) -> Result<()> {
  let content = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;

  let source_path = file.display().to_string();
  let content_type = match content_type {
    Some(ct) => ct.parse::<ContentType>().map_err(|e| anyhow!(e))?,
    None => ContentType::from_path(&source_path),
  };
  let item = CollectedItem::new(SourceKind::SourceControl, source_path, content_type, content);

  let registry = ParserRegistry::with_defaults();
  if !registry.accepts(item.content_type) {
    bail!("No parser accepts content type {}", item.content_type);
  }

  let records = registry
    .dispatch(&item)
    .with_context(|| format!("Failed to parse {}", file.display()))?;
  debug!(item_id = %item.id, records = records.len(), "Parsed file");

  println!("{}", serde_json::to_string_pretty(&records)?);

  if save {
    let config = Config::load(config_path).context("Failed to load config")?;
    let store = <dyn Store>::open(&config.store).await.context("Failed to open store")?;
    store
      .write_batch(std::slice::from_ref(&item), &records)
      .await
      .context("Failed to save records")?;
    store.close().await?;
    eprintln!("Saved item {} with {} records", item.id, records.len());
  }

  Ok(())
}
