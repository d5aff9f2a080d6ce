//! Config commands

use std::path::Path;

use anyhow::{Context, Result, bail};
use tfindex::config::Config;

/// Show the effective configuration and where it came from
pub async fn cmd_config_show(explicit: Option<&Path>) -> Result<()> {
  let config = Config::load(explicit).context("Failed to load config")?;

  let user_config = Config::user_config_path();
  let env_config = std::env::var("TFINDEX_CONFIG").ok().filter(|p| !p.is_empty());

  if let Some(path) = explicit {
    println!("Using config: {}", path.display());
  } else if let Some(path) = env_config {
    println!("Using config from TFINDEX_CONFIG: {path}");
  } else if user_config.exists() {
    println!("Using user config: {}", user_config.display());
  } else {
    println!("Using default configuration (no config file found)");
  }
  println!();

  let toml_str = toml::to_string_pretty(&config)?;
  println!("{toml_str}");

  if let Err(e) = config.validate() {
    println!("Warning: {e}");
  }

  Ok(())
}

/// Write the default config template to the user config path
pub async fn cmd_config_init(force: bool) -> Result<()> {
  let config_path = Config::user_config_path();

  if config_path.exists() && !force {
    bail!(
      "Config file already exists: {} (use --force to overwrite)",
      config_path.display()
    );
  }

  if let Some(parent) = config_path.parent() {
    std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
  }

  std::fs::write(&config_path, Config::generate_template())
    .with_context(|| format!("Failed to write {}", config_path.display()))?;

  println!("Created config: {}", config_path.display());
  println!("Edit [[sources]] to point at your state buckets and repositories.");

  Ok(())
}
