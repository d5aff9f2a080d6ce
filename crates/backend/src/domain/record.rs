//! Normalized records - structured entities derived from one collected item.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Closed set of record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
  Resource,
  Provider,
  Variable,
  Output,
  Module,
  #[serde(rename = "data")]
  DataSource,
}

impl RecordKind {
  pub const ALL: [RecordKind; 6] = [
    RecordKind::Resource,
    RecordKind::Provider,
    RecordKind::Variable,
    RecordKind::Output,
    RecordKind::Module,
    RecordKind::DataSource,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      RecordKind::Resource => "resource",
      RecordKind::Provider => "provider",
      RecordKind::Variable => "variable",
      RecordKind::Output => "output",
      RecordKind::Module => "module",
      RecordKind::DataSource => "data",
    }
  }

  /// Map a declarative-config block type to its record kind.
  pub fn from_block_type(block_type: &str) -> Option<Self> {
    match block_type {
      "resource" => Some(RecordKind::Resource),
      "provider" => Some(RecordKind::Provider),
      "variable" => Some(RecordKind::Variable),
      "output" => Some(RecordKind::Output),
      "module" => Some(RecordKind::Module),
      "data" => Some(RecordKind::DataSource),
      _ => None,
    }
  }

  /// Number of labels a block of this kind carries.
  pub fn label_arity(&self) -> usize {
    match self {
      RecordKind::Resource | RecordKind::DataSource => 2,
      _ => 1,
    }
  }
}

impl fmt::Display for RecordKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for RecordKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "data" | "data_source" | "data-source" => Ok(RecordKind::DataSource),
      other => RecordKind::from_block_type(other).ok_or_else(|| format!("unknown record kind: {other}")),
    }
  }
}

/// A parsed construct, keyed by a derived identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
  pub id: String,
  pub item_id: String,
  pub kind: RecordKind,
  pub name: String,
  /// Kind-specific type tag (e.g. the resource type). Empty when the kind has none.
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub type_tag: String,
  pub configuration: serde_json::Map<String, serde_json::Value>,
  pub dependencies: Vec<String>,
  pub address: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mode: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub provider_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub schema_version: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sensitive_fields: Option<Vec<String>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl NormalizedRecord {
  /// Create a record with empty configuration; callers fill in the optional parts.
  pub fn new(
    item_id: &str,
    kind: RecordKind,
    tag: &str,
    name: impl Into<String>,
    index: usize,
    address: impl Into<String>,
  ) -> Self {
    let name = name.into();
    let now = Utc::now();
    Self {
      id: record_id(item_id, tag, &name, index),
      item_id: item_id.to_string(),
      kind,
      name,
      type_tag: String::new(),
      configuration: serde_json::Map::new(),
      dependencies: Vec::new(),
      address: address.into(),
      mode: None,
      provider_name: None,
      schema_version: None,
      sensitive_fields: None,
      created_at: now,
      updated_at: now,
    }
  }
}

/// Record identifier: first 8 bytes of SHA-256 over `"<item>:<tag>:<name>:<index>"`.
///
/// Identical inputs collide; this is a derivation scheme, not a unique-id generator.
pub fn record_id(item_id: &str, tag: &str, name: &str, index: usize) -> String {
  let digest = Sha256::digest(format!("{item_id}:{tag}:{name}:{index}").as_bytes());
  hex::encode(&digest[..8])
}
