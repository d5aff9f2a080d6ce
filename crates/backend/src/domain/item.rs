//! Collected items - raw content plus provenance pulled from a source.

use std::{fmt, path::Path, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of external system a collector polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
  /// Bucket-style object storage (state backends).
  ObjectStorage,
  /// Secrets held by a cluster (in-cluster state backends).
  ClusterSecret,
  /// Repositories hosted on a source-control service.
  SourceControl,
}

impl SourceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      SourceKind::ObjectStorage => "object-storage",
      SourceKind::ClusterSecret => "cluster-secret",
      SourceKind::SourceControl => "source-control",
    }
  }

  /// URI scheme used when synthesizing source paths for this kind.
  pub fn scheme(&self) -> &'static str {
    match self {
      SourceKind::ObjectStorage => "s3",
      SourceKind::ClusterSecret => "k8s",
      SourceKind::SourceControl => "git",
    }
  }
}

impl fmt::Display for SourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SourceKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "object-storage" | "s3" => Ok(SourceKind::ObjectStorage),
      "cluster-secret" | "kubernetes" => Ok(SourceKind::ClusterSecret),
      "source-control" | "bitbucket" | "git" => Ok(SourceKind::SourceControl),
      other => Err(format!("unknown source kind: {other}")),
    }
  }
}

/// Content-type tag used by the dispatcher to route an item to a parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
  /// Declarative configuration (`.tf`).
  Config,
  /// State snapshot (`.tfstate`).
  State,
}

impl ContentType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ContentType::Config => "config",
      ContentType::State => "state",
    }
  }

  /// Detect the content type from a source path.
  ///
  /// Anything that isn't recognisably a snapshot is treated as configuration.
  pub fn from_path(path: &str) -> Self {
    let ext = Path::new(path)
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| e.to_lowercase());

    match ext.as_deref() {
      Some("tf") => ContentType::Config,
      Some("tfstate") => ContentType::State,
      _ if path.contains("tfstate") || path.ends_with(".json") => ContentType::State,
      _ => ContentType::Config,
    }
  }
}

impl fmt::Display for ContentType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ContentType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "config" | "tf" => Ok(ContentType::Config),
      "state" | "tfstate" => Ok(ContentType::State),
      other => Err(format!("unknown content type: {other}")),
    }
  }
}

/// A unit of raw content pulled from an external source.
///
/// Immutable once enqueued; consumed by exactly one parsing worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedItem {
  pub id: String,
  pub source: SourceKind,
  pub source_path: String,
  pub content_type: ContentType,
  pub content: String,
  pub content_hash: String,
  pub collected_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl CollectedItem {
  /// Build an item, deriving its id and content hash.
  pub fn new(source: SourceKind, source_path: impl Into<String>, content_type: ContentType, content: String) -> Self {
    let source_path = source_path.into();
    let now = Utc::now();
    Self {
      id: item_id(source, &source_path),
      content_hash: content_hash(&content),
      source,
      source_path,
      content_type,
      content,
      collected_at: now,
      updated_at: now,
    }
  }

  /// Build an item, detecting the content type from the path.
  pub fn detect(source: SourceKind, source_path: impl Into<String>, content: String) -> Self {
    let source_path = source_path.into();
    let content_type = ContentType::from_path(&source_path);
    Self::new(source, source_path, content_type, content)
  }
}

/// Item identifier: first 8 bytes of SHA-256 over `"<source>:<path>"`.
pub fn item_id(source: SourceKind, path: &str) -> String {
  let digest = Sha256::digest(format!("{}:{}", source.as_str(), path).as_bytes());
  hex::encode(&digest[..8])
}

/// Full SHA-256 hex digest of the content.
pub fn content_hash(content: &str) -> String {
  hex::encode(Sha256::digest(content.as_bytes()))
}
