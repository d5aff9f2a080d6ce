//! Content dispatch
//!
//! Items are routed to the first registered parser that accepts the item's
//! content type:
//!
//! ```text
//! ParserRegistry (registration order)
//!   ├── SnapshotParser → state  (.tfstate, JSON document)
//!   └── ConfigParser   → config (.tf, HCL blocks)
//! ```
//!
//! Parsers are pure: they turn one item into zero or more records and touch
//! nothing else.

mod config;
mod snapshot;

use std::sync::Arc;

pub use self::{config::ConfigParser, snapshot::SnapshotParser};
use crate::domain::{
  item::{CollectedItem, ContentType},
  record::NormalizedRecord,
};

/// Errors that fail a whole item
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
  /// The document as a whole could not be decoded.
  #[error("Failed to decode {format} document: {message}")]
  Decode { format: &'static str, message: String },
  /// A block did not match the expected block schema.
  #[error("Block schema error in {block}: {message}")]
  Schema { block: String, message: String },
}

impl ParseError {
  pub fn decode(format: &'static str, message: impl Into<String>) -> Self {
    Self::Decode {
      format,
      message: message.into(),
    }
  }

  pub fn schema(block: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Schema {
      block: block.into(),
      message: message.into(),
    }
  }

  /// Label for the failure counter
  pub fn failure_kind(&self) -> &'static str {
    match self {
      Self::Decode { .. } => "decode_failed",
      Self::Schema { .. } => "schema_failed",
    }
  }
}

/// A content parser plugin.
pub trait Parser: Send + Sync {
  fn name(&self) -> &'static str;

  /// Whether this parser handles items tagged with `content_type`.
  fn can_parse(&self, content_type: ContentType) -> bool;

  fn parse(&self, item: &CollectedItem) -> Result<Vec<NormalizedRecord>, ParseError>;
}

/// Ordered list of parsers. Registration order is dispatch precedence.
#[derive(Clone, Default)]
pub struct ParserRegistry {
  parsers: Vec<Arc<dyn Parser>>,
}

impl ParserRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with the snapshot parser followed by the config parser.
  pub fn with_defaults() -> Self {
    let mut registry = Self::new();
    registry.register(SnapshotParser);
    registry.register(ConfigParser);
    registry
  }

  /// Append a parser. Earlier registrations win.
  pub fn register(&mut self, parser: impl Parser + 'static) {
    self.parsers.push(Arc::new(parser));
  }

  /// First parser accepting `content_type`, if any.
  pub fn find(&self, content_type: ContentType) -> Option<&dyn Parser> {
    self
      .parsers
      .iter()
      .find(|p| p.can_parse(content_type))
      .map(|p| p.as_ref())
  }

  pub fn accepts(&self, content_type: ContentType) -> bool {
    self.find(content_type).is_some()
  }

  /// Parse `item` with the first matching parser.
  ///
  /// An item nobody accepts yields an empty list, not an error; callers that
  /// want to count those check [`ParserRegistry::accepts`] first.
  pub fn dispatch(&self, item: &CollectedItem) -> Result<Vec<NormalizedRecord>, ParseError> {
    match self.find(item.content_type) {
      Some(parser) => parser.parse(item),
      None => Ok(Vec::new()),
    }
  }

  pub fn len(&self) -> usize {
    self.parsers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.parsers.is_empty()
  }

  pub fn names(&self) -> Vec<&'static str> {
    self.parsers.iter().map(|p| p.name()).collect()
  }
}

/// Provider name from a qualified provider reference.
///
/// `provider["registry.terraform.io/hashicorp/aws"]` → `aws`,
/// `provider["registry.terraform.io/hashicorp/aws"].west` → `aws`.
pub fn provider_short_name(qualified: &str) -> Option<String> {
  if qualified.is_empty() {
    return None;
  }

  let tail = match qualified.rfind('/') {
    Some(pos) => &qualified[pos + 1..],
    None => qualified,
  };
  let end = tail.find(['"', ']']).unwrap_or(tail.len());
  let name = &tail[..end];

  if name.is_empty() {
    Some(qualified.to_string())
  } else {
    Some(name.to_string())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;
  use crate::domain::{item::SourceKind, record::RecordKind};

  struct CountingParser {
    name: &'static str,
    calls: Arc<AtomicUsize>,
  }

  impl Parser for CountingParser {
    fn name(&self) -> &'static str {
      self.name
    }

    fn can_parse(&self, content_type: ContentType) -> bool {
      content_type == ContentType::Config
    }

    fn parse(&self, item: &CollectedItem) -> Result<Vec<NormalizedRecord>, ParseError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(vec![NormalizedRecord::new(
        &item.id,
        RecordKind::Output,
        "output",
        self.name,
        0,
        format!("output.{}", self.name),
      )])
    }
  }

  fn config_item() -> CollectedItem {
    CollectedItem::new(SourceKind::SourceControl, "repo/main.tf", ContentType::Config, String::new())
  }

  #[test]
  fn test_first_registered_parser_wins() {
    let a_calls = Arc::new(AtomicUsize::new(0));
    let b_calls = Arc::new(AtomicUsize::new(0));

    let mut registry = ParserRegistry::new();
    registry.register(CountingParser {
      name: "a",
      calls: a_calls.clone(),
    });
    registry.register(CountingParser {
      name: "b",
      calls: b_calls.clone(),
    });

    let records = registry.dispatch(&config_item()).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "a");
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_unmatched_content_type_yields_empty() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ParserRegistry::new();
    registry.register(CountingParser {
      name: "a",
      calls: calls.clone(),
    });

    let item = CollectedItem::new(SourceKind::ObjectStorage, "x.tfstate", ContentType::State, "{}".into());
    assert!(!registry.accepts(ContentType::State));
    assert!(registry.dispatch(&item).unwrap().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_default_registry_order() {
    let registry = ParserRegistry::with_defaults();
    assert_eq!(registry.names(), vec!["snapshot", "config"]);
    assert_eq!(registry.find(ContentType::State).map(|p| p.name()), Some("snapshot"));
    assert_eq!(registry.find(ContentType::Config).map(|p| p.name()), Some("config"));
  }

  #[test]
  fn test_provider_short_name() {
    assert_eq!(
      provider_short_name(r#"provider["registry.terraform.io/hashicorp/aws"]"#).as_deref(),
      Some("aws")
    );
    assert_eq!(
      provider_short_name(r#"provider["registry.terraform.io/hashicorp/google"].west"#).as_deref(),
      Some("google")
    );
    assert_eq!(provider_short_name("aws").as_deref(), Some("aws"));
    assert_eq!(provider_short_name(""), None);
  }
}
