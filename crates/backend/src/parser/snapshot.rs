//! State snapshot parser.
//!
//! The document is decoded in one pass; any top-level decode error fails the
//! whole item. Each resource instance becomes one record.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{ParseError, Parser, provider_short_name};
use crate::domain::{
  item::{CollectedItem, ContentType},
  record::{NormalizedRecord, RecordKind},
};

#[derive(Debug, Deserialize)]
struct StateDocument {
  #[serde(default)]
  resources: Vec<StateResource>,
}

#[derive(Debug, Deserialize)]
struct StateResource {
  #[serde(default)]
  mode: Option<String>,
  #[serde(rename = "type")]
  resource_type: String,
  name: String,
  #[serde(default)]
  provider: String,
  #[serde(default)]
  instances: Vec<StateInstance>,
}

#[derive(Debug, Deserialize)]
struct StateInstance {
  #[serde(default)]
  schema_version: Option<u64>,
  #[serde(default)]
  attributes: Option<Map<String, Value>>,
  #[serde(default)]
  sensitive_attributes: Vec<Value>,
  #[serde(default)]
  dependencies: Vec<String>,
}

/// Parses `.tfstate` JSON documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotParser;

impl Parser for SnapshotParser {
  fn name(&self) -> &'static str {
    "snapshot"
  }

  fn can_parse(&self, content_type: ContentType) -> bool {
    content_type == ContentType::State
  }

  fn parse(&self, item: &CollectedItem) -> Result<Vec<NormalizedRecord>, ParseError> {
    let document: StateDocument =
      serde_json::from_str(&item.content).map_err(|e| ParseError::decode("state", e.to_string()))?;

    let mut records = Vec::new();
    for resource in document.resources {
      let address = format!("{}.{}", resource.resource_type, resource.name);
      let provider_name = provider_short_name(&resource.provider);

      for (index, instance) in resource.instances.into_iter().enumerate() {
        let mut record = NormalizedRecord::new(
          &item.id,
          RecordKind::Resource,
          &resource.resource_type,
          resource.name.clone(),
          index,
          address.clone(),
        );
        record.type_tag = resource.resource_type.clone();
        record.configuration = instance.attributes.unwrap_or_default();
        record.dependencies = instance.dependencies;
        record.mode = resource.mode.clone();
        record.provider_name = provider_name.clone();
        record.schema_version = instance.schema_version;
        record.sensitive_fields = sensitive_field_names(&instance.sensitive_attributes);
        records.push(record);
      }
    }

    Ok(records)
  }
}

/// Flatten `sensitive_attributes` into field names.
///
/// Entries are either plain strings or attribute paths of the form
/// `[{"type": "get_attr", "value": "password"}]`; a path contributes its first step.
fn sensitive_field_names(entries: &[Value]) -> Option<Vec<String>> {
  let names: Vec<String> = entries
    .iter()
    .filter_map(|entry| match entry {
      Value::String(s) => Some(s.clone()),
      Value::Array(steps) => steps
        .first()
        .and_then(|step| step.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string),
      _ => None,
    })
    .collect();

  if names.is_empty() { None } else { Some(names) }
}
