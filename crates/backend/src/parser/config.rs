//! Declarative config parser.
//!
//! Documents are decoded with `hcl-rs`. Block structure is strict: a document
//! that doesn't parse, nests too deeply, or has a known block with the wrong
//! number of labels fails the whole item. Attribute values are lenient: an
//! expression that can't be turned into a value is dropped and the block is
//! still emitted with the attributes that could.

use hcl::{
  Block, Body, Expression, ObjectKey,
  eval::{Context, Evaluate},
};
use serde_json::{Map, Value};
use tracing::trace;

use super::{ParseError, Parser};
use crate::domain::{
  item::{CollectedItem, ContentType},
  record::{NormalizedRecord, RecordKind},
};

/// Deepest `{`/`[`/`(` nesting handed to the HCL parser.
///
/// The HCL parser and the value conversion below both recurse per level.
const MAX_NESTING_DEPTH: usize = 32;

/// Parses `.tf` documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigParser;

impl Parser for ConfigParser {
  fn name(&self) -> &'static str {
    "config"
  }

  fn can_parse(&self, content_type: ContentType) -> bool {
    content_type == ContentType::Config
  }

  fn parse(&self, item: &CollectedItem) -> Result<Vec<NormalizedRecord>, ParseError> {
    check_nesting(&item.content)?;
    let body = hcl::parse(&item.content).map_err(|e| ParseError::decode("config", e.to_string()))?;

    let mut records = Vec::new();
    for block in body.blocks() {
      // terraform, locals, moved, import, ... carry no records
      let Some(kind) = RecordKind::from_block_type(block.identifier()) else {
        continue;
      };

      let labels: Vec<&str> = block.labels().iter().map(|label| label.as_str()).collect();
      if labels.len() != kind.label_arity() {
        let mut path = vec![block.identifier()];
        path.extend(&labels);
        return Err(ParseError::schema(
          path.join("."),
          format!(
            "{} block requires {} label(s), found {}",
            block.identifier(),
            kind.label_arity(),
            labels.len()
          ),
        ));
      }

      records.push(block_record(&item.id, kind, &labels, block));
    }

    Ok(records)
  }
}

/// Reject documents nested deeper than [`MAX_NESTING_DEPTH`].
///
/// Brackets inside strings and comments are counted too, so this can only
/// over-estimate.
fn check_nesting(src: &str) -> Result<(), ParseError> {
  let mut depth = 0usize;
  for byte in src.bytes() {
    match byte {
      b'{' | b'[' | b'(' => {
        depth += 1;
        if depth > MAX_NESTING_DEPTH {
          return Err(ParseError::decode(
            "config",
            format!("nesting deeper than {MAX_NESTING_DEPTH} levels"),
          ));
        }
      }
      b'}' | b']' | b')' => depth = depth.saturating_sub(1),
      _ => {}
    }
  }
  Ok(())
}

fn block_record(item_id: &str, kind: RecordKind, labels: &[&str], block: &Block) -> NormalizedRecord {
  let (type_tag, name, address) = match kind {
    RecordKind::Resource => (labels[0].to_string(), labels[1], format!("{}.{}", labels[0], labels[1])),
    RecordKind::DataSource => (labels[0].to_string(), labels[1], format!("data.{}.{}", labels[0], labels[1])),
    RecordKind::Provider => (String::new(), labels[0], format!("provider.{}", labels[0])),
    RecordKind::Variable => (String::new(), labels[0], format!("var.{}", labels[0])),
    RecordKind::Output => (String::new(), labels[0], format!("output.{}", labels[0])),
    RecordKind::Module => (String::new(), labels[0], format!("module.{}", labels[0])),
  };

  let mut record = NormalizedRecord::new(item_id, kind, kind.as_str(), name, 0, address);
  record.type_tag = type_tag;
  record.configuration = body_object(block.body());
  record.dependencies = depends_on(&record.configuration);
  if kind == RecordKind::Provider {
    record.provider_name = Some(record.name.clone());
  }
  record
}

/// Decode a block body into a JSON object.
///
/// Attributes whose value can't be produced are left out. Repeated attribute
/// names keep the first definition. Nested blocks are keyed by type (and then
/// by label); repeated nested blocks become a list.
fn body_object(body: &Body) -> Map<String, Value> {
  let mut map = Map::new();

  for attribute in body.attributes() {
    let key = attribute.key();
    if map.contains_key(key) {
      continue;
    }
    match expression_value(attribute.expr()) {
      Some(value) => {
        map.insert(key.to_string(), value);
      }
      None => trace!(attribute = key, "Dropping attribute without a static value"),
    }
  }

  for block in body.blocks() {
    let mut value = Value::Object(body_object(block.body()));
    for label in block.labels().iter().rev() {
      let mut wrapped = Map::new();
      wrapped.insert(label.as_str().to_string(), value);
      value = Value::Object(wrapped);
    }

    match map.get_mut(block.identifier()) {
      Some(Value::Array(existing)) => existing.push(value),
      Some(existing) => {
        let first = existing.take();
        *existing = Value::Array(vec![first, value]);
      }
      None => {
        map.insert(block.identifier().to_string(), value);
      }
    }
  }

  map
}

/// Turn an attribute expression into JSON.
///
/// Literals, lists and objects map directly. References (`var.region`,
/// `aws_vpc.main.id`) and templates that mention them are kept as their source
/// text. Anything else is evaluated without variables or functions; `None`
/// when that fails.
fn expression_value(expr: &Expression) -> Option<Value> {
  match expr {
    Expression::Null => Some(Value::Null),
    Expression::Bool(b) => Some(Value::Bool(*b)),
    Expression::Number(n) => serde_json::to_value(n).ok(),
    Expression::String(s) => Some(Value::String(s.clone())),
    Expression::Array(items) => items.iter().map(expression_value).collect::<Option<Vec<_>>>().map(Value::Array),
    Expression::Object(object) => {
      let mut map = Map::new();
      for (key, value) in object {
        map.insert(object_key(key)?, expression_value(value)?);
      }
      Some(Value::Object(map))
    }
    Expression::Variable(_) | Expression::Traversal(_) => source_text(expr),
    Expression::TemplateExpr(_) => evaluate(expr).or_else(|| source_text(expr)),
    Expression::Parenthesis(inner) => expression_value(inner),
    _ => evaluate(expr),
  }
}

fn object_key(key: &ObjectKey) -> Option<String> {
  match key {
    ObjectKey::Identifier(ident) => Some(ident.as_str().to_string()),
    ObjectKey::Expression(Expression::String(s)) => Some(s.clone()),
    ObjectKey::Expression(expr) => match expression_value(expr)? {
      Value::String(s) => Some(s),
      other => Some(other.to_string()),
    },
    _ => None,
  }
}

fn evaluate(expr: &Expression) -> Option<Value> {
  match expr.evaluate(&Context::new()) {
    Ok(value) => serde_json::to_value(&value).ok(),
    Err(e) => {
      trace!(error = %e, "Expression has no static value");
      None
    }
  }
}

fn source_text(expr: &Expression) -> Option<Value> {
  let text = hcl::format::to_string(expr).ok()?;
  let text = text.trim();
  // Templates format with their quotes
  let text = text
    .strip_prefix('"')
    .and_then(|t| t.strip_suffix('"'))
    .unwrap_or(text);
  Some(Value::String(text.to_string()))
}

/// References listed in a `depends_on` attribute.
fn depends_on(configuration: &Map<String, Value>) -> Vec<String> {
  match configuration.get("depends_on") {
    Some(Value::Array(refs)) => refs.iter().filter_map(Value::as_str).map(str::to_string).collect(),
    _ => Vec::new(),
  }
}
