//! Built-in sample content, used for sources that have no local path.

use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{CollectError, Collector};
use crate::domain::item::{CollectedItem, ContentType, SourceKind};

const SAMPLE_CONFIG: &str = r#"resource "aws_instance" "example" {
  ami           = "ami-0c55b159cbfafe1d0"
  instance_type = "t2.micro"

  tags = {
    Name = "HelloWorld"
  }
}
"#;

const SAMPLE_STATE: &str = r#"{
  "version": 4,
  "terraform_version": "1.0.0",
  "serial": 1,
  "lineage": "sample-lineage",
  "outputs": {},
  "resources": [
    {
      "mode": "managed",
      "type": "aws_instance",
      "name": "example",
      "provider": "provider[\"registry.terraform.io/hashicorp/aws\"]",
      "instances": [
        {
          "schema_version": 1,
          "attributes": {
            "ami": "ami-0c55b159cbfafe1d0",
            "instance_type": "t2.micro",
            "tags": { "Name": "HelloWorld" }
          },
          "sensitive_attributes": []
        }
      ]
    }
  ]
}
"#;

/// Serves a fixed set of items per source kind:
///
/// - object storage: a config file and a state snapshot
/// - cluster secret: a config map holding config
/// - source control: a config file
pub struct FixtureCollector {
  name: String,
  kind: SourceKind,
}

impl FixtureCollector {
  pub fn new(name: &str, kind: SourceKind) -> Self {
    Self {
      name: name.to_string(),
      kind,
    }
  }

  fn items(&self) -> Vec<CollectedItem> {
    let base = format!("{}://{}", self.kind.scheme(), self.name);
    let config = |path: &str| CollectedItem::new(self.kind, format!("{base}/{path}"), ContentType::Config, SAMPLE_CONFIG.into());

    match self.kind {
      SourceKind::ObjectStorage => vec![
        config("main.tf"),
        CollectedItem::new(
          self.kind,
          format!("{base}/terraform.tfstate"),
          ContentType::State,
          SAMPLE_STATE.into(),
        ),
      ],
      SourceKind::ClusterSecret => vec![config("configmap/terraform-config")],
      SourceKind::SourceControl => vec![config("main.tf")],
    }
  }
}

#[async_trait::async_trait]
impl Collector for FixtureCollector {
  fn name(&self) -> &str {
    &self.name
  }

  fn source_kind(&self) -> SourceKind {
    self.kind
  }

  async fn collect(&self, cancel: &CancellationToken) -> Result<Vec<CollectedItem>, CollectError> {
    if cancel.is_cancelled() {
      return Err(CollectError::Cancelled);
    }
    let items = self.items();
    trace!(source = %self.name, count = items.len(), "Fixture collection");
    Ok(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::ParserRegistry;

  #[tokio::test]
  async fn test_items_per_kind() {
    let cancel = CancellationToken::new();

    let s3 = FixtureCollector::new("bucket", SourceKind::ObjectStorage);
    let items = s3.collect(&cancel).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].source_path, "s3://bucket/main.tf");
    assert_eq!(items[1].content_type, ContentType::State);

    let k8s = FixtureCollector::new("cluster", SourceKind::ClusterSecret);
    let items = k8s.collect(&cancel).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].content_type, ContentType::Config);
  }

  #[tokio::test]
  async fn test_fixture_content_parses() {
    let registry = ParserRegistry::with_defaults();
    let items = FixtureCollector::new("bucket", SourceKind::ObjectStorage)
      .collect(&CancellationToken::new())
      .await
      .unwrap();

    for item in &items {
      let records = registry.dispatch(item).unwrap();
      assert_eq!(records.len(), 1, "{}", item.source_path);
      assert_eq!(records[0].address, "aws_instance.example");
    }
  }

  #[tokio::test]
  async fn test_cancelled_collect() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = FixtureCollector::new("x", SourceKind::SourceControl).collect(&cancel).await;
    assert!(matches!(result, Err(CollectError::Cancelled)));
  }
}
