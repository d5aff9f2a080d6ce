//! Local directory collector.
//!
//! Walks a directory tree (respecting .gitignore) and returns one item per
//! `.tf` / `.tfstate` file. Source paths are rooted at the source name rather
//! than the local mount point, so item ids stay stable if the tree moves.

use std::path::{Path, PathBuf};

use ignore::{DirEntry, WalkBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CollectError, Collector};
use crate::domain::item::{CollectedItem, SourceKind};

/// Files larger than this are skipped
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

pub struct DirectoryCollector {
  name: String,
  kind: SourceKind,
  root: PathBuf,
}

impl DirectoryCollector {
  pub fn new(name: &str, kind: SourceKind, root: &Path) -> Self {
    Self {
      name: name.to_string(),
      kind,
      root: root.to_path_buf(),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }
}

fn is_indexable(path: &Path) -> bool {
  match path.extension().and_then(|e| e.to_str()) {
    Some(ext) => ext.eq_ignore_ascii_case("tf") || ext.eq_ignore_ascii_case("tfstate"),
    None => false,
  }
}

/// Blocking walk; runs on the blocking pool.
fn walk(name: &str, kind: SourceKind, root: &Path, cancel: &CancellationToken) -> Result<Vec<CollectedItem>, CollectError> {
  if !root.is_dir() {
    return Err(CollectError::MissingRoot(root.to_path_buf()));
  }

  let walker = WalkBuilder::new(root)
    .hidden(true)
    .git_ignore(true)
    .git_exclude(true)
    .max_filesize(Some(MAX_FILE_SIZE))
    .build();

  gather(name, kind, root, walker, cancel)
}

/// Turn walk entries into items. A bad entry is logged and skipped.
fn gather(
  name: &str,
  kind: SourceKind,
  root: &Path,
  entries: impl IntoIterator<Item = Result<DirEntry, ignore::Error>>,
  cancel: &CancellationToken,
) -> Result<Vec<CollectedItem>, CollectError> {
  let mut items = Vec::new();
  for entry in entries {
    if cancel.is_cancelled() {
      return Err(CollectError::Cancelled);
    }

    let entry = match entry {
      Ok(entry) => entry,
      Err(e) => {
        warn!(source = name, error = %e, "Skipping unwalkable entry");
        continue;
      }
    };
    let path = entry.path();
    if !entry.file_type().is_some_and(|t| t.is_file()) || !is_indexable(path) {
      continue;
    }

    let content = match std::fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Skipping unreadable file");
        continue;
      }
    };

    let relative = path.strip_prefix(root).unwrap_or(path);
    let relative = relative.to_string_lossy().replace('\\', "/");
    let source_path = format!("{}://{}/{}", kind.scheme(), name, relative);
    items.push(CollectedItem::detect(kind, source_path, content));
  }

  Ok(items)
}

#[async_trait::async_trait]
impl Collector for DirectoryCollector {
  fn name(&self) -> &str {
    &self.name
  }

  fn source_kind(&self) -> SourceKind {
    self.kind
  }

  async fn collect(&self, cancel: &CancellationToken) -> Result<Vec<CollectedItem>, CollectError> {
    let name = self.name.clone();
    let kind = self.kind;
    let root = self.root.clone();
    let walk_cancel = cancel.clone();

    let task = tokio::task::spawn_blocking(move || walk(&name, kind, &root, &walk_cancel));

    let items = tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(CollectError::Cancelled),
      result = task => result.map_err(|e| CollectError::Task(e.to_string()))??,
    };

    debug!(source = %self.name, root = %self.root.display(), count = items.len(), "Directory collection");
    Ok(items)
  }
}
