use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
  TranscriptTxt,
  TranscriptJson,
  SummaryMd,
  SummaryJson,
}

impl ArtifactKind {
  pub fn extension(&self) -> &'static str {
    match self {
      ArtifactKind::TranscriptTxt => "txt",
      ArtifactKind::TranscriptJson => "json",
      ArtifactKind::SummaryMd => "md",
      ArtifactKind::SummaryJson => "json",
    }
  }

  pub fn tag(&self) -> &'static str {
    match self {
      ArtifactKind::TranscriptTxt => "transcript_txt",
      ArtifactKind::TranscriptJson => "transcript_json",
      ArtifactKind::SummaryMd => "summary_md",
      ArtifactKind::SummaryJson => "summary_json",
    }
  }
}

/// `<video_id>_<YYYY-MM-DD>_<kind>.<ext>`, per §6.
pub fn artifact_key(video_id: &str, day: &str, kind: ArtifactKind) -> String {
  format!("{video_id}_{day}_{}.{}", kind.tag(), kind.extension())
}

#[async_trait]
pub trait BlobStore: Send + Sync {
  async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String>;
  async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

/// Filesystem-backed adapter, one file per key under a configured root
/// folder.
pub struct FilesystemBlobStore {
  root: PathBuf,
}

impl FilesystemBlobStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    FilesystemBlobStore { root: root.into() }
  }

  fn path_for(&self, key: &str) -> PathBuf {
    self.root.join(key)
  }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
  async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
    let path = self.path_for(key);
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| PipelineError::transient(e.to_string()))?;
    }
    tokio::fs::write(&path, bytes)
      .await
      .map_err(|e| PipelineError::transient(e.to_string()))?;
    Ok(path.to_string_lossy().to_string())
  }

  async fn get(&self, key: &str) -> Result<Vec<u8>> {
    tokio::fs::read(self.path_for(key))
      .await
      .map_err(|e| PipelineError::transient(e.to_string()))
  }
}

pub struct InMemoryBlobStore {
  blobs: DashMap<String, Vec<u8>>,
}

impl Default for InMemoryBlobStore {
  fn default() -> Self {
    Self::new()
  }
}

impl InMemoryBlobStore {
  pub fn new() -> Self {
    InMemoryBlobStore {
      blobs: DashMap::new(),
    }
  }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
  async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
    self.blobs.insert(key.to_string(), bytes);
    Ok(format!("memory://{key}"))
  }

  async fn get(&self, key: &str) -> Result<Vec<u8>> {
    self
      .blobs
      .get(key)
      .map(|v| v.clone())
      .ok_or_else(|| PipelineError::terminal(format!("no blob for key {key}")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn artifact_key_follows_naming_convention() {
    let key = artifact_key("v1", "2026-07-27", ArtifactKind::TranscriptJson);
    assert_eq!(key, "v1_2026-07-27_transcript_json.json");
  }

  #[tokio::test]
  async fn in_memory_store_round_trips() {
    let store = InMemoryBlobStore::new();
    store.put("k1", b"hello".to_vec()).await.unwrap();
    let bytes = store.get("k1").await.unwrap();
    assert_eq!(bytes, b"hello");
  }

  #[tokio::test]
  async fn in_memory_store_errors_on_missing_key() {
    let store = InMemoryBlobStore::new();
    assert!(store.get("missing").await.is_err());
  }
}
