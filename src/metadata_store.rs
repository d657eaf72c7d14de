use crate::error::{PipelineError, Result};
use crate::models::{IndexRecord, Summary, Transcript, Video, VideoStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

/// Primary record of every entity; enforces state-machine transitions and
/// idempotency. Workers propose transitions but commit only through this
/// trait, matching the ownership rule in the data model: C1 exclusively
/// owns Video/Transcript/Summary mutations.
#[async_trait]
pub trait MetadataStore: Send + Sync {
  async fn upsert_video(&self, video: Video) -> Result<Video>;
  async fn transition(
    &self,
    video_id: &str,
    from_state: VideoStatus,
    to_state: VideoStatus,
  ) -> Result<Video>;
  async fn get(&self, video_id: &str) -> Result<Option<Video>>;
  async fn query_by_status(&self, status: VideoStatus, limit: usize) -> Result<Vec<Video>>;
  async fn increment_retry_count(&self, video_id: &str) -> Result<u32>;

  async fn commit_transcript(&self, transcript: Transcript) -> Result<()>;
  async fn get_transcript(&self, video_id: &str) -> Result<Option<Transcript>>;

  async fn commit_summary(&self, summary: Summary) -> Result<()>;
  async fn get_summary(&self, video_id: &str) -> Result<Option<Summary>>;

  async fn record_index_record(&self, record: IndexRecord) -> Result<()>;
  async fn query_index_records(&self, video_id: &str) -> Result<Vec<IndexRecord>>;
}

/// `dashmap`-sharded in-process store. This is the default implementation
/// and what every test in this crate runs against; the sqlx-backed store in
/// `db.rs` implements the same trait for when `DATABASE_URL` is configured.
pub struct InMemoryMetadataStore {
  videos: DashMap<String, Video>,
  transcripts: DashMap<String, Transcript>,
  summaries: DashMap<String, Summary>,
  index_records: DashMap<String, IndexRecord>,
  /// per-`video_id` lock so a commit sequence (transition + transcript, etc.)
  /// never interleaves with a concurrent writer for the same video.
  locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Default for InMemoryMetadataStore {
  fn default() -> Self {
    Self::new()
  }
}

impl InMemoryMetadataStore {
  pub fn new() -> Self {
    InMemoryMetadataStore {
      videos: DashMap::new(),
      transcripts: DashMap::new(),
      summaries: DashMap::new(),
      index_records: DashMap::new(),
      locks: DashMap::new(),
    }
  }

  fn lock_for(&self, video_id: &str) -> Arc<Mutex<()>> {
    self
      .locks
      .entry(video_id.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone()
  }

  /// Local retry-with-backoff for contended writes, matching §4.1's failure
  /// semantics: base 100ms, doubling, capped at 1s, at most 5 attempts
  /// before surfacing `StorageUnavailable`.
  async fn with_retry<T>(&self, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut delay = Duration::from_millis(100);
    let mut attempt = 0;
    loop {
      match f() {
        Ok(v) => return Ok(v),
        Err(_) if attempt < 4 => {
          attempt += 1;
          sleep(delay).await;
          delay = (delay * 2).min(Duration::from_secs(1));
        }
        Err(_) => {
          return Err(PipelineError::StorageUnavailable(format!(
            "exhausted {attempt} retries"
          )))
        }
      }
    }
  }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
  async fn upsert_video(&self, video: Video) -> Result<Video> {
    let lock = self.lock_for(&video.video_id);
    let _guard = lock.lock().await;
    let merged = match self.videos.get(&video.video_id) {
      Some(existing) => {
        // A second discovery of the same video never downgrades status.
        let mut merged = video;
        if existing.status as u8 > merged.status as u8 {
          merged.status = existing.status;
        }
        merged.retry_count = existing.retry_count;
        merged.created_at = existing.created_at;
        merged
      }
      None => video,
    };
    self
      .videos
      .insert(merged.video_id.clone(), merged.clone());
    Ok(merged)
  }

  async fn transition(
    &self,
    video_id: &str,
    from_state: VideoStatus,
    to_state: VideoStatus,
  ) -> Result<Video> {
    let lock = self.lock_for(video_id);
    let _guard = lock.lock().await;
    self
      .with_retry(|| {
        let mut entry = self
          .videos
          .get_mut(video_id)
          .ok_or_else(|| PipelineError::terminal(format!("unknown video {video_id}")))?;
        // A Failed transition always succeeds regardless of current state;
        // every other transition must match the caller's expected from_state.
        if to_state != VideoStatus::Failed && entry.status != from_state {
          return Err(PipelineError::InvalidTransition {
            video_id: video_id.to_string(),
            from: entry.status.as_str().to_string(),
            to: to_state.as_str().to_string(),
          });
        }
        if !entry.status.can_transition_to(to_state) {
          return Err(PipelineError::InvalidTransition {
            video_id: video_id.to_string(),
            from: entry.status.as_str().to_string(),
            to: to_state.as_str().to_string(),
          });
        }
        entry.status = to_state;
        entry.updated_at = chrono::Utc::now();
        Ok(entry.clone())
      })
      .await
  }

  async fn get(&self, video_id: &str) -> Result<Option<Video>> {
    Ok(self.videos.get(video_id).map(|v| v.clone()))
  }

  async fn increment_retry_count(&self, video_id: &str) -> Result<u32> {
    let lock = self.lock_for(video_id);
    let _guard = lock.lock().await;
    let mut entry = self
      .videos
      .get_mut(video_id)
      .ok_or_else(|| PipelineError::terminal(format!("unknown video {video_id}")))?;
    entry.retry_count += 1;
    Ok(entry.retry_count)
  }

  async fn query_by_status(&self, status: VideoStatus, limit: usize) -> Result<Vec<Video>> {
    let mut out: Vec<Video> = self
      .videos
      .iter()
      .filter(|v| v.status == status)
      .map(|v| v.clone())
      .collect();
    out.sort_by(|a, b| a.video_id.cmp(&b.video_id));
    out.truncate(limit);
    Ok(out)
  }

  async fn commit_transcript(&self, transcript: Transcript) -> Result<()> {
    let lock = self.lock_for(&transcript.video_id);
    let _guard = lock.lock().await;
    if self.videos.get(&transcript.video_id).is_none() {
      return Err(PipelineError::terminal(format!(
        "cannot commit transcript: unknown video {}",
        transcript.video_id
      )));
    }
    if let Some(existing) = self.transcripts.get(&transcript.video_id) {
      if existing.content_digest == transcript.content_digest {
        return Ok(());
      }
    }
    self
      .transcripts
      .insert(transcript.video_id.clone(), transcript);
    Ok(())
  }

  async fn get_transcript(&self, video_id: &str) -> Result<Option<Transcript>> {
    Ok(self.transcripts.get(video_id).map(|t| t.clone()))
  }

  async fn commit_summary(&self, summary: Summary) -> Result<()> {
    if self.transcripts.get(&summary.video_id).is_none() {
      return Err(PipelineError::terminal(format!(
        "cannot commit summary: no transcript for {}",
        summary.video_id
      )));
    }
    self.summaries.insert(summary.video_id.clone(), summary);
    Ok(())
  }

  async fn get_summary(&self, video_id: &str) -> Result<Option<Summary>> {
    Ok(self.summaries.get(video_id).map(|s| s.clone()))
  }

  async fn record_index_record(&self, record: IndexRecord) -> Result<()> {
    let key = format!("{}:{}", record.video_id, record.chunk_id);
    self.index_records.insert(key, record);
    Ok(())
  }

  async fn query_index_records(&self, video_id: &str) -> Result<Vec<IndexRecord>> {
    let mut out: Vec<IndexRecord> = self
      .index_records
      .iter()
      .filter(|e| e.value().video_id == video_id)
      .map(|e| e.value().clone())
      .collect();
    out.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::VideoSource;
  use chrono::Utc;

  fn sample_video(id: &str) -> Video {
    Video {
      video_id: id.to_string(),
      channel_id: "chan1".to_string(),
      title: "title".to_string(),
      published_at: Utc::now(),
      duration_sec: 100,
      source: VideoSource::ChannelScrape,
      status: VideoStatus::Discovered,
      retry_count: 0,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn upsert_then_transition_forward() {
    let store = InMemoryMetadataStore::new();
    store.upsert_video(sample_video("v1")).await.unwrap();
    let updated = store
      .transition("v1", VideoStatus::Discovered, VideoStatus::TranscriptionQueued)
      .await
      .unwrap();
    assert_eq!(updated.status, VideoStatus::TranscriptionQueued);
  }

  #[tokio::test]
  async fn transition_rejects_wrong_from_state() {
    let store = InMemoryMetadataStore::new();
    store.upsert_video(sample_video("v1")).await.unwrap();
    let err = store
      .transition("v1", VideoStatus::Transcribed, VideoStatus::Summarized)
      .await
      .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
  }

  #[tokio::test]
  async fn transition_to_failed_bypasses_the_from_state_check() {
    let store = InMemoryMetadataStore::new();
    store.upsert_video(sample_video("v1")).await.unwrap();
    store
      .transition("v1", VideoStatus::Discovered, VideoStatus::TranscriptionQueued)
      .await
      .unwrap();
    // Caller passes a stale from_state (Discovered); real status is
    // TranscriptionQueued. The Failed transition must still succeed.
    let video = store
      .transition("v1", VideoStatus::Discovered, VideoStatus::Failed)
      .await
      .unwrap();
    assert_eq!(video.status, VideoStatus::Failed);
  }

  #[tokio::test]
  async fn transition_to_failed_still_respects_terminal_states() {
    let store = InMemoryMetadataStore::new();
    let mut video = sample_video("v1");
    video.status = VideoStatus::Indexed;
    store.upsert_video(video).await.unwrap();
    let err = store
      .transition("v1", VideoStatus::Discovered, VideoStatus::Failed)
      .await
      .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
  }

  #[tokio::test]
  async fn increment_retry_count_bumps_persisted_counter() {
    let store = InMemoryMetadataStore::new();
    store.upsert_video(sample_video("v1")).await.unwrap();
    assert_eq!(store.increment_retry_count("v1").await.unwrap(), 1);
    assert_eq!(store.increment_retry_count("v1").await.unwrap(), 2);
    let video = store.get("v1").await.unwrap().unwrap();
    assert_eq!(video.retry_count, 2);
  }

  #[tokio::test]
  async fn repeated_discovery_never_downgrades_status() {
    let store = InMemoryMetadataStore::new();
    store.upsert_video(sample_video("v1")).await.unwrap();
    store
      .transition("v1", VideoStatus::Discovered, VideoStatus::TranscriptionQueued)
      .await
      .unwrap();
    // Re-discovering the same id (e.g. scrape finds it again) must not reset status.
    store.upsert_video(sample_video("v1")).await.unwrap();
    let video = store.get("v1").await.unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::TranscriptionQueued);
  }

  #[tokio::test]
  async fn summary_requires_transcript() {
    let store = InMemoryMetadataStore::new();
    store.upsert_video(sample_video("v1")).await.unwrap();
    let summary = Summary {
      video_id: "v1".to_string(),
      bullets: vec![],
      concepts: Default::default(),
      prompt_id: "p1".to_string(),
      token_usage: Default::default(),
      artifact_refs: Default::default(),
      created_at: Utc::now(),
    };
    let err = store.commit_summary(summary).await.unwrap_err();
    assert!(matches!(err, PipelineError::Classified { .. }));
  }

  #[tokio::test]
  async fn same_content_digest_transcript_is_not_rewritten() {
    let store = InMemoryMetadataStore::new();
    store.upsert_video(sample_video("v1")).await.unwrap();
    let transcript = Transcript {
      video_id: "v1".to_string(),
      artifact_refs: Default::default(),
      content_digest: "abc".to_string(),
      cost_usd: 0.1,
      language: "en".to_string(),
      duration_sec: 100,
      created_at: Utc::now(),
    };
    store.commit_transcript(transcript.clone()).await.unwrap();
    let mut second = transcript.clone();
    second.cost_usd = 999.0;
    store.commit_transcript(second).await.unwrap();
    let stored = store.get_transcript("v1").await.unwrap().unwrap();
    assert_eq!(stored.cost_usd, 0.1);
  }
}
