use super::{WorkerOutcome, WorkerStatus};
use crate::chunking::{chunk_id, content_sha256, window_by_tokens};
use crate::error::Result;
use crate::metadata_store::MetadataStore;
use crate::models::{IndexRecord, VideoStatus};
use crate::providers::sinks::{KeywordSink, SemanticSink, StructuredSink};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct IndexOutputs {
  pub video_id: String,
  pub chunks_written: usize,
  pub chunks_skipped_existing: usize,
  pub sink_errors: Vec<String>,
}

pub struct IndexInput<'a> {
  pub video_id: &'a str,
  pub channel_id: &'a str,
  pub title: &'a str,
  pub published_at: DateTime<Utc>,
  pub transcript_text: &'a str,
  pub embedding_model: &'a str,
  pub max_tokens_per_chunk: usize,
  pub overlap_tokens: usize,
  pub strict_all_sinks: bool,
}

/// Chunks the transcript once and projects each chunk into the three
/// index sinks per §4.6. Idempotent against the structured sink's
/// existing `chunk_id`s for the video. Lenient by default: the semantic
/// sink succeeding is enough to reach `indexed`; strict mode requires
/// all three.
#[allow(clippy::too_many_arguments)]
pub async fn execute(
  input: IndexInput<'_>,
  store: &dyn MetadataStore,
  semantic: &dyn SemanticSink,
  keyword: &dyn KeywordSink,
  structured: &dyn StructuredSink,
) -> Result<WorkerOutcome<IndexOutputs>> {
  keyword.ensure_index().await?;

  let existing: HashSet<String> = structured
    .existing_chunk_ids(input.video_id)
    .await?
    .into_iter()
    .collect();

  let chunks = window_by_tokens(input.transcript_text, input.max_tokens_per_chunk, input.overlap_tokens);
  let mut outputs = IndexOutputs {
    video_id: input.video_id.to_string(),
    ..Default::default()
  };

  let mut semantic_ok = true;
  let mut keyword_ok = true;
  let mut structured_ok = true;

  for chunk in &chunks {
    let id = chunk_id(input.video_id, chunk.index);
    if existing.contains(&id) {
      outputs.chunks_skipped_existing += 1;
      continue;
    }

    let record = IndexRecord {
      video_id: input.video_id.to_string(),
      chunk_id: id,
      token_count: chunk.token_count,
      content_sha256: content_sha256(&chunk.text),
      text_preview: IndexRecord::make_preview(&chunk.text),
      channel_id: input.channel_id.to_string(),
      published_at: input.published_at,
    };

    if let Err(e) = semantic.upsert(&record, &chunk.text, input.embedding_model).await {
      semantic_ok = false;
      outputs.sink_errors.push(format!("semantic: {e}"));
    }
    if let Err(e) = keyword.upsert(&record, &chunk.text).await {
      keyword_ok = false;
      outputs.sink_errors.push(format!("keyword: {e}"));
    }
    if let Err(e) = structured.upsert(&record, input.title).await {
      structured_ok = false;
      outputs.sink_errors.push(format!("structured: {e}"));
    }
    outputs.chunks_written += 1;
  }

  let all_ok = semantic_ok && keyword_ok && structured_ok;
  let reachable = if input.strict_all_sinks { all_ok } else { semantic_ok };

  if reachable {
    store
      .transition(input.video_id, VideoStatus::Summarized, VideoStatus::Indexed)
      .await?;
  }

  let status = if all_ok {
    WorkerStatus::Success
  } else if reachable {
    WorkerStatus::Partial
  } else {
    WorkerStatus::Failed
  };

  let outcome = match status {
    WorkerStatus::Success => WorkerOutcome::success(outputs, 0.0),
    WorkerStatus::Partial => WorkerOutcome::partial(outputs, 0.0, Duration::from_secs(60)),
    WorkerStatus::Failed => WorkerOutcome {
      status,
      outputs,
      cost_usd: 0.0,
      retry_hint: Some(Duration::from_secs(60)),
    },
  };

  Ok(outcome)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::metadata_store::InMemoryMetadataStore;
  use crate::models::{Summary, TokenUsage, Video, VideoSource};
  use crate::providers::sinks::{InMemoryKeywordSink, InMemorySemanticSink, InMemoryStructuredSink};
  use async_trait::async_trait;
  use std::collections::BTreeSet;

  async fn store_ready_for_index(video_id: &str) -> InMemoryMetadataStore {
    let store = InMemoryMetadataStore::new();
    let now = Utc::now();
    store
      .upsert_video(Video {
        video_id: video_id.to_string(),
        channel_id: "chan1".to_string(),
        title: "My Video".to_string(),
        published_at: now,
        duration_sec: 100,
        source: VideoSource::ChannelScrape,
        status: VideoStatus::Summarized,
        retry_count: 0,
        created_at: now,
        updated_at: now,
      })
      .await
      .unwrap();
    store
      .commit_summary(Summary {
        video_id: video_id.to_string(),
        bullets: vec!["bullet".to_string()],
        concepts: BTreeSet::new(),
        prompt_id: "p1".to_string(),
        token_usage: TokenUsage::default(),
        artifact_refs: Default::default(),
        created_at: now,
      })
      .await
      .unwrap();
    store
  }

  #[tokio::test]
  async fn indexes_chunks_into_all_sinks_and_advances_status() {
    let store = store_ready_for_index("v1").await;
    let semantic = InMemorySemanticSink::default();
    let keyword = InMemoryKeywordSink::default();
    let structured = InMemoryStructuredSink::default();

    let outcome = execute(
      IndexInput {
        video_id: "v1",
        channel_id: "chan1",
        title: "My Video",
        published_at: Utc::now(),
        transcript_text: "hello world, this is a short transcript.",
        embedding_model: "text-embedding-3-small",
        max_tokens_per_chunk: 1000,
        overlap_tokens: 100,
        strict_all_sinks: false,
      },
      &store,
      &semantic,
      &keyword,
      &structured,
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, WorkerStatus::Success);
    assert_eq!(outcome.outputs.chunks_written, 1);
    let video = store.get("v1").await.unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Indexed);
    assert_eq!(semantic.existing_chunk_ids("v1").await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn reruns_skip_already_present_chunks() {
    let store = store_ready_for_index("v1").await;
    let semantic = InMemorySemanticSink::default();
    let keyword = InMemoryKeywordSink::default();
    let structured = InMemoryStructuredSink::default();

    let input = || IndexInput {
      video_id: "v1",
      channel_id: "chan1",
      title: "My Video",
      published_at: Utc::now(),
      transcript_text: "hello world, this is a short transcript.",
      embedding_model: "text-embedding-3-small",
      max_tokens_per_chunk: 1000,
      overlap_tokens: 100,
      strict_all_sinks: false,
    };

    execute(input(), &store, &semantic, &keyword, &structured).await.unwrap();
    // second run must be idempotent against the structured sink's existing chunk ids
    let outcome = execute(input(), &store, &semantic, &keyword, &structured)
      .await
      .unwrap();
    assert_eq!(outcome.outputs.chunks_written, 0);
    assert_eq!(outcome.outputs.chunks_skipped_existing, 1);
  }

  struct FailingKeywordSink;

  #[async_trait]
  impl KeywordSink for FailingKeywordSink {
    async fn ensure_index(&self) -> Result<()> {
      Ok(())
    }
    async fn upsert(&self, _record: &IndexRecord, _text: &str) -> Result<()> {
      Err(crate::error::PipelineError::transient("keyword sink down"))
    }
    async fn existing_chunk_ids(&self, _video_id: &str) -> Result<Vec<String>> {
      Ok(vec![])
    }
  }

  #[tokio::test]
  async fn lenient_mode_advances_on_semantic_success_alone() {
    let store = store_ready_for_index("v1").await;
    let semantic = InMemorySemanticSink::default();
    let keyword = FailingKeywordSink;
    let structured = InMemoryStructuredSink::default();

    let outcome = execute(
      IndexInput {
        video_id: "v1",
        channel_id: "chan1",
        title: "My Video",
        published_at: Utc::now(),
        transcript_text: "hello world, this is a short transcript.",
        embedding_model: "text-embedding-3-small",
        max_tokens_per_chunk: 1000,
        overlap_tokens: 100,
        strict_all_sinks: false,
      },
      &store,
      &semantic,
      &keyword,
      &structured,
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, WorkerStatus::Partial);
    let video = store.get("v1").await.unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Indexed);
  }

  #[tokio::test]
  async fn strict_mode_withholds_indexed_on_partial_sink_failure() {
    let store = store_ready_for_index("v1").await;
    let semantic = InMemorySemanticSink::default();
    let keyword = FailingKeywordSink;
    let structured = InMemoryStructuredSink::default();

    let outcome = execute(
      IndexInput {
        video_id: "v1",
        channel_id: "chan1",
        title: "My Video",
        published_at: Utc::now(),
        transcript_text: "hello world, this is a short transcript.",
        embedding_model: "text-embedding-3-small",
        max_tokens_per_chunk: 1000,
        overlap_tokens: 100,
        strict_all_sinks: true,
      },
      &store,
      &semantic,
      &keyword,
      &structured,
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, WorkerStatus::Failed);
    let video = store.get("v1").await.unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Summarized);
  }
}
