use super::{WorkerOutcome, WorkerStatus};
use crate::chunking::window_by_tokens;
use crate::error::{PipelineError, Result};
use crate::metadata_store::MetadataStore;
use crate::models::{ArtifactRefs, Summary, TokenUsage, VideoStatus};
use crate::providers::llm::LlmProvider;
use chrono::Utc;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct SummarizeOutputs {
  pub video_id: String,
  pub bullet_count: usize,
  pub concept_count: usize,
}

pub struct SummarizeInput<'a> {
  pub video_id: &'a str,
  pub model: &'a str,
  pub prompt_id: &'a str,
  pub max_tokens_per_chunk: usize,
  pub overlap_tokens: usize,
  /// Decoded transcript text, already resolved by the caller from the
  /// committed transcript's blob-store artifact.
  pub transcript_text: &'a str,
}

/// Adaptively chunks the committed transcript, summarizes each chunk
/// through the LLM collaborator, deduplicates concepts case-insensitively,
/// and commits the aggregated `Summary`. Requires a `Transcript` to
/// already exist for the video, per §3's invariant.
pub async fn execute(
  input: SummarizeInput<'_>,
  store: &dyn MetadataStore,
  llm: &dyn LlmProvider,
) -> Result<WorkerOutcome<SummarizeOutputs>> {
  if store.get_transcript(input.video_id).await?.is_none() {
    return Err(PipelineError::terminal(format!(
      "no transcript for {}",
      input.video_id
    )));
  }

  let chunks = window_by_tokens(
    input.transcript_text,
    input.max_tokens_per_chunk,
    input.overlap_tokens,
  );
  let mut bullets = Vec::new();
  let mut concepts: BTreeSet<String> = BTreeSet::new();
  let mut total_prompt_tokens = 0u32;
  let mut total_completion_tokens = 0u32;
  let mut total_cost_usd = 0.0;

  for chunk in &chunks {
    let result = llm.summarize_chunk(input.model, &chunk.text).await?;
    bullets.extend(result.bullets);
    for concept in result.concepts {
      concepts.insert(concept.to_lowercase());
    }
    total_prompt_tokens += result.prompt_tokens;
    total_completion_tokens += result.completion_tokens;
    total_cost_usd += result.cost_usd;
  }

  let summary = Summary {
    video_id: input.video_id.to_string(),
    bullets: bullets.clone(),
    concepts: concepts.clone(),
    prompt_id: input.prompt_id.to_string(),
    token_usage: TokenUsage {
      input: total_prompt_tokens,
      output: total_completion_tokens,
    },
    artifact_refs: ArtifactRefs::default(),
    created_at: Utc::now(),
  };
  store.commit_summary(summary).await?;
  store
    .transition(input.video_id, VideoStatus::Transcribed, VideoStatus::Summarized)
    .await?;

  Ok(WorkerOutcome::success(
    SummarizeOutputs {
      video_id: input.video_id.to_string(),
      bullet_count: bullets.len(),
      concept_count: concepts.len(),
    },
    total_cost_usd,
  ))
}
