use super::SourceTag;
use crate::providers::sinks::SourceHit;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// One chunk's final, cross-source fused view.
#[derive(Debug, Clone)]
pub struct FusedChunk {
  pub chunk_id: String,
  pub video_id: String,
  pub channel_id: String,
  pub published_at: DateTime<Utc>,
  pub text_or_preview: String,
  pub score_fused: f64,
  pub max_source_score: f64,
  pub matched_sources: Vec<SourceTag>,
}

/// Reciprocal Rank Fusion: `score_fused(chunk) = sum_s 1 / (k_rrf + rank_s(chunk))`
/// over every source the chunk appeared in, 1-indexed rank per source.
/// Ties break by max per-source score, then `chunk_id` lexicographic.
pub fn fuse(per_source: Vec<(SourceTag, Vec<SourceHit>)>, rrf_k: f64, top_k: usize) -> Vec<FusedChunk> {
  let mut accum: BTreeMap<String, FusedChunk> = BTreeMap::new();

  for (tag, hits) in per_source {
    for (idx, hit) in hits.into_iter().enumerate() {
      let rank = (idx + 1) as f64;
      let contribution = 1.0 / (rrf_k + rank);
      let entry = accum.entry(hit.chunk_id.clone()).or_insert_with(|| FusedChunk {
        chunk_id: hit.chunk_id.clone(),
        video_id: hit.video_id.clone(),
        channel_id: hit.channel_id.clone(),
        published_at: hit.published_at,
        text_or_preview: hit.text_or_preview.clone(),
        score_fused: 0.0,
        max_source_score: 0.0,
        matched_sources: Vec::new(),
      });
      entry.score_fused += contribution;
      entry.max_source_score = entry.max_source_score.max(hit.score);
      if !entry.matched_sources.contains(&tag) {
        entry.matched_sources.push(tag);
      }
    }
  }

  let mut fused: Vec<FusedChunk> = accum.into_values().collect();
  fused.sort_by(|a, b| {
    b.score_fused
      .partial_cmp(&a.score_fused)
      .unwrap_or(std::cmp::Ordering::Equal)
      .then_with(|| b.max_source_score.partial_cmp(&a.max_source_score).unwrap_or(std::cmp::Ordering::Equal))
      .then_with(|| a.chunk_id.cmp(&b.chunk_id))
  });
  fused.truncate(top_k);
  fused
}
