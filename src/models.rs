use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Where a video entered the pipeline: channel discovery or a manually
/// curated backfill sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoSource {
  ChannelScrape,
  SheetBackfill,
}

/// The pipeline's state machine. Transitions are enforced by `MetadataStore`;
/// any caller attempting a transition not in the allowed table gets
/// `PipelineError::InvalidTransition`. `Failed` is reachable from any
/// in-flight state and is re-entrant only via an explicit operator DLQ
/// replay, not through this state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
  Discovered,
  TranscriptionQueued,
  Transcribed,
  Summarized,
  Indexed,
  Failed,
}

impl VideoStatus {
  pub fn can_transition_to(&self, next: VideoStatus) -> bool {
    use VideoStatus::*;
    match (self, next) {
      (Discovered, TranscriptionQueued) => true,
      (TranscriptionQueued, Transcribed) => true,
      (Transcribed, Summarized) => true,
      (Summarized, Indexed) => true,
      (Discovered | TranscriptionQueued | Transcribed | Summarized, Failed) => true,
      _ => false,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      VideoStatus::Discovered => "discovered",
      VideoStatus::TranscriptionQueued => "transcription_queued",
      VideoStatus::Transcribed => "transcribed",
      VideoStatus::Summarized => "summarized",
      VideoStatus::Indexed => "indexed",
      VideoStatus::Failed => "failed",
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
  pub video_id: String,
  pub channel_id: String,
  pub title: String,
  pub published_at: DateTime<Utc>,
  pub duration_sec: i64,
  pub source: VideoSource,
  pub status: VideoStatus,
  pub retry_count: u32,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Opaque handles into the blob store; never the artifact bytes themselves.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArtifactRefs {
  pub transcript_txt: Option<String>,
  pub transcript_json: Option<String>,
  pub summary_md: Option<String>,
  pub summary_json: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
  pub video_id: String,
  pub artifact_refs: ArtifactRefs,
  pub content_digest: String,
  pub cost_usd: f64,
  pub language: String,
  pub duration_sec: i64,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
  pub input: u32,
  pub output: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
  pub video_id: String,
  pub bullets: Vec<String>,
  pub concepts: BTreeSet<String>,
  pub prompt_id: String,
  pub token_usage: TokenUsage,
  pub artifact_refs: ArtifactRefs,
  pub created_at: DateTime<Utc>,
}

/// One chunk as projected into the three index sinks. `chunk_id` follows
/// `<video_id>_chunk_<n>`, 1-indexed and contiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
  pub video_id: String,
  pub chunk_id: String,
  pub token_count: usize,
  pub content_sha256: String,
  pub text_preview: String,
  pub channel_id: String,
  pub published_at: DateTime<Utc>,
}

impl IndexRecord {
  pub const TEXT_PREVIEW_MAX_CHARS: usize = 256;

  pub fn make_preview(text: &str) -> String {
    if text.chars().count() <= Self::TEXT_PREVIEW_MAX_CHARS {
      text.to_string()
    } else {
      text.chars().take(Self::TEXT_PREVIEW_MAX_CHARS).collect()
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostAggregate {
  /// `YYYY-MM-DD` in the scheduler's configured timezone.
  pub day: String,
  pub transcription_usd_total: f64,
  pub transcript_count: u64,
  pub alerts_sent: BTreeSet<String>,
  pub last_updated: DateTime<Utc>,
}

impl CostAggregate {
  pub fn empty(day: impl Into<String>) -> Self {
    CostAggregate {
      day: day.into(),
      transcription_usd_total: 0.0,
      transcript_count: 0,
      alerts_sent: BTreeSet::new(),
      last_updated: Utc::now(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaCounter {
  pub service: String,
  pub day: String,
  pub used_units: f64,
  pub limit_units: f64,
  pub last_reset: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThrottleRecord {
  pub alert_type: String,
  pub last_sent: DateTime<Utc>,
  pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqSeverity {
  Low,
  Medium,
  High,
  Critical,
}

impl DlqSeverity {
  pub fn as_str(&self) -> &'static str {
    match self {
      DlqSeverity::Low => "low",
      DlqSeverity::Medium => "medium",
      DlqSeverity::High => "high",
      DlqSeverity::Critical => "critical",
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqFailure {
  pub error_type: String,
  pub message: String,
  pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
  pub job_id: String,
  pub job_type: String,
  pub video_id: String,
  pub failure: DlqFailure,
  pub original_inputs: serde_json::Value,
  pub severity: DlqSeverity,
  /// lower sorts first; derived alongside `severity` at enqueue time.
  pub recovery_priority: u32,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
  pub remaining_budget_usd: f64,
  pub remaining_quota_units: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlan {
  pub run_id: String,
  pub channels: Vec<String>,
  pub per_channel_limit: u32,
  pub window_start: DateTime<Utc>,
  pub window_end: DateTime<Utc>,
  pub resource_limits: ResourceLimits,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaState {
  pub service: String,
  pub used_units: f64,
  pub limit_units: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
  pub run_id: String,
  pub planned: u32,
  pub succeeded: u32,
  pub failed: u32,
  pub dlq_count: u32,
  pub quota_state: Vec<QuotaState>,
  pub total_cost_usd: f64,
  pub started_at: DateTime<Utc>,
  pub completed_at: DateTime<Utc>,
}

impl RunSummary {
  /// `60*success_rate + 20*(1 - dlq_rate) + 20*quota_headroom`, clamped to [0, 100].
  pub fn health_score(&self) -> f64 {
    if self.planned == 0 {
      return 100.0;
    }
    let success_rate = self.succeeded as f64 / self.planned as f64;
    let dlq_rate = self.dlq_count as f64 / self.planned as f64;
    let quota_headroom = if self.quota_state.is_empty() {
      1.0
    } else {
      let avg: f64 = self
        .quota_state
        .iter()
        .map(|q| {
          if q.limit_units <= 0.0 {
            1.0
          } else {
            (1.0 - (q.used_units / q.limit_units)).clamp(0.0, 1.0)
          }
        })
        .sum::<f64>()
        / self.quota_state.len() as f64;
      avg
    };
    (60.0 * success_rate + 20.0 * (1.0 - dlq_rate) + 20.0 * quota_headroom).clamp(0.0, 100.0)
  }
}
