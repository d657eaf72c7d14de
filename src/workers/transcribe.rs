use super::{WorkerOutcome, WorkerStatus};
use crate::budget_ledger::BudgetLedger;
use crate::chunking::content_sha256;
use crate::cost::{compute_transcription_cost_usd, DEFAULT_TRANSCRIPTION_RATE_USD_PER_HOUR};
use crate::error::{PipelineError, Result};
use crate::metadata_store::MetadataStore;
use crate::models::{ArtifactRefs, Transcript, VideoStatus};
use crate::providers::blob_store::{artifact_key, ArtifactKind, BlobStore};
use crate::providers::speech_to_text::{poll_until_done, SpeechToTextProvider};
use chrono::Utc;

#[derive(Debug, Clone, Default)]
pub struct TranscribeOutputs {
  pub video_id: String,
  pub content_digest: String,
}

pub struct TranscribeInput<'a> {
  pub video_id: &'a str,
  pub media_url: &'a str,
  pub duration_sec: i64,
}

pub async fn execute(
  input: TranscribeInput<'_>,
  store: &dyn MetadataStore,
  budget_ledger: &dyn BudgetLedger,
  provider: &dyn SpeechToTextProvider,
  blobs: &dyn BlobStore,
) -> Result<WorkerOutcome<TranscribeOutputs>> {
  store
    .transition(input.video_id, VideoStatus::Discovered, VideoStatus::TranscriptionQueued)
    .await?;

  let job_id = provider.submit(input.media_url).await?;
  let result = poll_until_done(provider, &job_id).await?;

  let digest = content_sha256(&result.transcript_text);
  let day = Utc::now().format("%Y-%m-%d").to_string();

  let txt_key = artifact_key(input.video_id, &day, ArtifactKind::TranscriptTxt);
  blobs.put(&txt_key, result.transcript_text.clone().into_bytes()).await?;

  let json_key = artifact_key(input.video_id, &day, ArtifactKind::TranscriptJson);
  let json_bytes = serde_json::to_vec(&result.transcript_json)
    .map_err(|e| PipelineError::terminal(e.to_string()))?;
  blobs.put(&json_key, json_bytes).await?;

  let cost_usd = compute_transcription_cost_usd(input.duration_sec, DEFAULT_TRANSCRIPTION_RATE_USD_PER_HOUR);

  let transcript = Transcript {
    video_id: input.video_id.to_string(),
    artifact_refs: ArtifactRefs {
      transcript_txt: Some(txt_key),
      transcript_json: Some(json_key),
      ..Default::default()
    },
    content_digest: digest.clone(),
    cost_usd,
    language: result.language,
    duration_sec: input.duration_sec,
    created_at: Utc::now(),
  };
  store.commit_transcript(transcript).await?;
  store
    .transition(input.video_id, VideoStatus::TranscriptionQueued, VideoStatus::Transcribed)
    .await?;

  budget_ledger
    .record("transcription", 0.0, cost_usd)
    .await?;

  Ok(WorkerOutcome::success(
    TranscribeOutputs {
      video_id: input.video_id.to_string(),
      content_digest: digest,
    },
    cost_usd,
  ))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::budget_ledger::InMemoryBudgetLedger;
  use crate::metadata_store::InMemoryMetadataStore;
  use crate::models::{Video, VideoSource};
  use crate::providers::blob_store::InMemoryBlobStore;
  use crate::providers::speech_to_text::FakeSpeechToTextProvider;

  async fn seeded_store(video_id: &str, duration_sec: i64) -> InMemoryMetadataStore {
    let store = InMemoryMetadataStore::new();
    let now = Utc::now();
    store
      .upsert_video(Video {
        video_id: video_id.to_string(),
        channel_id: "chan1".to_string(),
        title: "t".to_string(),
        published_at: now,
        duration_sec,
        source: VideoSource::ChannelScrape,
        status: VideoStatus::Discovered,
        retry_count: 0,
        created_at: now,
        updated_at: now,
      })
      .await
      .unwrap();
    store
  }

  #[tokio::test]
  async fn happy_path_commits_transcript_and_advances_status() {
    let store = seeded_store("v1", 100).await;
    let ledger = InMemoryBudgetLedger::new("Europe/Amsterdam".parse().unwrap(), 5.0);
    let provider = FakeSpeechToTextProvider::new();
    let blobs = InMemoryBlobStore::new();

    let outcome = execute(
      TranscribeInput {
        video_id: "v1",
        media_url: "https://youtube.com/watch?v=v1",
        duration_sec: 100,
      },
      &store,
      &ledger,
      &provider,
      &blobs,
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, WorkerStatus::Success);
    let video = store.get("v1").await.unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Transcribed);
    let transcript = store.get_transcript("v1").await.unwrap().unwrap();
    assert_eq!(transcript.content_digest, outcome.outputs.content_digest);
  }

  #[tokio::test]
  async fn provider_error_propagates_and_leaves_video_queued() {
    let store = seeded_store("v1", 100).await;
    let ledger = InMemoryBudgetLedger::new("Europe/Amsterdam".parse().unwrap(), 5.0);
    let provider = FakeSpeechToTextProvider::new();
    let blobs = InMemoryBlobStore::new();

    // The fake's first minted job id is deterministic; seed its error
    // ahead of time so submit()+poll() surfaces a terminal failure.
    provider.seed_error("fake-job-1", "unsupported media");

    let result = execute(
      TranscribeInput {
        video_id: "v1",
        media_url: "https://youtube.com/watch?v=v1",
        duration_sec: 100,
      },
      &store,
      &ledger,
      &provider,
      &blobs,
    )
    .await;

    assert!(result.is_err());
    // the worker transitioned to transcription_queued before the failure
    // and must not have silently advanced to transcribed.
    let video = store.get("v1").await.unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::TranscriptionQueued);
  }
}
