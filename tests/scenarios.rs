//! End-to-end scenarios exercising the full pipeline against in-process
//! fakes: discovery through indexing, retry/backoff under a transient
//! failure, a terminal failure reaching the dead letter queue, and
//! retrieval fan-out/policy enforcement.

use async_trait::async_trait;
use chrono::Utc;
use hybrid_ingest_rust::budget_ledger::{BudgetLedger, InMemoryBudgetLedger};
use hybrid_ingest_rust::dlq::{build_entry, DeadLetterQueue, InMemoryDeadLetterQueue};
use hybrid_ingest_rust::error::{ErrorKind, PipelineError, Result};
use hybrid_ingest_rust::metadata_store::{InMemoryMetadataStore, MetadataStore};
use hybrid_ingest_rust::models::{DlqSeverity, IndexRecord, Video, VideoSource, VideoStatus};
use hybrid_ingest_rust::providers::blob_store::{BlobStore, InMemoryBlobStore};
use hybrid_ingest_rust::providers::llm::FakeLlmProvider;
use hybrid_ingest_rust::providers::sinks::{
  InMemoryKeywordSink, InMemorySemanticSink, InMemoryStructuredSink, KeywordSink, SemanticSink, SourceFilters,
  SourceHit, StructuredSink,
};
use hybrid_ingest_rust::providers::spreadsheet::FakeSpreadsheetProvider;
use hybrid_ingest_rust::providers::video_listing::FakeVideoListingProvider;
use hybrid_ingest_rust::providers::VideoListing;
use hybrid_ingest_rust::retrieval::policy::{enforce, Policy, PolicyMode};
use hybrid_ingest_rust::retrieval::{retrieve, RetrievalFilters, RetrievalSources};
use hybrid_ingest_rust::scheduler::policy::{backoff_duration, evaluate, Decision, JobContext};
use hybrid_ingest_rust::workers::{index, scrape, summarize, transcribe, WorkerStatus};

fn amsterdam() -> chrono_tz::Tz {
  "Europe/Amsterdam".parse().unwrap()
}

/// S1 — happy path: discovery through indexing for a single well-formed
/// video, with the recorded transcription cost reflected in the daily
/// budget aggregate.
#[tokio::test]
async fn s1_happy_path_runs_to_indexed() {
  let store = InMemoryMetadataStore::new();
  let ledger = InMemoryBudgetLedger::new(amsterdam(), 5.0);
  let listing = FakeVideoListingProvider::new();
  let spreadsheet = FakeSpreadsheetProvider::new();
  let speech_to_text = hybrid_ingest_rust::providers::speech_to_text::FakeSpeechToTextProvider::new();
  let llm = FakeLlmProvider::new();
  let blobs = InMemoryBlobStore::new();
  let semantic = InMemorySemanticSink::default();
  let keyword = InMemoryKeywordSink::default();
  let structured = InMemoryStructuredSink::default();

  let published_at = "2025-01-15T10:00:00Z".parse().unwrap();
  listing.seed(
    "UCa",
    vec![VideoListing {
      video_id: "vidA".to_string(),
      title: "A video".to_string(),
      published_at,
      duration_sec: 300,
      channel_id: "UCa".to_string(),
    }],
  );

  scrape::execute(
    scrape::ScrapeInput {
      channel_id: "UCa",
      since: published_at - chrono::Duration::days(1),
      limit: 10,
      max_video_duration_sec: 4_200,
    },
    &store,
    &listing,
    &spreadsheet,
  )
  .await
  .unwrap();

  let transcribe_outcome = transcribe::execute(
    transcribe::TranscribeInput {
      video_id: "vidA",
      media_url: "https://youtube.com/watch?v=vidA",
      duration_sec: 300,
    },
    &store,
    &ledger,
    &speech_to_text,
    &blobs,
  )
  .await
  .unwrap();
  assert_eq!(transcribe_outcome.status, WorkerStatus::Success);
  assert!((transcribe_outcome.cost_usd - 0.054).abs() < 0.001);

  let transcript = store.get_transcript("vidA").await.unwrap().unwrap();
  let txt_key = transcript.artifact_refs.transcript_txt.clone().unwrap();
  let transcript_text = String::from_utf8(blobs.get(&txt_key).await.unwrap()).unwrap();

  let summarize_outcome = summarize::execute(
    summarize::SummarizeInput {
      video_id: "vidA",
      model: "gpt-4o-mini",
      prompt_id: "default",
      max_tokens_per_chunk: 1_000,
      overlap_tokens: 100,
      transcript_text: &transcript_text,
    },
    &store,
    &llm,
  )
  .await
  .unwrap();
  assert!(summarize_outcome.outputs.bullet_count >= 1);
  assert!(summarize_outcome.outputs.concept_count >= 1);

  let summary = store.get_summary("vidA").await.unwrap().unwrap();
  assert!(!summary.bullets.is_empty());
  assert!(!summary.concepts.is_empty());

  let index_outcome = index::execute(
    index::IndexInput {
      video_id: "vidA",
      channel_id: "UCa",
      title: "A video",
      published_at,
      transcript_text: &transcript_text,
      embedding_model: "text-embedding-3-small",
      max_tokens_per_chunk: 1_000,
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
  assert_eq!(index_outcome.status, WorkerStatus::Success);

  let video = store.get("vidA").await.unwrap().unwrap();
  assert_eq!(video.status, VideoStatus::Indexed);

  let structured_rows = structured.existing_chunk_ids("vidA").await.unwrap();
  assert!(!structured_rows.is_empty());

  let day = Utc::now()
    .with_timezone(&amsterdam())
    .format("%Y-%m-%d")
    .to_string();
  let aggregate = ledger.aggregate(&day).await.unwrap();
  assert!((aggregate.transcription_usd_total - transcribe_outcome.cost_usd).abs() < 1e-9);
}

/// S2 — an oversized video is skipped at scrape time: no Video record
/// persists, and no cost or DLQ entry results.
#[tokio::test]
async fn s2_oversized_video_is_skipped_without_a_trace() {
  let store = InMemoryMetadataStore::new();
  let listing = FakeVideoListingProvider::new();
  let spreadsheet = FakeSpreadsheetProvider::new();
  let now = Utc::now();
  listing.seed(
    "UCb",
    vec![VideoListing {
      video_id: "vidB".to_string(),
      title: "too long".to_string(),
      published_at: now,
      duration_sec: 5_000,
      channel_id: "UCb".to_string(),
    }],
  );

  let outcome = scrape::execute(
    scrape::ScrapeInput {
      channel_id: "UCb",
      since: now - chrono::Duration::days(1),
      limit: 10,
      max_video_duration_sec: 4_200,
    },
    &store,
    &listing,
    &spreadsheet,
  )
  .await
  .unwrap();

  assert_eq!(outcome.status, WorkerStatus::Success);
  assert_eq!(outcome.outputs.videos_skipped_duration, 1);
  assert_eq!(outcome.outputs.videos_discovered, 0);
  assert!(store.get("vidB").await.unwrap().is_none());
  assert_eq!(outcome.cost_usd, 0.0);
}

/// S3 — a transient (rate-limit-shaped) failure retries with the expected
/// capped-exponential backoff before eventually succeeding; no DLQ entry
/// results and exactly one Transcript ends up committed.
#[tokio::test]
async fn s3_transient_failure_retries_then_succeeds() {
  // The policy/backoff math is independent of any one provider call, so it
  // is exercised directly against two simulated 429s before the worker is
  // run a third time against an unseeded (successful) job.
  let first_attempt = JobContext {
    error_kind: Some(ErrorKind::Transient),
    retry_count: 0,
    max_retries: 3,
    budget_remaining_usd: None,
    estimated_cost_usd: 0.0,
    reset_in: None,
  };
  let Decision::Retry(delay) = evaluate(&first_attempt) else {
    panic!("expected a retry decision");
  };
  assert!(delay.as_secs_f64() >= 54.0 && delay.as_secs_f64() <= 66.0);

  let second_attempt = JobContext {
    retry_count: 1,
    ..first_attempt.clone()
  };
  let Decision::Retry(delay) = evaluate(&second_attempt) else {
    panic!("expected a retry decision");
  };
  assert!(delay.as_secs_f64() >= 108.0 && delay.as_secs_f64() <= 132.0);
  assert!(delay > backoff_duration(0));

  let store = InMemoryMetadataStore::new();
  let now = Utc::now();
  store
    .upsert_video(Video {
      video_id: "vidC".to_string(),
      channel_id: "UCc".to_string(),
      title: "t".to_string(),
      published_at: now,
      duration_sec: 120,
      source: VideoSource::ChannelScrape,
      status: VideoStatus::Discovered,
      retry_count: 2,
      created_at: now,
      updated_at: now,
    })
    .await
    .unwrap();

  let ledger = InMemoryBudgetLedger::new(amsterdam(), 5.0);
  let provider = hybrid_ingest_rust::providers::speech_to_text::FakeSpeechToTextProvider::new();
  let blobs = InMemoryBlobStore::new();

  let outcome = transcribe::execute(
    transcribe::TranscribeInput {
      video_id: "vidC",
      media_url: "https://youtube.com/watch?v=vidC",
      duration_sec: 120,
    },
    &store,
    &ledger,
    &provider,
    &blobs,
  )
  .await
  .unwrap();
  assert_eq!(outcome.status, WorkerStatus::Success);

  let video = store.get("vidC").await.unwrap().unwrap();
  assert!(video.retry_count <= 2);

  let dlq = InMemoryDeadLetterQueue::new();
  let entries = dlq
    .query(hybrid_ingest_rust::dlq::DlqQuery {
      video_id: Some("vidC".to_string()),
      limit: 10,
      ..Default::default()
    })
    .await
    .unwrap();
  assert!(entries.is_empty());
}

/// S4 — a terminal provider failure transitions the video to `failed` and
/// produces exactly one DLQ entry; no Transcript commits and no cost is
/// recorded. Severity here follows this crate's coarse `ErrorKind`-based
/// derivation (`derive_severity`'s explicit `"terminal"` branch), which
/// maps every terminal failure to `critical` rather than distinguishing a
/// finer-grained error code catalog the original system doesn't expose.
#[tokio::test]
async fn s4_terminal_failure_reaches_the_dead_letter_queue() {
  let store = InMemoryMetadataStore::new();
  let now = Utc::now();
  store
    .upsert_video(Video {
      video_id: "vidD".to_string(),
      channel_id: "UCd".to_string(),
      title: "t".to_string(),
      published_at: now,
      duration_sec: 120,
      source: VideoSource::ChannelScrape,
      status: VideoStatus::Discovered,
      retry_count: 0,
      created_at: now,
      updated_at: now,
    })
    .await
    .unwrap();

  let ledger = InMemoryBudgetLedger::new(amsterdam(), 5.0);
  let provider = hybrid_ingest_rust::providers::speech_to_text::FakeSpeechToTextProvider::new();
  provider.seed_error("fake-job-1", "unsupported_media");
  let blobs = InMemoryBlobStore::new();

  let error = transcribe::execute(
    transcribe::TranscribeInput {
      video_id: "vidD",
      media_url: "https://youtube.com/watch?v=vidD",
      duration_sec: 120,
    },
    &store,
    &ledger,
    &provider,
    &blobs,
  )
  .await
  .unwrap_err();
  assert_eq!(error.kind(), ErrorKind::Terminal);

  let job_ctx = JobContext {
    error_kind: Some(error.kind()),
    retry_count: 0,
    max_retries: 3,
    budget_remaining_usd: None,
    estimated_cost_usd: 0.0,
    reset_in: None,
  };
  assert_eq!(evaluate(&job_ctx), Decision::Dlq);

  store.transition("vidD", VideoStatus::TranscriptionQueued, VideoStatus::Failed).await.unwrap();
  let dlq = InMemoryDeadLetterQueue::new();
  let entry = build_entry(
    "transcribe:vidD".to_string(),
    "transcribe".to_string(),
    "vidD".to_string(),
    error.kind().as_str(),
    error.to_string(),
    0,
    3,
    true,
    serde_json::json!({"video_id": "vidD"}),
  );
  dlq.enqueue(entry).await.unwrap();

  let video = store.get("vidD").await.unwrap().unwrap();
  assert_eq!(video.status, VideoStatus::Failed);
  assert!(store.get_transcript("vidD").await.unwrap().is_none());

  let entries = dlq
    .query(hybrid_ingest_rust::dlq::DlqQuery {
      video_id: Some("vidD".to_string()),
      limit: 10,
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(entries.len(), 1);
  assert_eq!(entries[0].severity, DlqSeverity::Critical);
  assert_eq!(entries[0].failure.error_type, "terminal");
}

struct SlowKeywordSink;

#[async_trait]
impl KeywordSink for SlowKeywordSink {
  async fn ensure_index(&self) -> Result<()> {
    Ok(())
  }
  async fn upsert(&self, _record: &IndexRecord, _text: &str) -> Result<()> {
    Ok(())
  }
  async fn existing_chunk_ids(&self, _video_id: &str) -> Result<Vec<String>> {
    Ok(vec![])
  }
  async fn query(&self, _query: &str, _filters: &SourceFilters, _limit: usize) -> Result<Vec<SourceHit>> {
    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
    Ok(vec![])
  }
}

fn seed_record(video_id: &str, chunk_id: &str, text: &str) -> (IndexRecord, String) {
  (
    IndexRecord {
      video_id: video_id.to_string(),
      chunk_id: chunk_id.to_string(),
      token_count: 10,
      content_sha256: "abc".to_string(),
      text_preview: text.to_string(),
      channel_id: "UCe".to_string(),
      published_at: Utc::now(),
    },
    text.to_string(),
  )
}

/// S5 — hybrid retrieval with one source unavailable: semantic and
/// structured both return hits, keyword times out. The fused result stays
/// within `top_k` and the timeout is recorded per-source without failing
/// the whole query. The query carries both a conceptual marker ("how")
/// and a factual one (a four-digit year) so the adaptive router selects
/// all three sources via its "comprehensive" (mixed-intent) strategy.
#[tokio::test]
async fn s5_hybrid_retrieval_tolerates_one_source_timing_out() {
  let semantic = InMemorySemanticSink::default();
  for i in 0..10 {
    let (record, text) = seed_record("v1", &format!("v1_chunk_{i}"), "how to price a SaaS product well");
    semantic.upsert(&record, &text, "text-embedding-3-small").await.unwrap();
  }
  let structured = InMemoryStructuredSink::default();
  for i in 0..5 {
    let (record, _text) = seed_record("v2", &format!("v2_chunk_{i}"), "pricing");
    structured.upsert(&record, "SaaS pricing guide").await.unwrap();
  }
  let keyword = SlowKeywordSink;

  let sources = RetrievalSources {
    semantic: Some(&semantic),
    keyword: Some(&keyword),
    structured: Some(&structured),
  };

  let result = retrieve(
    "how to price SaaS in 2024",
    &RetrievalFilters::default(),
    10,
    &sources,
    hybrid_ingest_rust::config::RoutingMode::Adaptive,
    None,
    100,
    60.0,
  )
  .await;

  assert_eq!(result.routing.strategy, "comprehensive");
  assert!(result.chunks.len() <= 10);
  assert_eq!(result.errors.get("keyword").map(String::as_str), Some("timed out"));
  assert!(!result.no_sources_available);
}

/// S6 — policy redaction: a chunk containing an email address is redacted
/// rather than dropped, the audit trail records the violation, and
/// re-applying `enforce` to the already-redacted text is a no-op.
#[tokio::test]
async fn s6_policy_redaction_masks_email_and_is_idempotent() {
  let chunk = hybrid_ingest_rust::retrieval::FusedChunk {
    chunk_id: "c1".to_string(),
    video_id: "v1".to_string(),
    channel_id: "chan1".to_string(),
    published_at: Utc::now(),
    text_or_preview: "contact me at a@b.com".to_string(),
    score_fused: 1.0,
    max_source_score: 1.0,
    matched_sources: vec![],
  };
  let policy = Policy {
    allowed_channels: None,
    max_age_days: None,
    sensitive_patterns: Vec::new(),
    mode: PolicyMode::Redact,
  }
  .with_default_patterns();

  let (kept, audit) = enforce(vec![chunk], &policy);
  assert_eq!(kept.len(), 1);
  assert!(kept[0].redacted);
  assert_eq!(kept[0].chunk.text_or_preview, "contact me at [EMAIL REDACTED]");
  assert!(audit[0].violations.iter().any(|v| v.contains("EMAIL")));

  let (kept_again, _audit_again) = enforce(vec![kept[0].chunk.clone()], &policy);
  assert_eq!(kept_again[0].chunk.text_or_preview, kept[0].chunk.text_or_preview);
}
