use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use hybrid_ingest_rust::alert_sink::{AlertSink, InMemoryAlertSink};
use hybrid_ingest_rust::budget_ledger::{BudgetLedger, CheckOutcome, InMemoryBudgetLedger};
use hybrid_ingest_rust::config::Config;
use hybrid_ingest_rust::db;
use hybrid_ingest_rust::dlq::{build_entry, DeadLetterQueue, InMemoryDeadLetterQueue};
use hybrid_ingest_rust::error::{PipelineError, Result as PipelineResult};
use hybrid_ingest_rust::metadata_store::{InMemoryMetadataStore, MetadataStore};
use hybrid_ingest_rust::models::{Video, VideoStatus};
use hybrid_ingest_rust::observability::{emit_run_started, emit_run_summary, RunRecorder};
use hybrid_ingest_rust::providers::blob_store::{BlobStore, FilesystemBlobStore};
use hybrid_ingest_rust::providers::llm::{FakeLlmProvider, LlmProvider, OpenAiLlmProvider};
use hybrid_ingest_rust::providers::sinks::{
  InMemoryKeywordSink, InMemorySemanticSink, InMemoryStructuredSink, KeywordSink, SemanticSink, StructuredSink,
};
use hybrid_ingest_rust::providers::speech_to_text::{
  FakeSpeechToTextProvider, HttpSpeechToTextProvider, SpeechToTextProvider,
};
use hybrid_ingest_rust::providers::spreadsheet::{FakeSpreadsheetProvider, GoogleSheetsSpreadsheetProvider};
use hybrid_ingest_rust::providers::video_listing::{FakeVideoListingProvider, YoutubeVideoListingProvider};
use hybrid_ingest_rust::providers::youtube::{refresh_tokens, youtube_oauth_client_from_env};
use hybrid_ingest_rust::providers::{SpreadsheetProvider, VideoListingProvider};
use hybrid_ingest_rust::scheduler::dispatcher::{Dispatcher, Stage};
use hybrid_ingest_rust::scheduler::planner::{plan_run, InMemoryRunPlanStore, RunPlanStore};
use hybrid_ingest_rust::scheduler::policy::{evaluate, Decision, JobContext};
use hybrid_ingest_rust::scheduler::CancellationSignal;
use hybrid_ingest_rust::workers::{index, scrape, summarize, transcribe, WorkerStatus};
use tokio::time::Duration;

const MAX_ITEMS_PER_STAGE: usize = 25;
const MAX_RETRIES: u32 = 3;

fn bearer_token(header_value: Option<&str>) -> Option<&str> {
  let value = header_value?;
  value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Result<Response<ResponseBody>, Error> {
  Ok(
    Response::builder()
      .status(status)
      .header("content-type", "application/json; charset=utf-8")
      .body(ResponseBody::from(value))?,
  )
}

#[derive(Deserialize, Default)]
struct TickRequest {
  #[serde(default)]
  channels: Vec<String>,
}

fn channels_from_env() -> Vec<String> {
  std::env::var("SCHEDULER_CHANNELS")
    .ok()
    .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
    .unwrap_or_default()
}

/// Resolves a YouTube access token from a configured refresh token. Absent
/// `YOUTUBE_REFRESH_TOKEN` (or a refresh failure), the caller falls back to
/// the fake listing provider rather than failing the whole tick.
async fn youtube_access_token() -> Option<String> {
  let refresh_token = std::env::var("YOUTUBE_REFRESH_TOKEN").ok().filter(|v| !v.is_empty())?;
  let (client, _redirect) = youtube_oauth_client_from_env().ok()?;
  refresh_tokens(&client, &refresh_token).await.ok().map(|t| t.access_token)
}

/// Everything a single tick needs, resolved once from `Config` and the
/// process environment: real adapters where credentials are configured,
/// the shared in-process fakes otherwise. This mirrors the rest of the
/// crate's one-real-one-fake rule for every port, applied at the
/// composition root instead of in each worker.
struct TickContext {
  store: Box<dyn MetadataStore>,
  budget_ledger: Box<dyn BudgetLedger>,
  dlq: Box<dyn DeadLetterQueue>,
  alert_sink: Box<dyn AlertSink>,
  listing: Box<dyn VideoListingProvider>,
  spreadsheet: Box<dyn SpreadsheetProvider>,
  speech_to_text: Box<dyn SpeechToTextProvider>,
  llm: Box<dyn LlmProvider>,
  blobs: Box<dyn BlobStore>,
  semantic: Box<dyn SemanticSink>,
  keyword: Box<dyn KeywordSink>,
  structured: Box<dyn StructuredSink>,
  plan_store: Box<dyn RunPlanStore>,
}

async fn build_context(config: &Config) -> Result<TickContext, Error> {
  let timezone: chrono_tz::Tz = config.scheduler.timezone.parse().unwrap_or(chrono_tz::Europe::Amsterdam);

  let (store, budget_ledger, dlq, alert_sink, structured, semantic, keyword, plan_store): (
    Box<dyn MetadataStore>,
    Box<dyn BudgetLedger>,
    Box<dyn DeadLetterQueue>,
    Box<dyn AlertSink>,
    Box<dyn StructuredSink>,
    Box<dyn SemanticSink>,
    Box<dyn KeywordSink>,
    Box<dyn RunPlanStore>,
  ) = if let Some(database_url) = &config.database_url {
    let pool = db::get_pool(database_url).await?;
    (
      Box::new(db::SqlxMetadataStore::new(pool)),
      Box::new(db::SqlxBudgetLedger::new(pool, timezone, config.budgets.transcription_daily_usd)),
      Box::new(db::SqlxDeadLetterQueue::new(pool)),
      Box::new(db::SqlxAlertSink::new(pool)),
      Box::new(db::SqlxStructuredSink::new(pool)),
      Box::new(db::SqlxSemanticSink::new(pool)),
      Box::new(db::SqlxKeywordSink::new(pool)),
      Box::new(db::SqlxRunPlanStore::new(pool)),
    )
  } else {
    (
      Box::new(InMemoryMetadataStore::new()),
      Box::new(InMemoryBudgetLedger::new(timezone, config.budgets.transcription_daily_usd)),
      Box::new(InMemoryDeadLetterQueue::new()),
      Box::new(InMemoryAlertSink::new()),
      Box::new(InMemoryStructuredSink::default()),
      Box::new(InMemorySemanticSink::default()),
      Box::new(InMemoryKeywordSink::default()),
      Box::new(InMemoryRunPlanStore::new()),
    )
  };

  let listing: Box<dyn VideoListingProvider> = match youtube_access_token().await {
    Some(token) => Box::new(YoutubeVideoListingProvider::new(token)),
    None => Box::new(FakeVideoListingProvider::new()),
  };

  let spreadsheet: Box<dyn SpreadsheetProvider> = match GoogleSheetsSpreadsheetProvider::from_env() {
    Some(provider) => Box::new(provider),
    None => Box::new(FakeSpreadsheetProvider::new()),
  };

  let speech_to_text: Box<dyn SpeechToTextProvider> =
    match std::env::var("ASSEMBLYAI_API_KEY").ok().filter(|v| !v.is_empty()) {
      Some(api_key) => Box::new(HttpSpeechToTextProvider::new(api_key, "https://api.assemblyai.com".to_string())),
      None => Box::new(FakeSpeechToTextProvider::new()),
    };

  let llm: Box<dyn LlmProvider> = match std::env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty()) {
    Some(api_key) => Box::new(OpenAiLlmProvider::new(&api_key)),
    None => Box::new(FakeLlmProvider::new()),
  };

  let blobs: Box<dyn BlobStore> = Box::new(FilesystemBlobStore::new(
    std::env::var("BLOB_STORE_ROOT").unwrap_or_else(|_| "./blobs".to_string()),
  ));

  Ok(TickContext {
    store,
    budget_ledger,
    dlq,
    alert_sink,
    listing,
    spreadsheet,
    speech_to_text,
    llm,
    blobs,
    semantic,
    keyword,
    structured,
    plan_store,
  })
}

/// Classifies a worker failure via `evaluate()`. On `Dlq`, re-fetches the
/// video's actual current status (the caller's `video` is a pre-dispatch
/// snapshot that may be stale), archives the job, and transitions it to
/// `Failed`. On `Retry`, persists the bumped retry count so
/// `retry_count >= max_retries` is reachable across ticks.
async fn handle_worker_failure(
  ctx: &TickContext,
  recorder: &mut RunRecorder,
  job_type: &str,
  video: &Video,
  error: &PipelineError,
  is_paid_api: bool,
) -> PipelineResult<()> {
  let reset_in = if error.kind() == hybrid_ingest_rust::error::ErrorKind::QuotaExceeded {
    ctx
      .budget_ledger
      .check("youtube", 0.0)
      .await
      .ok()
      .map(|check| Duration::from_secs_f64((check.reset_in_hours * 3600.0).max(0.0)))
  } else {
    None
  };

  let job_ctx = JobContext {
    error_kind: Some(error.kind()),
    retry_count: video.retry_count,
    max_retries: MAX_RETRIES,
    budget_remaining_usd: None,
    estimated_cost_usd: 0.0,
    reset_in,
  };

  match evaluate(&job_ctx) {
    Decision::Dlq => {
      // `video` is the pre-dispatch snapshot; re-fetch so the transition's
      // from_state reflects what the store actually has right now.
      let current_status = ctx
        .store
        .get(&video.video_id)
        .await?
        .map(|v| v.status)
        .unwrap_or(video.status);
      if let Err(e) = ctx.store.transition(&video.video_id, current_status, VideoStatus::Failed).await {
        tracing::warn!(video_id = %video.video_id, error = %e, "failed to mark video failed after dlq");
      }
      let entry = build_entry(
        format!("{job_type}:{}", video.video_id),
        job_type.to_string(),
        video.video_id.clone(),
        error.kind().as_str(),
        error.to_string(),
        video.retry_count,
        MAX_RETRIES,
        is_paid_api,
        serde_json::json!({ "video_id": video.video_id, "stage": job_type }),
      );
      ctx.dlq.enqueue(entry).await?;
      recorder.record_dlq();
      recorder.record_failure(0.0);
    }
    Decision::Retry(_) => {
      if let Err(e) = ctx.store.increment_retry_count(&video.video_id).await {
        tracing::warn!(video_id = %video.video_id, error = %e, "failed to persist retry count");
      }
      recorder.record_failure(0.0);
    }
    Decision::Reject => {
      recorder.record_failure(0.0);
    }
    Decision::Proceed => {}
  }
  Ok(())
}

async fn run_scrape_stage(
  ctx: &TickContext,
  dispatcher: &Dispatcher,
  recorder: &mut RunRecorder,
  config: &Config,
  channels: &[String],
) {
  for channel_id in channels {
    let since = chrono::Utc::now() - chrono::Duration::days(1);
    let limit = config.scheduler.daily_limit_per_channel as usize;
    let max_video_duration_sec = config.idempotency.max_video_duration_sec;

    let outcome = dispatcher
      .dispatch(Stage::Scrape, channel_id, || async {
        scrape::execute(
          scrape::ScrapeInput {
            channel_id,
            since,
            limit,
            max_video_duration_sec,
          },
          ctx.store.as_ref(),
          ctx.listing.as_ref(),
          ctx.spreadsheet.as_ref(),
        )
        .await
      })
      .await;

    match outcome {
      Ok(Some(result)) => match result.status {
        WorkerStatus::Failed => recorder.record_failure(0.0),
        _ => recorder.record_success(0.0),
      },
      Ok(None) => {}
      Err(e) => {
        tracing::warn!(channel_id = %channel_id, error = %e, "scrape stage failed outright");
        recorder.record_failure(0.0);
      }
    }
  }
}

async fn run_transcribe_stage(ctx: &TickContext, dispatcher: &Dispatcher, recorder: &mut RunRecorder) {
  let Ok(videos) = ctx.store.query_by_status(VideoStatus::Discovered, MAX_ITEMS_PER_STAGE).await else {
    return;
  };

  for video in videos {
    if let Ok(check) = ctx.budget_ledger.check("transcription", 0.0).await {
      if check.outcome == CheckOutcome::Deny {
        recorder.record_failure(0.0);
        continue;
      }
    }

    let media_url = format!("https://youtube.com/watch?v={}", video.video_id);
    let video_id = video.video_id.clone();
    let duration_sec = video.duration_sec;
    let outcome = dispatcher
      .dispatch(Stage::Transcribe, &video_id, || async {
        transcribe::execute(
          transcribe::TranscribeInput {
            video_id: &video_id,
            media_url: &media_url,
            duration_sec,
          },
          ctx.store.as_ref(),
          ctx.budget_ledger.as_ref(),
          ctx.speech_to_text.as_ref(),
          ctx.blobs.as_ref(),
        )
        .await
      })
      .await;

    match outcome {
      Ok(Some(result)) => match result.status {
        WorkerStatus::Failed => recorder.record_failure(result.cost_usd),
        _ => recorder.record_success(result.cost_usd),
      },
      Ok(None) => {}
      Err(e) => {
        handle_worker_failure(ctx, recorder, "transcribe", &video, &e, true).await.ok();
      }
    }
  }
}

async fn run_summarize_stage(ctx: &TickContext, dispatcher: &Dispatcher, recorder: &mut RunRecorder, config: &Config) {
  let Ok(videos) = ctx.store.query_by_status(VideoStatus::Transcribed, MAX_ITEMS_PER_STAGE).await else {
    return;
  };

  for video in videos {
    let Ok(Some(transcript)) = ctx.store.get_transcript(&video.video_id).await else {
      continue;
    };
    let Some(txt_key) = &transcript.artifact_refs.transcript_txt else {
      continue;
    };
    let Ok(bytes) = ctx.blobs.get(txt_key).await else {
      continue;
    };
    let Ok(transcript_text) = String::from_utf8(bytes) else {
      continue;
    };

    let video_id = video.video_id.clone();
    let max_tokens_per_chunk = config.chunking.max_tokens_per_chunk;
    let overlap_tokens = config.chunking.overlap_tokens;
    let outcome = dispatcher
      .dispatch(Stage::Summarize, &video_id, || async {
        summarize::execute(
          summarize::SummarizeInput {
            video_id: &video_id,
            model: "gpt-4o-mini",
            prompt_id: "default",
            max_tokens_per_chunk,
            overlap_tokens,
            transcript_text: &transcript_text,
          },
          ctx.store.as_ref(),
          ctx.llm.as_ref(),
        )
        .await
      })
      .await;

    match outcome {
      Ok(Some(result)) => match result.status {
        WorkerStatus::Failed => recorder.record_failure(result.cost_usd),
        _ => recorder.record_success(result.cost_usd),
      },
      Ok(None) => {}
      Err(e) => {
        handle_worker_failure(ctx, recorder, "summarize", &video, &e, true).await.ok();
      }
    }
  }
}

async fn run_index_stage(ctx: &TickContext, dispatcher: &Dispatcher, recorder: &mut RunRecorder, config: &Config) {
  let Ok(videos) = ctx.store.query_by_status(VideoStatus::Summarized, MAX_ITEMS_PER_STAGE).await else {
    return;
  };

  for video in videos {
    let Ok(Some(transcript)) = ctx.store.get_transcript(&video.video_id).await else {
      continue;
    };
    let Some(txt_key) = &transcript.artifact_refs.transcript_txt else {
      continue;
    };
    let Ok(bytes) = ctx.blobs.get(txt_key).await else {
      continue;
    };
    let Ok(transcript_text) = String::from_utf8(bytes) else {
      continue;
    };

    let video_id = video.video_id.clone();
    let channel_id = video.channel_id.clone();
    let title = video.title.clone();
    let published_at = video.published_at;
    let max_tokens_per_chunk = config.chunking.max_tokens_per_chunk;
    let overlap_tokens = config.chunking.overlap_tokens;
    let strict_all_sinks = config.index.strict_all_sinks;
    let outcome = dispatcher
      .dispatch(Stage::Index, &video_id, || async {
        index::execute(
          index::IndexInput {
            video_id: &video_id,
            channel_id: &channel_id,
            title: &title,
            published_at,
            transcript_text: &transcript_text,
            embedding_model: "text-embedding-3-small",
            max_tokens_per_chunk,
            overlap_tokens,
            strict_all_sinks,
          },
          ctx.store.as_ref(),
          ctx.semantic.as_ref(),
          ctx.keyword.as_ref(),
          ctx.structured.as_ref(),
        )
        .await
      })
      .await;

    match outcome {
      Ok(Some(result)) => match result.status {
        WorkerStatus::Failed => recorder.record_failure(0.0),
        _ => recorder.record_success(0.0),
      },
      Ok(None) => {}
      Err(e) => {
        handle_worker_failure(ctx, recorder, "index", &video, &e, false).await.ok();
      }
    }
  }
}

/// Runs one batch of the pipeline: scrape the requested channels, then
/// drain whatever's queued at each downstream stage, in order. Each
/// invocation is idempotent and safe to re-run on the next scheduled tick
/// if cut short.
async fn handle_tick(method: &Method, headers: &HeaderMap, body: Bytes) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return json_response(
      StatusCode::METHOD_NOT_ALLOWED,
      serde_json::json!({"ok": false, "error": "method_not_allowed"}),
    );
  }

  let config = Config::from_env().map_err(|e| -> Error { Box::new(e) })?;

  let provided = bearer_token(headers.get("authorization").and_then(|v| v.to_str().ok())).unwrap_or("");
  if provided != config.internal_token {
    return json_response(
      StatusCode::UNAUTHORIZED,
      serde_json::json!({"ok": false, "error": "unauthorized"}),
    );
  }

  let parsed: TickRequest = if body.is_empty() {
    TickRequest::default()
  } else {
    serde_json::from_slice(&body)
      .map_err(|e| -> Error { Box::new(std::io::Error::other(format!("invalid json body: {e}"))) })?
  };
  let channels = if parsed.channels.is_empty() { channels_from_env() } else { parsed.channels };

  let ctx = build_context(&config).await?;
  let dispatcher = Dispatcher::new(CancellationSignal::new());

  let plan = plan_run(&config, ctx.budget_ledger.as_ref(), channels.clone())
    .await
    .map_err(|e| -> Error { Box::new(e) })?;
  ctx
    .plan_store
    .record(plan.clone())
    .await
    .map_err(|e| -> Error { Box::new(e) })?;
  emit_run_started(&plan);

  let mut recorder = RunRecorder::start(plan.run_id.clone(), 0);

  run_scrape_stage(&ctx, &dispatcher, &mut recorder, &config, &channels).await;
  run_transcribe_stage(&ctx, &dispatcher, &mut recorder).await;
  run_summarize_stage(&ctx, &dispatcher, &mut recorder, &config).await;
  run_index_stage(&ctx, &dispatcher, &mut recorder, &config).await;

  let summary = recorder.finish(vec![]);
  emit_run_summary(&summary, ctx.alert_sink.as_ref())
    .await
    .map_err(|e| -> Error { Box::new(e) })?;

  json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "run_id": summary.run_id,
      "succeeded": summary.succeeded,
      "failed": summary.failed,
      "dlq_count": summary.dlq_count,
      "total_cost_usd": summary.total_cost_usd,
      "health_score": summary.health_score(),
    }),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_tick(&method, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  run(service_fn(handler)).await
}
