use crate::budget_ledger::{BudgetLedger, CheckOutcome, CheckResult};
use crate::dlq::{DeadLetterQueue, DlqQuery};
use crate::error::{PipelineError, Result};
use crate::metadata_store::MetadataStore;
use crate::models::{
  ArtifactRefs, CostAggregate, DlqEntry, DlqFailure, DlqSeverity, IndexRecord, ResourceLimits, RunPlan, RunSummary,
  Summary, TokenUsage, Transcript, Video, VideoSource, VideoStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use sqlx::{mysql::MySqlPoolOptions, MySqlPool, Row};
use tokio::sync::OnceCell;

static POOL: OnceCell<MySqlPool> = OnceCell::const_new();

/// Creates every table this crate persists, mirroring the in-process
/// `dashmap` stores' shape one-for-one. Idempotent: safe to call on every
/// cold start.
async fn ensure_schema(pool: &MySqlPool) -> Result<()> {
  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS videos (
        video_id VARCHAR(128) PRIMARY KEY,
        channel_id VARCHAR(128) NOT NULL,
        title VARCHAR(512) NOT NULL,
        published_at TIMESTAMP(3) NOT NULL,
        duration_sec BIGINT NOT NULL,
        source VARCHAR(32) NOT NULL,
        status VARCHAR(32) NOT NULL,
        retry_count INT NOT NULL DEFAULT 0,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        updated_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3),
        KEY idx_videos_channel_status (channel_id, status),
        KEY idx_videos_status (status)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS transcripts (
        video_id VARCHAR(128) PRIMARY KEY,
        transcript_txt_ref VARCHAR(512) NULL,
        transcript_json_ref VARCHAR(512) NULL,
        content_digest CHAR(64) NOT NULL,
        cost_usd DOUBLE NOT NULL,
        language VARCHAR(16) NOT NULL,
        duration_sec BIGINT NOT NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS summaries (
        video_id VARCHAR(128) PRIMARY KEY,
        bullets_json TEXT NOT NULL,
        concepts_json TEXT NOT NULL,
        prompt_id VARCHAR(128) NOT NULL,
        input_tokens INT NOT NULL,
        output_tokens INT NOT NULL,
        summary_md_ref VARCHAR(512) NULL,
        summary_json_ref VARCHAR(512) NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS index_records (
        video_id VARCHAR(128) NOT NULL,
        chunk_id VARCHAR(160) NOT NULL,
        token_count INT NOT NULL,
        content_sha256 CHAR(64) NOT NULL,
        text_preview VARCHAR(512) NOT NULL,
        channel_id VARCHAR(128) NOT NULL,
        published_at TIMESTAMP(3) NOT NULL,
        PRIMARY KEY (video_id, chunk_id)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS cost_aggregates (
        day_key VARCHAR(10) PRIMARY KEY,
        transcription_usd_total DOUBLE NOT NULL DEFAULT 0,
        transcript_count BIGINT NOT NULL DEFAULT 0,
        alerts_sent_json TEXT NOT NULL DEFAULT ('[]'),
        last_updated TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS quota_counters (
        service VARCHAR(64) NOT NULL,
        day_key VARCHAR(10) NOT NULL,
        used_units DOUBLE NOT NULL DEFAULT 0,
        limit_units DOUBLE NOT NULL,
        last_reset TIMESTAMP(3) NOT NULL,
        PRIMARY KEY (service, day_key)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS alert_throttle (
        alert_type VARCHAR(64) PRIMARY KEY,
        last_sent TIMESTAMP(3) NOT NULL,
        count BIGINT NOT NULL DEFAULT 0
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS dlq_entries (
        job_id VARCHAR(128) PRIMARY KEY,
        job_type VARCHAR(64) NOT NULL,
        video_id VARCHAR(128) NOT NULL,
        error_type VARCHAR(64) NOT NULL,
        message TEXT NOT NULL,
        retry_count INT NOT NULL,
        original_inputs_json TEXT NOT NULL,
        severity VARCHAR(16) NOT NULL,
        recovery_priority INT NOT NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        KEY idx_dlq_severity (severity, recovery_priority),
        KEY idx_dlq_video (video_id),
        KEY idx_dlq_job_type (job_type)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS run_plans (
        run_id VARCHAR(64) PRIMARY KEY,
        channels_json TEXT NOT NULL,
        per_channel_limit INT NOT NULL,
        window_start TIMESTAMP(3) NOT NULL,
        window_end TIMESTAMP(3) NOT NULL,
        remaining_budget_usd DOUBLE NOT NULL,
        remaining_quota_units DOUBLE NOT NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS run_summaries (
        run_id VARCHAR(64) PRIMARY KEY,
        planned INT NOT NULL,
        succeeded INT NOT NULL,
        failed INT NOT NULL,
        dlq_count INT NOT NULL,
        quota_state_json TEXT NOT NULL,
        total_cost_usd DOUBLE NOT NULL,
        started_at TIMESTAMP(3) NOT NULL,
        completed_at TIMESTAMP(3) NOT NULL
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS structured_sink_rows (
        video_id VARCHAR(128) NOT NULL,
        chunk_id VARCHAR(160) NOT NULL,
        title VARCHAR(512) NOT NULL,
        token_count INT NOT NULL,
        content_sha256 CHAR(64) NOT NULL,
        text_preview VARCHAR(512) NOT NULL,
        channel_id VARCHAR(128) NOT NULL,
        published_at TIMESTAMP(3) NOT NULL,
        PRIMARY KEY (video_id, chunk_id),
        KEY idx_structured_channel (channel_id, published_at)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS semantic_sink_rows (
        video_id VARCHAR(128) NOT NULL,
        chunk_id VARCHAR(160) NOT NULL,
        chunk_text MEDIUMTEXT NOT NULL,
        embedding_model VARCHAR(128) NOT NULL,
        token_count INT NOT NULL,
        content_sha256 CHAR(64) NOT NULL,
        text_preview VARCHAR(512) NOT NULL,
        channel_id VARCHAR(128) NOT NULL,
        published_at TIMESTAMP(3) NOT NULL,
        PRIMARY KEY (video_id, chunk_id),
        KEY idx_semantic_channel (channel_id, published_at)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS keyword_sink_rows (
        video_id VARCHAR(128) NOT NULL,
        chunk_id VARCHAR(160) NOT NULL,
        chunk_text MEDIUMTEXT NOT NULL,
        token_count INT NOT NULL,
        content_sha256 CHAR(64) NOT NULL,
        text_preview VARCHAR(512) NOT NULL,
        channel_id VARCHAR(128) NOT NULL,
        published_at TIMESTAMP(3) NOT NULL,
        PRIMARY KEY (video_id, chunk_id),
        KEY idx_keyword_channel (channel_id, published_at)
      );
    "#,
  )
  .execute(pool)
  .await?;

  Ok(())
}

pub async fn get_pool(database_url: &str) -> Result<&'static MySqlPool> {
  POOL
    .get_or_try_init(|| async {
      let pool = MySqlPoolOptions::new().max_connections(5).connect(database_url).await?;
      ensure_schema(&pool).await?;
      Ok::<_, PipelineError>(pool)
    })
    .await
}

fn status_to_str(status: VideoStatus) -> &'static str {
  status.as_str()
}

fn status_from_str(s: &str) -> Result<VideoStatus> {
  match s {
    "discovered" => Ok(VideoStatus::Discovered),
    "transcription_queued" => Ok(VideoStatus::TranscriptionQueued),
    "transcribed" => Ok(VideoStatus::Transcribed),
    "summarized" => Ok(VideoStatus::Summarized),
    "indexed" => Ok(VideoStatus::Indexed),
    "failed" => Ok(VideoStatus::Failed),
    other => Err(PipelineError::terminal(format!("unknown video status {other}"))),
  }
}

fn source_to_str(source: VideoSource) -> &'static str {
  match source {
    VideoSource::ChannelScrape => "channel_scrape",
    VideoSource::SheetBackfill => "sheet_backfill",
  }
}

fn source_from_str(s: &str) -> Result<VideoSource> {
  match s {
    "channel_scrape" => Ok(VideoSource::ChannelScrape),
    "sheet_backfill" => Ok(VideoSource::SheetBackfill),
    other => Err(PipelineError::terminal(format!("unknown video source {other}"))),
  }
}

fn video_from_row(r: &sqlx::mysql::MySqlRow) -> Result<Video> {
  Ok(Video {
    video_id: r.try_get("video_id")?,
    channel_id: r.try_get("channel_id")?,
    title: r.try_get("title")?,
    published_at: r.try_get("published_at")?,
    duration_sec: r.try_get("duration_sec")?,
    source: source_from_str(r.try_get::<String, _>("source")?.as_str())?,
    status: status_from_str(r.try_get::<String, _>("status")?.as_str())?,
    retry_count: r.try_get::<i32, _>("retry_count")? as u32,
    created_at: r.try_get("created_at")?,
    updated_at: r.try_get("updated_at")?,
  })
}

const VIDEO_COLUMNS: &str =
  "video_id, channel_id, title, published_at, duration_sec, source, status, retry_count, created_at, updated_at";

/// sqlx/MySQL-backed `MetadataStore`, mirroring the in-process store's
/// contract exactly. Used when `database_url` is configured; a `FOR UPDATE`
/// row lock inside a transaction replaces the in-process per-`video_id`
/// mutex for cross-process safety.
pub struct SqlxMetadataStore {
  pool: &'static MySqlPool,
}

impl SqlxMetadataStore {
  pub fn new(pool: &'static MySqlPool) -> Self {
    SqlxMetadataStore { pool }
  }
}

#[async_trait]
impl MetadataStore for SqlxMetadataStore {
  async fn upsert_video(&self, video: Video) -> Result<Video> {
    let mut tx = self.pool.begin().await?;

    let existing = sqlx::query("SELECT status, retry_count, created_at FROM videos WHERE video_id = ? FOR UPDATE")
      .bind(&video.video_id)
      .fetch_optional(&mut *tx)
      .await?;

    let merged = if let Some(row) = existing {
      let existing_status = status_from_str(row.try_get::<String, _>("status")?.as_str())?;
      let existing_retry_count: i32 = row.try_get("retry_count")?;
      let existing_created_at: DateTime<Utc> = row.try_get("created_at")?;
      let mut merged = video;
      if existing_status as u8 > merged.status as u8 {
        merged.status = existing_status;
      }
      merged.retry_count = existing_retry_count as u32;
      merged.created_at = existing_created_at;
      merged
    } else {
      video
    };

    sqlx::query(
      r#"
        INSERT INTO videos (video_id, channel_id, title, published_at, duration_sec, source, status, retry_count, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
          channel_id = VALUES(channel_id),
          title = VALUES(title),
          published_at = VALUES(published_at),
          duration_sec = VALUES(duration_sec),
          source = VALUES(source),
          status = VALUES(status),
          retry_count = VALUES(retry_count),
          updated_at = VALUES(updated_at);
      "#,
    )
    .bind(&merged.video_id)
    .bind(&merged.channel_id)
    .bind(&merged.title)
    .bind(merged.published_at)
    .bind(merged.duration_sec)
    .bind(source_to_str(merged.source))
    .bind(status_to_str(merged.status))
    .bind(merged.retry_count as i32)
    .bind(merged.created_at)
    .bind(merged.updated_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(merged)
  }

  async fn transition(&self, video_id: &str, from_state: VideoStatus, to_state: VideoStatus) -> Result<Video> {
    let mut tx = self.pool.begin().await?;

    let row = sqlx::query("SELECT status FROM videos WHERE video_id = ? FOR UPDATE")
      .bind(video_id)
      .fetch_optional(&mut *tx)
      .await?
      .ok_or_else(|| PipelineError::terminal(format!("unknown video {video_id}")))?;

    let current = status_from_str(row.try_get::<String, _>("status")?.as_str())?;
    // A Failed transition always succeeds regardless of current state;
    // every other transition must match the caller's expected from_state.
    let from_state_ok = to_state == VideoStatus::Failed || current == from_state;
    if !from_state_ok || !current.can_transition_to(to_state) {
      return Err(PipelineError::InvalidTransition {
        video_id: video_id.to_string(),
        from: current.as_str().to_string(),
        to: to_state.as_str().to_string(),
      });
    }

    sqlx::query("UPDATE videos SET status = ?, updated_at = ? WHERE video_id = ?")
      .bind(status_to_str(to_state))
      .bind(Utc::now())
      .bind(video_id)
      .execute(&mut *tx)
      .await?;

    let row = sqlx::query(&format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE video_id = ?"))
      .bind(video_id)
      .fetch_one(&mut *tx)
      .await?;
    tx.commit().await?;
    video_from_row(&row)
  }

  async fn get(&self, video_id: &str) -> Result<Option<Video>> {
    let row = sqlx::query(&format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE video_id = ?"))
      .bind(video_id)
      .fetch_optional(self.pool)
      .await?;
    row.map(|r| video_from_row(&r)).transpose()
  }

  async fn increment_retry_count(&self, video_id: &str) -> Result<u32> {
    let mut tx = self.pool.begin().await?;
    let count: i32 = sqlx::query_scalar("SELECT retry_count FROM videos WHERE video_id = ? FOR UPDATE")
      .bind(video_id)
      .fetch_optional(&mut *tx)
      .await?
      .ok_or_else(|| PipelineError::terminal(format!("unknown video {video_id}")))?;
    let next = count + 1;
    sqlx::query("UPDATE videos SET retry_count = ? WHERE video_id = ?")
      .bind(next)
      .bind(video_id)
      .execute(&mut *tx)
      .await?;
    tx.commit().await?;
    Ok(next as u32)
  }

  async fn query_by_status(&self, status: VideoStatus, limit: usize) -> Result<Vec<Video>> {
    let rows = sqlx::query(&format!(
      "SELECT {VIDEO_COLUMNS} FROM videos WHERE status = ? ORDER BY video_id ASC LIMIT ?"
    ))
    .bind(status_to_str(status))
    .bind(limit as i64)
    .fetch_all(self.pool)
    .await?;
    rows.iter().map(video_from_row).collect()
  }

  async fn commit_transcript(&self, transcript: Transcript) -> Result<()> {
    let exists = sqlx::query("SELECT 1 FROM videos WHERE video_id = ?")
      .bind(&transcript.video_id)
      .fetch_optional(self.pool)
      .await?;
    if exists.is_none() {
      return Err(PipelineError::terminal(format!(
        "cannot commit transcript: unknown video {}",
        transcript.video_id
      )));
    }

    let existing_digest: Option<String> = sqlx::query_scalar("SELECT content_digest FROM transcripts WHERE video_id = ?")
      .bind(&transcript.video_id)
      .fetch_optional(self.pool)
      .await?;
    if existing_digest.as_deref() == Some(transcript.content_digest.as_str()) {
      return Ok(());
    }

    sqlx::query(
      r#"
        INSERT INTO transcripts (video_id, transcript_txt_ref, transcript_json_ref, content_digest, cost_usd, language, duration_sec, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
          transcript_txt_ref = VALUES(transcript_txt_ref),
          transcript_json_ref = VALUES(transcript_json_ref),
          content_digest = VALUES(content_digest),
          cost_usd = VALUES(cost_usd),
          language = VALUES(language),
          duration_sec = VALUES(duration_sec),
          created_at = VALUES(created_at);
      "#,
    )
    .bind(&transcript.video_id)
    .bind(&transcript.artifact_refs.transcript_txt)
    .bind(&transcript.artifact_refs.transcript_json)
    .bind(&transcript.content_digest)
    .bind(transcript.cost_usd)
    .bind(&transcript.language)
    .bind(transcript.duration_sec)
    .bind(transcript.created_at)
    .execute(self.pool)
    .await?;
    Ok(())
  }

  async fn get_transcript(&self, video_id: &str) -> Result<Option<Transcript>> {
    let row = sqlx::query(
      "SELECT video_id, transcript_txt_ref, transcript_json_ref, content_digest, cost_usd, language, duration_sec, created_at
       FROM transcripts WHERE video_id = ?",
    )
    .bind(video_id)
    .fetch_optional(self.pool)
    .await?;

    row
      .map(|r| {
        Ok(Transcript {
          video_id: r.try_get("video_id")?,
          artifact_refs: ArtifactRefs {
            transcript_txt: r.try_get("transcript_txt_ref")?,
            transcript_json: r.try_get("transcript_json_ref")?,
            summary_md: None,
            summary_json: None,
          },
          content_digest: r.try_get("content_digest")?,
          cost_usd: r.try_get("cost_usd")?,
          language: r.try_get("language")?,
          duration_sec: r.try_get("duration_sec")?,
          created_at: r.try_get("created_at")?,
        })
      })
      .transpose()
  }

  async fn commit_summary(&self, summary: Summary) -> Result<()> {
    let has_transcript = sqlx::query("SELECT 1 FROM transcripts WHERE video_id = ?")
      .bind(&summary.video_id)
      .fetch_optional(self.pool)
      .await?;
    if has_transcript.is_none() {
      return Err(PipelineError::terminal(format!(
        "cannot commit summary: no transcript for {}",
        summary.video_id
      )));
    }

    let bullets_json = serde_json::to_string(&summary.bullets)?;
    let concepts_json = serde_json::to_string(&summary.concepts)?;

    sqlx::query(
      r#"
        INSERT INTO summaries (video_id, bullets_json, concepts_json, prompt_id, input_tokens, output_tokens, summary_md_ref, summary_json_ref, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
          bullets_json = VALUES(bullets_json),
          concepts_json = VALUES(concepts_json),
          prompt_id = VALUES(prompt_id),
          input_tokens = VALUES(input_tokens),
          output_tokens = VALUES(output_tokens),
          summary_md_ref = VALUES(summary_md_ref),
          summary_json_ref = VALUES(summary_json_ref),
          created_at = VALUES(created_at);
      "#,
    )
    .bind(&summary.video_id)
    .bind(bullets_json)
    .bind(concepts_json)
    .bind(&summary.prompt_id)
    .bind(summary.token_usage.input as i32)
    .bind(summary.token_usage.output as i32)
    .bind(&summary.artifact_refs.summary_md)
    .bind(&summary.artifact_refs.summary_json)
    .bind(summary.created_at)
    .execute(self.pool)
    .await?;
    Ok(())
  }

  async fn get_summary(&self, video_id: &str) -> Result<Option<Summary>> {
    let row = sqlx::query(
      "SELECT video_id, bullets_json, concepts_json, prompt_id, input_tokens, output_tokens, summary_md_ref, summary_json_ref, created_at
       FROM summaries WHERE video_id = ?",
    )
    .bind(video_id)
    .fetch_optional(self.pool)
    .await?;

    row
      .map(|r| {
        let bullets_json: String = r.try_get("bullets_json")?;
        let concepts_json: String = r.try_get("concepts_json")?;
        Ok(Summary {
          video_id: r.try_get("video_id")?,
          bullets: serde_json::from_str(&bullets_json)?,
          concepts: serde_json::from_str(&concepts_json)?,
          prompt_id: r.try_get("prompt_id")?,
          token_usage: TokenUsage {
            input: r.try_get::<i32, _>("input_tokens")? as u32,
            output: r.try_get::<i32, _>("output_tokens")? as u32,
          },
          artifact_refs: ArtifactRefs {
            transcript_txt: None,
            transcript_json: None,
            summary_md: r.try_get("summary_md_ref")?,
            summary_json: r.try_get("summary_json_ref")?,
          },
          created_at: r.try_get("created_at")?,
        })
      })
      .transpose()
  }

  async fn record_index_record(&self, record: IndexRecord) -> Result<()> {
    sqlx::query(
      r#"
        INSERT INTO index_records (video_id, chunk_id, token_count, content_sha256, text_preview, channel_id, published_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
          token_count = VALUES(token_count),
          content_sha256 = VALUES(content_sha256),
          text_preview = VALUES(text_preview),
          channel_id = VALUES(channel_id),
          published_at = VALUES(published_at);
      "#,
    )
    .bind(&record.video_id)
    .bind(&record.chunk_id)
    .bind(record.token_count as i32)
    .bind(&record.content_sha256)
    .bind(&record.text_preview)
    .bind(&record.channel_id)
    .bind(record.published_at)
    .execute(self.pool)
    .await?;
    Ok(())
  }

  async fn query_index_records(&self, video_id: &str) -> Result<Vec<IndexRecord>> {
    let rows = sqlx::query(
      "SELECT video_id, chunk_id, token_count, content_sha256, text_preview, channel_id, published_at
       FROM index_records WHERE video_id = ? ORDER BY chunk_id ASC",
    )
    .bind(video_id)
    .fetch_all(self.pool)
    .await?;

    rows
      .into_iter()
      .map(|r| {
        Ok(IndexRecord {
          video_id: r.try_get("video_id")?,
          chunk_id: r.try_get("chunk_id")?,
          token_count: r.try_get::<i32, _>("token_count")? as usize,
          content_sha256: r.try_get("content_sha256")?,
          text_preview: r.try_get("text_preview")?,
          channel_id: r.try_get("channel_id")?,
          published_at: r.try_get("published_at")?,
        })
      })
      .collect()
  }
}

/// sqlx/MySQL-backed `BudgetLedger`. Row-level locking (`FOR UPDATE`) inside
/// a transaction replaces the in-process per-day mutex.
pub struct SqlxBudgetLedger {
  pool: &'static MySqlPool,
  timezone: Tz,
  daily_budget_usd: f64,
}

impl SqlxBudgetLedger {
  pub fn new(pool: &'static MySqlPool, timezone: Tz, daily_budget_usd: f64) -> Self {
    SqlxBudgetLedger {
      pool,
      timezone,
      daily_budget_usd,
    }
  }

  fn today_key(&self) -> String {
    Utc::now().with_timezone(&self.timezone).format("%Y-%m-%d").to_string()
  }

  fn reset_in_hours(&self) -> f64 {
    let now_local = Utc::now().with_timezone(&self.timezone);
    let tomorrow_midnight = (now_local.date_naive() + chrono::Duration::days(1))
      .and_hms_opt(0, 0, 0)
      .expect("valid midnight");
    let next_midnight = self
      .timezone
      .from_local_datetime(&tomorrow_midnight)
      .single()
      .unwrap_or(now_local);
    (next_midnight - now_local).num_seconds() as f64 / 3600.0
  }
}

#[async_trait]
impl BudgetLedger for SqlxBudgetLedger {
  async fn check(&self, service: &str, requested_units: f64) -> Result<CheckResult> {
    let day = self.today_key();

    if service == "transcription" {
      let spent: Option<f64> = sqlx::query_scalar("SELECT transcription_usd_total FROM cost_aggregates WHERE day_key = ?")
        .bind(&day)
        .fetch_optional(self.pool)
        .await?;
      let remaining = self.daily_budget_usd - spent.unwrap_or(0.0);
      let outcome = if requested_units > remaining { CheckOutcome::Deny } else { CheckOutcome::Allow };
      return Ok(CheckResult {
        outcome,
        remaining,
        reset_in_hours: self.reset_in_hours(),
      });
    }

    let row = sqlx::query("SELECT used_units, limit_units FROM quota_counters WHERE service = ? AND day_key = ?")
      .bind(service)
      .bind(&day)
      .fetch_optional(self.pool)
      .await?;
    let (used, limit) = match row {
      Some(r) => (r.try_get::<f64, _>("used_units")?, r.try_get::<f64, _>("limit_units")?),
      None => (0.0, f64::MAX),
    };
    let remaining = limit - used;
    let outcome = if requested_units > remaining { CheckOutcome::Deny } else { CheckOutcome::Allow };
    Ok(CheckResult {
      outcome,
      remaining,
      reset_in_hours: self.reset_in_hours(),
    })
  }

  async fn record(&self, service: &str, used_units: f64, cost_usd: f64) -> Result<()> {
    let day = self.today_key();

    if cost_usd > 0.0 {
      sqlx::query(
        r#"
          INSERT INTO cost_aggregates (day_key, transcription_usd_total, transcript_count, last_updated)
          VALUES (?, ?, 1, ?)
          ON DUPLICATE KEY UPDATE
            transcription_usd_total = transcription_usd_total + VALUES(transcription_usd_total),
            transcript_count = transcript_count + 1,
            last_updated = VALUES(last_updated);
        "#,
      )
      .bind(&day)
      .bind(cost_usd)
      .bind(Utc::now())
      .execute(self.pool)
      .await?;
    }

    if used_units > 0.0 {
      sqlx::query(
        r#"
          INSERT INTO quota_counters (service, day_key, used_units, limit_units, last_reset)
          VALUES (?, ?, ?, ?, ?)
          ON DUPLICATE KEY UPDATE
            used_units = used_units + VALUES(used_units);
        "#,
      )
      .bind(service)
      .bind(&day)
      .bind(used_units)
      .bind(f64::MAX)
      .bind(Utc::now())
      .execute(self.pool)
      .await?;
    }
    Ok(())
  }

  async fn aggregate(&self, day: &str) -> Result<CostAggregate> {
    let row = sqlx::query(
      "SELECT transcription_usd_total, transcript_count, alerts_sent_json, last_updated FROM cost_aggregates WHERE day_key = ?",
    )
    .bind(day)
    .fetch_optional(self.pool)
    .await?;

    match row {
      Some(r) => {
        let alerts_json: String = r.try_get("alerts_sent_json")?;
        Ok(CostAggregate {
          day: day.to_string(),
          transcription_usd_total: r.try_get("transcription_usd_total")?,
          transcript_count: r.try_get::<i64, _>("transcript_count")? as u64,
          alerts_sent: serde_json::from_str(&alerts_json)?,
          last_updated: r.try_get("last_updated")?,
        })
      }
      None => Ok(CostAggregate::empty(day)),
    }
  }
}

/// sqlx/MySQL-backed `DeadLetterQueue`.
pub struct SqlxDeadLetterQueue {
  pool: &'static MySqlPool,
}

impl SqlxDeadLetterQueue {
  pub fn new(pool: &'static MySqlPool) -> Self {
    SqlxDeadLetterQueue { pool }
  }
}

fn severity_to_str(s: DlqSeverity) -> &'static str {
  s.as_str()
}

fn severity_from_str(s: &str) -> Result<DlqSeverity> {
  match s {
    "low" => Ok(DlqSeverity::Low),
    "medium" => Ok(DlqSeverity::Medium),
    "high" => Ok(DlqSeverity::High),
    "critical" => Ok(DlqSeverity::Critical),
    other => Err(PipelineError::terminal(format!("unknown dlq severity {other}"))),
  }
}

#[async_trait]
impl DeadLetterQueue for SqlxDeadLetterQueue {
  async fn enqueue(&self, entry: DlqEntry) -> Result<()> {
    let inputs_json = serde_json::to_string(&entry.original_inputs)?;
    sqlx::query(
      r#"
        INSERT INTO dlq_entries (job_id, job_type, video_id, error_type, message, retry_count, original_inputs_json, severity, recovery_priority, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
          error_type = VALUES(error_type),
          message = VALUES(message),
          retry_count = VALUES(retry_count),
          original_inputs_json = VALUES(original_inputs_json),
          severity = VALUES(severity),
          recovery_priority = VALUES(recovery_priority);
      "#,
    )
    .bind(&entry.job_id)
    .bind(&entry.job_type)
    .bind(&entry.video_id)
    .bind(&entry.failure.error_type)
    .bind(&entry.failure.message)
    .bind(entry.failure.retry_count as i32)
    .bind(inputs_json)
    .bind(severity_to_str(entry.severity))
    .bind(entry.recovery_priority as i32)
    .bind(entry.created_at)
    .execute(self.pool)
    .await?;
    Ok(())
  }

  async fn query(&self, query: DlqQuery) -> Result<Vec<DlqEntry>> {
    let mut sql = String::from(
      "SELECT job_id, job_type, video_id, error_type, message, retry_count, original_inputs_json, severity, recovery_priority, created_at FROM dlq_entries WHERE 1=1",
    );
    if query.job_type.is_some() {
      sql.push_str(" AND job_type = ?");
    }
    if query.severity.is_some() {
      sql.push_str(" AND severity = ?");
    }
    if query.video_id.is_some() {
      sql.push_str(" AND video_id = ?");
    }
    if query.since.is_some() {
      sql.push_str(" AND created_at >= ?");
    }
    if query.until.is_some() {
      sql.push_str(" AND created_at <= ?");
    }
    sql.push_str(" ORDER BY severity DESC, recovery_priority ASC, created_at ASC");
    if query.limit > 0 {
      sql.push_str(" LIMIT ?");
    }

    let mut q = sqlx::query(&sql);
    if let Some(job_type) = &query.job_type {
      q = q.bind(job_type);
    }
    if let Some(severity) = query.severity {
      q = q.bind(severity_to_str(severity));
    }
    if let Some(video_id) = &query.video_id {
      q = q.bind(video_id);
    }
    if let Some(since) = query.since {
      q = q.bind(since);
    }
    if let Some(until) = query.until {
      q = q.bind(until);
    }
    if query.limit > 0 {
      q = q.bind(query.limit as i64);
    }

    let rows = q.fetch_all(self.pool).await?;
    rows
      .into_iter()
      .map(|r| {
        let inputs_json: String = r.try_get("original_inputs_json")?;
        Ok(DlqEntry {
          job_id: r.try_get("job_id")?,
          job_type: r.try_get("job_type")?,
          video_id: r.try_get("video_id")?,
          failure: DlqFailure {
            error_type: r.try_get("error_type")?,
            message: r.try_get("message")?,
            retry_count: r.try_get::<i32, _>("retry_count")? as u32,
          },
          original_inputs: serde_json::from_str(&inputs_json)?,
          severity: severity_from_str(r.try_get::<String, _>("severity")?.as_str())?,
          recovery_priority: r.try_get::<i32, _>("recovery_priority")? as u32,
          created_at: r.try_get("created_at")?,
        })
      })
      .collect()
  }

  async fn replay(&self, job_id: &str) -> Result<Option<serde_json::Value>> {
    let row: Option<String> = sqlx::query_scalar("SELECT original_inputs_json FROM dlq_entries WHERE job_id = ?")
      .bind(job_id)
      .fetch_optional(self.pool)
      .await?;
    row.map(|json| Ok(serde_json::from_str(&json)?)).transpose()
  }
}

/// Persists the dispatcher's per-run plan and post-run summary for operator
/// audit and `RunSummary::health_score` history. Not part of any port trait;
/// called directly by the scheduler when a database is configured.
pub async fn record_run_plan(pool: &MySqlPool, plan: &RunPlan) -> Result<()> {
  let channels_json = serde_json::to_string(&plan.channels)?;
  sqlx::query(
    r#"
      INSERT INTO run_plans (run_id, channels_json, per_channel_limit, window_start, window_end, remaining_budget_usd, remaining_quota_units, created_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?)
      ON DUPLICATE KEY UPDATE channels_json = VALUES(channels_json);
    "#,
  )
  .bind(&plan.run_id)
  .bind(channels_json)
  .bind(plan.per_channel_limit as i32)
  .bind(plan.window_start)
  .bind(plan.window_end)
  .bind(plan.resource_limits.remaining_budget_usd)
  .bind(plan.resource_limits.remaining_quota_units)
  .bind(plan.created_at)
  .execute(pool)
  .await?;
  Ok(())
}

pub async fn record_run_summary(pool: &MySqlPool, summary: &RunSummary) -> Result<()> {
  let quota_json = serde_json::to_string(&summary.quota_state)?;
  sqlx::query(
    r#"
      INSERT INTO run_summaries (run_id, planned, succeeded, failed, dlq_count, quota_state_json, total_cost_usd, started_at, completed_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON DUPLICATE KEY UPDATE
        planned = VALUES(planned),
        succeeded = VALUES(succeeded),
        failed = VALUES(failed),
        dlq_count = VALUES(dlq_count),
        quota_state_json = VALUES(quota_state_json),
        total_cost_usd = VALUES(total_cost_usd),
        completed_at = VALUES(completed_at);
    "#,
  )
  .bind(&summary.run_id)
  .bind(summary.planned as i32)
  .bind(summary.succeeded as i32)
  .bind(summary.failed as i32)
  .bind(summary.dlq_count as i32)
  .bind(quota_json)
  .bind(summary.total_cost_usd)
  .bind(summary.started_at)
  .bind(summary.completed_at)
  .execute(pool)
  .await?;
  Ok(())
}

const ALERT_THROTTLE_WINDOW_MINUTES: i64 = 60;

/// sqlx/MySQL-backed `AlertSink`. Mirrors `InMemoryAlertSink`'s throttle
/// rule exactly but persists the throttle record so it survives across
/// serverless invocations, unlike the in-process map.
pub struct SqlxAlertSink {
  pool: &'static MySqlPool,
}

impl SqlxAlertSink {
  pub fn new(pool: &'static MySqlPool) -> Self {
    SqlxAlertSink { pool }
  }
}

#[async_trait]
impl crate::alert_sink::AlertSink for SqlxAlertSink {
  async fn emit(
    &self,
    alert_type: &str,
    _severity: crate::alert_sink::AlertSeverity,
    _payload: serde_json::Value,
  ) -> Result<crate::alert_sink::EmitOutcome> {
    let mut tx = self.pool.begin().await?;
    let now = Utc::now();

    let row = sqlx::query("SELECT last_sent, count FROM alert_throttle WHERE alert_type = ? FOR UPDATE")
      .bind(alert_type)
      .fetch_optional(&mut *tx)
      .await?;

    let outcome = if let Some(row) = row {
      let last_sent: DateTime<Utc> = row.try_get("last_sent")?;
      let elapsed_minutes = (now - last_sent).num_minutes();
      if elapsed_minutes < ALERT_THROTTLE_WINDOW_MINUTES {
        sqlx::query("UPDATE alert_throttle SET count = count + 1 WHERE alert_type = ?")
          .bind(alert_type)
          .execute(&mut *tx)
          .await?;
        crate::alert_sink::EmitOutcome::Throttled
      } else {
        sqlx::query("UPDATE alert_throttle SET last_sent = ?, count = 1 WHERE alert_type = ?")
          .bind(now)
          .bind(alert_type)
          .execute(&mut *tx)
          .await?;
        crate::alert_sink::EmitOutcome::Sent
      }
    } else {
      sqlx::query("INSERT INTO alert_throttle (alert_type, last_sent, count) VALUES (?, ?, 1)")
        .bind(alert_type)
        .bind(now)
        .execute(&mut *tx)
        .await?;
      crate::alert_sink::EmitOutcome::Sent
    };

    tx.commit().await?;
    Ok(outcome)
  }
}

/// sqlx/MySQL-backed `StructuredSink`, the one real adapter for the
/// structured/analytics retrieval sink (§6). Reuses the same pool as the
/// rest of the crate's MySQL-backed persistence rather than a separate
/// analytics warehouse, since both are SQL stores with the same shape.
pub struct SqlxStructuredSink {
  pool: &'static MySqlPool,
}

impl SqlxStructuredSink {
  pub fn new(pool: &'static MySqlPool) -> Self {
    SqlxStructuredSink { pool }
  }
}

#[async_trait]
impl crate::providers::sinks::StructuredSink for SqlxStructuredSink {
  async fn upsert(&self, record: &IndexRecord, title: &str) -> Result<()> {
    sqlx::query(
      r#"
        INSERT INTO structured_sink_rows (video_id, chunk_id, title, token_count, content_sha256, text_preview, channel_id, published_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
          title = VALUES(title),
          token_count = VALUES(token_count),
          content_sha256 = VALUES(content_sha256),
          text_preview = VALUES(text_preview);
      "#,
    )
    .bind(&record.video_id)
    .bind(&record.chunk_id)
    .bind(title)
    .bind(record.token_count as i32)
    .bind(&record.content_sha256)
    .bind(&record.text_preview)
    .bind(&record.channel_id)
    .bind(record.published_at)
    .execute(self.pool)
    .await?;
    Ok(())
  }

  async fn existing_chunk_ids(&self, video_id: &str) -> Result<Vec<String>> {
    let rows = sqlx::query_scalar::<_, String>("SELECT chunk_id FROM structured_sink_rows WHERE video_id = ?")
      .bind(video_id)
      .fetch_all(self.pool)
      .await?;
    Ok(rows)
  }

  async fn query(
    &self,
    query: &str,
    filters: &crate::providers::sinks::SourceFilters,
    limit: usize,
  ) -> Result<Vec<crate::providers::sinks::SourceHit>> {
    let mut sql = String::from(
      "SELECT video_id, chunk_id, title, text_preview, channel_id, published_at FROM structured_sink_rows WHERE 1 = 1",
    );
    if filters.channel_id.is_some() {
      sql.push_str(" AND channel_id = ?");
    }
    if filters.min_published_at.is_some() {
      sql.push_str(" AND published_at >= ?");
    }
    if filters.max_published_at.is_some() {
      sql.push_str(" AND published_at <= ?");
    }

    let mut q = sqlx::query(&sql);
    if let Some(channel_id) = &filters.channel_id {
      q = q.bind(channel_id);
    }
    if let Some(min) = filters.min_published_at {
      q = q.bind(min);
    }
    if let Some(max) = filters.max_published_at {
      q = q.bind(max);
    }

    let rows = q.fetch_all(self.pool).await?;
    let mut hits: Vec<crate::providers::sinks::SourceHit> = rows
      .iter()
      .map(|r| {
        let title: String = r.try_get("title")?;
        let text_preview: String = r.try_get("text_preview")?;
        let combined = format!("{title} {text_preview}");
        Ok(crate::providers::sinks::SourceHit {
          chunk_id: r.try_get("chunk_id")?,
          video_id: r.try_get("video_id")?,
          channel_id: r.try_get("channel_id")?,
          published_at: r.try_get("published_at")?,
          score: crate::providers::sinks::term_overlap_score(query, &combined),
          text_or_preview: text_preview,
        })
      })
      .collect::<Result<Vec<_>>>()?;
    hits.retain(|h| h.score > 0.0);
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
  }
}

/// sqlx/MySQL-backed `SemanticSink`. Scores by the same term-overlap
/// heuristic as the in-memory sink (§4.6); no vector-search crate is part
/// of this corpus's dependency stack, so the embedding model is recorded
/// alongside each chunk but not used to rank results.
pub struct SqlxSemanticSink {
  pool: &'static MySqlPool,
}

impl SqlxSemanticSink {
  pub fn new(pool: &'static MySqlPool) -> Self {
    SqlxSemanticSink { pool }
  }
}

#[async_trait]
impl crate::providers::sinks::SemanticSink for SqlxSemanticSink {
  async fn upsert(&self, record: &IndexRecord, text: &str, embedding_model: &str) -> Result<()> {
    sqlx::query(
      r#"
        INSERT INTO semantic_sink_rows (video_id, chunk_id, chunk_text, embedding_model, token_count, content_sha256, text_preview, channel_id, published_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
          chunk_text = VALUES(chunk_text),
          embedding_model = VALUES(embedding_model),
          token_count = VALUES(token_count),
          content_sha256 = VALUES(content_sha256),
          text_preview = VALUES(text_preview);
      "#,
    )
    .bind(&record.video_id)
    .bind(&record.chunk_id)
    .bind(text)
    .bind(embedding_model)
    .bind(record.token_count as i32)
    .bind(&record.content_sha256)
    .bind(&record.text_preview)
    .bind(&record.channel_id)
    .bind(record.published_at)
    .execute(self.pool)
    .await?;
    Ok(())
  }

  async fn existing_chunk_ids(&self, video_id: &str) -> Result<Vec<String>> {
    let rows = sqlx::query_scalar::<_, String>("SELECT chunk_id FROM semantic_sink_rows WHERE video_id = ?")
      .bind(video_id)
      .fetch_all(self.pool)
      .await?;
    Ok(rows)
  }

  async fn query(
    &self,
    query: &str,
    filters: &crate::providers::sinks::SourceFilters,
    limit: usize,
  ) -> Result<Vec<crate::providers::sinks::SourceHit>> {
    let mut sql = String::from(
      "SELECT video_id, chunk_id, chunk_text, channel_id, published_at FROM semantic_sink_rows WHERE 1 = 1",
    );
    if filters.channel_id.is_some() {
      sql.push_str(" AND channel_id = ?");
    }
    if filters.min_published_at.is_some() {
      sql.push_str(" AND published_at >= ?");
    }
    if filters.max_published_at.is_some() {
      sql.push_str(" AND published_at <= ?");
    }

    let mut q = sqlx::query(&sql);
    if let Some(channel_id) = &filters.channel_id {
      q = q.bind(channel_id);
    }
    if let Some(min) = filters.min_published_at {
      q = q.bind(min);
    }
    if let Some(max) = filters.max_published_at {
      q = q.bind(max);
    }

    let rows = q.fetch_all(self.pool).await?;
    let mut hits: Vec<crate::providers::sinks::SourceHit> = rows
      .iter()
      .map(|r| {
        let chunk_text: String = r.try_get("chunk_text")?;
        Ok(crate::providers::sinks::SourceHit {
          chunk_id: r.try_get("chunk_id")?,
          video_id: r.try_get("video_id")?,
          channel_id: r.try_get("channel_id")?,
          published_at: r.try_get("published_at")?,
          score: crate::providers::sinks::term_overlap_score(query, &chunk_text),
          text_or_preview: chunk_text,
        })
      })
      .collect::<Result<Vec<_>>>()?;
    hits.retain(|h| h.score > 0.0);
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
  }
}

/// sqlx/MySQL-backed `KeywordSink`. `ensure_index()` is a no-op here since
/// the table is created eagerly by `ensure_schema`; kept to satisfy the
/// trait's idempotent-initialization contract.
pub struct SqlxKeywordSink {
  pool: &'static MySqlPool,
}

impl SqlxKeywordSink {
  pub fn new(pool: &'static MySqlPool) -> Self {
    SqlxKeywordSink { pool }
  }
}

#[async_trait]
impl crate::providers::sinks::KeywordSink for SqlxKeywordSink {
  async fn ensure_index(&self) -> Result<()> {
    Ok(())
  }

  async fn upsert(&self, record: &IndexRecord, text: &str) -> Result<()> {
    sqlx::query(
      r#"
        INSERT INTO keyword_sink_rows (video_id, chunk_id, chunk_text, token_count, content_sha256, text_preview, channel_id, published_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
          chunk_text = VALUES(chunk_text),
          token_count = VALUES(token_count),
          content_sha256 = VALUES(content_sha256),
          text_preview = VALUES(text_preview);
      "#,
    )
    .bind(&record.video_id)
    .bind(&record.chunk_id)
    .bind(text)
    .bind(record.token_count as i32)
    .bind(&record.content_sha256)
    .bind(&record.text_preview)
    .bind(&record.channel_id)
    .bind(record.published_at)
    .execute(self.pool)
    .await?;
    Ok(())
  }

  async fn existing_chunk_ids(&self, video_id: &str) -> Result<Vec<String>> {
    let rows = sqlx::query_scalar::<_, String>("SELECT chunk_id FROM keyword_sink_rows WHERE video_id = ?")
      .bind(video_id)
      .fetch_all(self.pool)
      .await?;
    Ok(rows)
  }

  async fn query(
    &self,
    query: &str,
    filters: &crate::providers::sinks::SourceFilters,
    limit: usize,
  ) -> Result<Vec<crate::providers::sinks::SourceHit>> {
    let mut sql =
      String::from("SELECT video_id, chunk_id, chunk_text, channel_id, published_at FROM keyword_sink_rows WHERE 1 = 1");
    if filters.channel_id.is_some() {
      sql.push_str(" AND channel_id = ?");
    }
    if filters.min_published_at.is_some() {
      sql.push_str(" AND published_at >= ?");
    }
    if filters.max_published_at.is_some() {
      sql.push_str(" AND published_at <= ?");
    }

    let mut q = sqlx::query(&sql);
    if let Some(channel_id) = &filters.channel_id {
      q = q.bind(channel_id);
    }
    if let Some(min) = filters.min_published_at {
      q = q.bind(min);
    }
    if let Some(max) = filters.max_published_at {
      q = q.bind(max);
    }

    let rows = q.fetch_all(self.pool).await?;
    let mut hits: Vec<crate::providers::sinks::SourceHit> = rows
      .iter()
      .map(|r| {
        let chunk_text: String = r.try_get("chunk_text")?;
        Ok(crate::providers::sinks::SourceHit {
          chunk_id: r.try_get("chunk_id")?,
          video_id: r.try_get("video_id")?,
          channel_id: r.try_get("channel_id")?,
          published_at: r.try_get("published_at")?,
          score: crate::providers::sinks::term_overlap_score(query, &chunk_text),
          text_or_preview: chunk_text,
        })
      })
      .collect::<Result<Vec<_>>>()?;
    hits.retain(|h| h.score > 0.0);
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
  }
}

/// sqlx/MySQL-backed `RunPlanStore`, wrapping the free `record_run_plan`/
/// `fetch_run_plan` helpers below in the same port-trait shape as every
/// other adapter in this module.
pub struct SqlxRunPlanStore {
  pool: &'static MySqlPool,
}

impl SqlxRunPlanStore {
  pub fn new(pool: &'static MySqlPool) -> Self {
    SqlxRunPlanStore { pool }
  }
}

#[async_trait]
impl crate::scheduler::planner::RunPlanStore for SqlxRunPlanStore {
  async fn record(&self, plan: RunPlan) -> Result<()> {
    record_run_plan(self.pool, &plan).await
  }

  async fn fetch(&self, run_id: &str) -> Result<Option<RunPlan>> {
    fetch_run_plan(self.pool, run_id).await
  }
}

pub async fn fetch_run_plan(pool: &MySqlPool, run_id: &str) -> Result<Option<RunPlan>> {
  let row = sqlx::query(
    "SELECT run_id, channels_json, per_channel_limit, window_start, window_end, remaining_budget_usd, remaining_quota_units, created_at
     FROM run_plans WHERE run_id = ?",
  )
  .bind(run_id)
  .fetch_optional(pool)
  .await?;

  row
    .map(|r| {
      let channels_json: String = r.try_get("channels_json")?;
      Ok(RunPlan {
        run_id: r.try_get("run_id")?,
        channels: serde_json::from_str(&channels_json)?,
        per_channel_limit: r.try_get::<i32, _>("per_channel_limit")? as u32,
        window_start: r.try_get("window_start")?,
        window_end: r.try_get("window_end")?,
        resource_limits: ResourceLimits {
          remaining_budget_usd: r.try_get("remaining_budget_usd")?,
          remaining_quota_units: r.try_get("remaining_quota_units")?,
        },
        created_at: r.try_get("created_at")?,
      })
    })
    .transpose()
}
