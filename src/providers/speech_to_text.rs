use crate::error::{PipelineError, Result};
use crate::http_client::http_client_for_url;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptionStatus {
  Queued,
  Processing,
  Completed,
  Error,
}

#[derive(Debug, Clone)]
pub struct TranscriptionResult {
  pub transcript_text: String,
  pub transcript_json: serde_json::Value,
  pub language: String,
}

/// (c) speech-to-text provider: submit an async job, poll it to
/// completion. Polling constants mirror the teacher-adjacent
/// AssemblyAI-style backoff: base 5s, doubling, capped at 30s, 60 max
/// attempts.
#[async_trait]
pub trait SpeechToTextProvider: Send + Sync {
  async fn submit(&self, media_url: &str) -> Result<String>;
  async fn poll(&self, job_id: &str) -> Result<(TranscriptionStatus, Option<TranscriptionResult>)>;
}

pub const POLL_BASE_SECONDS: u64 = 5;
pub const POLL_CAP_SECONDS: u64 = 30;
pub const POLL_MAX_ATTEMPTS: u32 = 60;

/// `min(poll_interval * 2^min(attempt/10, 3), 30)`, matching the original
/// transcriber tool's backoff curve.
pub fn poll_delay_seconds(attempt: u32) -> u64 {
  let exponent = (attempt / 10).min(3);
  (POLL_BASE_SECONDS * 2u64.pow(exponent)).min(POLL_CAP_SECONDS)
}

/// Polls `provider` until the job reaches a terminal state or
/// `POLL_MAX_ATTEMPTS` is exhausted.
pub async fn poll_until_done(
  provider: &dyn SpeechToTextProvider,
  job_id: &str,
) -> Result<TranscriptionResult> {
  for attempt in 0..POLL_MAX_ATTEMPTS {
    let (status, result) = provider.poll(job_id).await?;
    match status {
      TranscriptionStatus::Completed => {
        return result
          .ok_or_else(|| PipelineError::transient("completed job missing result payload"));
      }
      TranscriptionStatus::Error => {
        return Err(PipelineError::terminal(format!(
          "transcription job {job_id} failed"
        )));
      }
      TranscriptionStatus::Queued | TranscriptionStatus::Processing => {
        sleep(Duration::from_secs(poll_delay_seconds(attempt))).await;
      }
    }
  }
  Err(PipelineError::transient(format!(
    "transcription job {job_id} timed out after {POLL_MAX_ATTEMPTS} attempts"
  )))
}

#[derive(Deserialize)]
struct SubmitResponse {
  id: String,
}

#[derive(Deserialize)]
struct PollResponse {
  status: String,
  text: Option<String>,
  language_code: Option<String>,
  #[serde(default)]
  words: serde_json::Value,
  error: Option<String>,
}

/// Thin reqwest-backed adapter, shaped after AssemblyAI's submit/poll HTTP
/// surface (the same surface the original source's transcriber tools drove).
pub struct HttpSpeechToTextProvider {
  api_key: String,
  base_url: String,
}

impl HttpSpeechToTextProvider {
  pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
    HttpSpeechToTextProvider {
      api_key: api_key.into(),
      base_url: base_url.into(),
    }
  }
}

#[async_trait]
impl SpeechToTextProvider for HttpSpeechToTextProvider {
  async fn submit(&self, media_url: &str) -> Result<String> {
    let client = http_client_for_url(&self.base_url)?;
    let resp = client
      .post(format!("{}/v2/transcript", self.base_url))
      .header("authorization", &self.api_key)
      .json(&json!({ "audio_url": media_url }))
      .send()
      .await?;
    let parsed: SubmitResponse = resp.json().await?;
    Ok(parsed.id)
  }

  async fn poll(&self, job_id: &str) -> Result<(TranscriptionStatus, Option<TranscriptionResult>)> {
    let client = http_client_for_url(&self.base_url)?;
    let resp = client
      .get(format!("{}/v2/transcript/{job_id}", self.base_url))
      .header("authorization", &self.api_key)
      .send()
      .await?;
    let parsed: PollResponse = resp.json().await?;
    let status = match parsed.status.as_str() {
      "queued" => TranscriptionStatus::Queued,
      "processing" => TranscriptionStatus::Processing,
      "completed" => TranscriptionStatus::Completed,
      _ => TranscriptionStatus::Error,
    };
    if status == TranscriptionStatus::Error {
      return Err(PipelineError::terminal(
        parsed.error.unwrap_or_else(|| "unknown transcription error".to_string()),
      ));
    }
    let result = if status == TranscriptionStatus::Completed {
      Some(TranscriptionResult {
        transcript_text: parsed.text.unwrap_or_default(),
        transcript_json: parsed.words,
        language: parsed.language_code.unwrap_or_else(|| "en".to_string()),
      })
    } else {
      None
    };
    Ok((status, result))
  }
}

/// In-process fake: every submitted job completes on its first poll with a
/// fixed transcript, unless pre-seeded otherwise via `seed_result`/`seed_error`.
pub struct FakeSpeechToTextProvider {
  results: Mutex<HashMap<String, Result<TranscriptionResult>>>,
  next_id: Mutex<u64>,
}

impl Default for FakeSpeechToTextProvider {
  fn default() -> Self {
    Self::new()
  }
}

impl FakeSpeechToTextProvider {
  pub fn new() -> Self {
    FakeSpeechToTextProvider {
      results: Mutex::new(HashMap::new()),
      next_id: Mutex::new(0),
    }
  }

  pub fn seed_result(&self, job_id: &str, result: TranscriptionResult) {
    self.results.lock().unwrap().insert(job_id.to_string(), Ok(result));
  }

  pub fn seed_error(&self, job_id: &str, message: &str) {
    self
      .results
      .lock()
      .unwrap()
      .insert(job_id.to_string(), Err(PipelineError::terminal(message)));
  }
}

#[async_trait]
impl SpeechToTextProvider for FakeSpeechToTextProvider {
  async fn submit(&self, _media_url: &str) -> Result<String> {
    let mut next = self.next_id.lock().unwrap();
    *next += 1;
    let job_id = format!("fake-job-{next}");
    if !self.results.lock().unwrap().contains_key(&job_id) {
      self.results.lock().unwrap().insert(
        job_id.clone(),
        Ok(TranscriptionResult {
          transcript_text: "fake transcript text".to_string(),
          transcript_json: json!({ "words": [] }),
          language: "en".to_string(),
        }),
      );
    }
    Ok(job_id)
  }

  async fn poll(&self, job_id: &str) -> Result<(TranscriptionStatus, Option<TranscriptionResult>)> {
    let results = self.results.lock().unwrap();
    match results.get(job_id) {
      Some(Ok(result)) => Ok((TranscriptionStatus::Completed, Some(result.clone()))),
      Some(Err(_)) => Ok((TranscriptionStatus::Error, None)),
      None => Err(PipelineError::terminal(format!("unknown job {job_id}"))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn poll_delay_follows_capped_exponential_curve() {
    assert_eq!(poll_delay_seconds(0), 5);
    assert_eq!(poll_delay_seconds(9), 5);
    assert_eq!(poll_delay_seconds(10), 10);
    assert_eq!(poll_delay_seconds(20), 20);
    assert_eq!(poll_delay_seconds(30), 30);
    assert_eq!(poll_delay_seconds(59), 30);
  }

  #[tokio::test]
  async fn fake_provider_completes_on_first_poll() {
    let provider = FakeSpeechToTextProvider::new();
    let job_id = provider.submit("https://example.com/a.mp4").await.unwrap();
    let result = poll_until_done(&provider, &job_id).await.unwrap();
    assert_eq!(result.transcript_text, "fake transcript text");
  }

  #[tokio::test]
  async fn fake_provider_surfaces_seeded_error() {
    let provider = FakeSpeechToTextProvider::new();
    let job_id = provider.submit("https://example.com/a.mp4").await.unwrap();
    provider.seed_error(&job_id, "unsupported media");
    let err = poll_until_done(&provider, &job_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Classified { .. }));
  }
}
