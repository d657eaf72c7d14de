use crate::error::Result;
use crate::models::{DlqEntry, DlqFailure, DlqSeverity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Default, Clone)]
pub struct DlqQuery {
  pub job_type: Option<String>,
  pub severity: Option<DlqSeverity>,
  pub video_id: Option<String>,
  pub since: Option<DateTime<Utc>>,
  pub until: Option<DateTime<Utc>>,
  pub limit: usize,
}

/// Terminal-failure archive with query and replay surface.
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
  async fn enqueue(&self, entry: DlqEntry) -> Result<()>;
  async fn query(&self, query: DlqQuery) -> Result<Vec<DlqEntry>>;
  /// Returns the original inputs for the dispatcher to push back through a
  /// single retry cycle with `retry_count` reset to zero. The DLQ entry
  /// itself is left in place as an audit record.
  async fn replay(&self, job_id: &str) -> Result<Option<serde_json::Value>>;
}

/// Terminal error classes that always route to `critical` severity,
/// regardless of job type.
const CRITICAL_ERROR_TYPES: &[&str] = &["auth_error", "credential_error", "poison_input"];

/// Derives DLQ severity from an error classification and retry history,
/// per §4.4's derivation rules.
pub fn derive_severity(error_type: &str, retry_count: u32, max_retries: u32, is_paid_api: bool) -> DlqSeverity {
  if CRITICAL_ERROR_TYPES.contains(&error_type) || error_type == "terminal" {
    return DlqSeverity::Critical;
  }
  if retry_count >= max_retries && is_paid_api {
    return DlqSeverity::High;
  }
  if error_type == "validation_error" {
    return DlqSeverity::Medium;
  }
  DlqSeverity::Low
}

pub struct InMemoryDeadLetterQueue {
  entries: DashMap<String, DlqEntry>,
}

impl Default for InMemoryDeadLetterQueue {
  fn default() -> Self {
    Self::new()
  }
}

impl InMemoryDeadLetterQueue {
  pub fn new() -> Self {
    InMemoryDeadLetterQueue {
      entries: DashMap::new(),
    }
  }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDeadLetterQueue {
  async fn enqueue(&self, entry: DlqEntry) -> Result<()> {
    self.entries.insert(entry.job_id.clone(), entry);
    Ok(())
  }

  async fn query(&self, query: DlqQuery) -> Result<Vec<DlqEntry>> {
    let mut out: Vec<DlqEntry> = self
      .entries
      .iter()
      .map(|e| e.value().clone())
      .filter(|e| {
        query
          .job_type
          .as_ref()
          .map(|jt| jt == &e.job_type)
          .unwrap_or(true)
      })
      .filter(|e| query.severity.map(|s| s == e.severity).unwrap_or(true))
      .filter(|e| {
        query
          .video_id
          .as_ref()
          .map(|v| v == &e.video_id)
          .unwrap_or(true)
      })
      .filter(|e| query.since.map(|s| e.created_at >= s).unwrap_or(true))
      .filter(|e| query.until.map(|u| e.created_at <= u).unwrap_or(true))
      .collect();
    out.sort_by(|a, b| {
      b.severity
        .cmp(&a.severity)
        .then(a.recovery_priority.cmp(&b.recovery_priority))
        .then(a.created_at.cmp(&b.created_at))
    });
    if query.limit > 0 {
      out.truncate(query.limit);
    }
    Ok(out)
  }

  async fn replay(&self, job_id: &str) -> Result<Option<serde_json::Value>> {
    Ok(self.entries.get(job_id).map(|e| e.original_inputs.clone()))
  }
}

/// Builds a DLQ entry from a worker's terminal failure. `recovery_priority`
/// sorts low-first within a severity tier (lower retry counts recover faster).
pub fn build_entry(
  job_id: String,
  job_type: String,
  video_id: String,
  error_type: &str,
  message: String,
  retry_count: u32,
  max_retries: u32,
  is_paid_api: bool,
  original_inputs: serde_json::Value,
) -> DlqEntry {
  let severity = derive_severity(error_type, retry_count, max_retries, is_paid_api);
  DlqEntry {
    job_id,
    job_type,
    video_id,
    failure: DlqFailure {
      error_type: error_type.to_string(),
      message,
      retry_count,
    },
    original_inputs,
    severity,
    recovery_priority: retry_count,
    created_at: Utc::now(),
  }
}
