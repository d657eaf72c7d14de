use std::fmt;

/// Classification used by the dispatcher's policy table (see `scheduler::policy`)
/// and by DLQ severity derivation (see `dlq`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  /// Timeout, 5xx, rate-limit, storage unavailable: retry with backoff, then DLQ.
  Transient,
  /// Auth failure, invalid input, unsupported media, poison payload: DLQ immediately.
  Terminal,
  /// Daily cost cap hit: reject, alert, do not DLQ.
  BudgetExceeded,
  /// Service quota hit: retry after the reset window.
  QuotaExceeded,
  /// One of multiple sinks/sources failed; the rest succeeded.
  Partial,
  /// Retrieval-side channel/age/sensitive-content violation.
  PolicyViolation,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::Transient => "transient",
      ErrorKind::Terminal => "terminal",
      ErrorKind::BudgetExceeded => "budget_exceeded",
      ErrorKind::QuotaExceeded => "quota_exceeded",
      ErrorKind::Partial => "partial",
      ErrorKind::PolicyViolation => "policy_violation",
    }
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
  #[error("{kind}: {message}")]
  Classified { kind: ErrorKind, message: String },

  #[error("storage unavailable: {0}")]
  StorageUnavailable(String),

  #[error("invalid state transition for {video_id}: {from:?} -> {to:?}")]
  InvalidTransition {
    video_id: String,
    from: String,
    to: String,
  },

  #[error("configuration error: {0}")]
  Config(String),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("http client error: {0}")]
  Http(#[from] reqwest::Error),
}

impl PipelineError {
  pub fn classified(kind: ErrorKind, message: impl Into<String>) -> Self {
    PipelineError::Classified {
      kind,
      message: message.into(),
    }
  }

  pub fn terminal(message: impl Into<String>) -> Self {
    Self::classified(ErrorKind::Terminal, message)
  }

  pub fn transient(message: impl Into<String>) -> Self {
    Self::classified(ErrorKind::Transient, message)
  }

  /// Best-effort classification. Errors constructed outside `classified` (e.g. via `?`
  /// from a provider crate) are treated as transient by default; this matches §7's
  /// "nothing recovers silently" stance by always biasing toward a retry rather than
  /// silently swallowing an unclassified failure.
  pub fn kind(&self) -> ErrorKind {
    match self {
      PipelineError::Classified { kind, .. } => *kind,
      PipelineError::StorageUnavailable(_) => ErrorKind::Transient,
      PipelineError::InvalidTransition { .. } => ErrorKind::Terminal,
      PipelineError::Config(_) => ErrorKind::Terminal,
      PipelineError::Json(_) => ErrorKind::Terminal,
      PipelineError::Database(_) => ErrorKind::Transient,
      PipelineError::Http(_) => ErrorKind::Transient,
    }
  }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
