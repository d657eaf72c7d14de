pub mod index;
pub mod scrape;
pub mod summarize;
pub mod transcribe;

use tokio::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
  Success,
  Partial,
  Failed,
}

/// Uniform stage-worker contract from §4.6:
/// `execute(input, context) -> {status, outputs, cost_usd, retry_hint?}`.
#[derive(Debug, Clone)]
pub struct WorkerOutcome<T> {
  pub status: WorkerStatus,
  pub outputs: T,
  pub cost_usd: f64,
  pub retry_hint: Option<Duration>,
}

impl<T> WorkerOutcome<T> {
  pub fn success(outputs: T, cost_usd: f64) -> Self {
    WorkerOutcome {
      status: WorkerStatus::Success,
      outputs,
      cost_usd,
      retry_hint: None,
    }
  }

  pub fn partial(outputs: T, cost_usd: f64, retry_hint: Duration) -> Self {
    WorkerOutcome {
      status: WorkerStatus::Partial,
      outputs,
      cost_usd,
      retry_hint: Some(retry_hint),
    }
  }
}
