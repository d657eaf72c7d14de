use crate::alert_sink::{AlertSeverity, AlertSink, EmitOutcome};
use crate::error::Result;
use crate::models::{QuotaState, RunPlan, RunSummary};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

/// Accumulates the counters a run produces stage by stage; `finish` turns
/// this into a `RunSummary` and emits it. One instance per run, owned by
/// the dispatcher's caller.
pub struct RunRecorder {
  run_id: String,
  started_at: DateTime<Utc>,
  planned: u32,
  succeeded: u32,
  failed: u32,
  dlq_count: u32,
  total_cost_usd: f64,
}

impl RunRecorder {
  pub fn start(run_id: impl Into<String>, planned: u32) -> Self {
    RunRecorder {
      run_id: run_id.into(),
      started_at: Utc::now(),
      planned,
      succeeded: 0,
      failed: 0,
      dlq_count: 0,
      total_cost_usd: 0.0,
    }
  }

  pub fn record_success(&mut self, cost_usd: f64) {
    self.succeeded += 1;
    self.total_cost_usd += cost_usd;
  }

  pub fn record_failure(&mut self, cost_usd: f64) {
    self.failed += 1;
    self.total_cost_usd += cost_usd;
  }

  pub fn record_dlq(&mut self) {
    self.dlq_count += 1;
  }

  pub fn finish(self, quota_state: Vec<QuotaState>) -> RunSummary {
    RunSummary {
      run_id: self.run_id,
      planned: self.planned,
      succeeded: self.succeeded,
      failed: self.failed,
      dlq_count: self.dlq_count,
      quota_state,
      total_cost_usd: self.total_cost_usd,
      started_at: self.started_at,
      completed_at: Utc::now(),
    }
  }
}

/// Emits the `run_started` event once a plan has been produced and persisted,
/// before any stage dispatches. Purely informational; there is no alert path
/// for a run starting.
pub fn emit_run_started(plan: &RunPlan) {
  info!(
    run_id = %plan.run_id,
    channels = plan.channels.len(),
    per_channel_limit = plan.per_channel_limit,
    remaining_budget_usd = plan.resource_limits.remaining_budget_usd,
    remaining_quota_units = plan.resource_limits.remaining_quota_units,
    window_start = %plan.window_start,
    window_end = %plan.window_end,
    "run started"
  );
}

/// Health score bands driving the human-facing summary's tone. Thresholds
/// are a presentation choice, not part of the score itself.
fn health_band(score: f64) -> &'static str {
  if score >= 90.0 {
    "healthy"
  } else if score >= 70.0 {
    "degraded"
  } else {
    "unhealthy"
  }
}

/// Emits the structured run event (always, via `tracing`) and a human-facing
/// summary alert to C3 when the run is degraded or unhealthy — a perfectly
/// healthy run does not page anyone.
pub async fn emit_run_summary(summary: &RunSummary, alert_sink: &dyn AlertSink) -> Result<EmitOutcome> {
  let score = summary.health_score();
  let band = health_band(score);

  info!(
    run_id = %summary.run_id,
    planned = summary.planned,
    succeeded = summary.succeeded,
    failed = summary.failed,
    dlq_count = summary.dlq_count,
    total_cost_usd = summary.total_cost_usd,
    health_score = score,
    health_band = band,
    "run completed"
  );

  if band == "healthy" {
    return Ok(EmitOutcome::Sent);
  }

  let severity = if band == "unhealthy" { AlertSeverity::Critical } else { AlertSeverity::Warning };
  if severity == AlertSeverity::Critical {
    warn!(run_id = %summary.run_id, health_score = score, "run health below threshold");
  }

  alert_sink
    .emit(
      "run_summary",
      severity,
      json!({
        "run_id": summary.run_id,
        "planned": summary.planned,
        "succeeded": summary.succeeded,
        "failed": summary.failed,
        "dlq_count": summary.dlq_count,
        "total_cost_usd": summary.total_cost_usd,
        "health_score": score,
        "health_band": band,
        "started_at": summary.started_at,
        "completed_at": summary.completed_at,
      }),
    )
    .await
}
