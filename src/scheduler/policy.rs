use crate::error::ErrorKind;
use rand::Rng;
use tokio::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
  Proceed,
  Retry(Duration),
  Dlq,
  Reject,
}

#[derive(Debug, Clone)]
pub struct JobContext {
  pub error_kind: Option<ErrorKind>,
  pub retry_count: u32,
  pub max_retries: u32,
  pub budget_remaining_usd: Option<f64>,
  pub estimated_cost_usd: f64,
  /// Time until the exhausted quota resets, from `BudgetLedger::check`'s
  /// `CheckResult::reset_in_hours`. Only consulted on `QuotaExceeded`.
  pub reset_in: Option<Duration>,
}

/// Default backoff: exponential base 60s, doubling per retry, capped at
/// 30 minutes, ±10% jitter.
pub const BACKOFF_BASE: Duration = Duration::from_secs(60);
pub const BACKOFF_CAP: Duration = Duration::from_secs(30 * 60);

/// Scheduling is daily by default (§5); a quota retry is never scheduled
/// further out than the next planning tick even if the reset window is
/// longer.
pub const PLANNING_TICK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub fn backoff_duration(retry_count: u32) -> Duration {
  let exponent = retry_count.min(20);
  let base_secs = BACKOFF_BASE.as_secs_f64() * 2f64.powi(exponent as i32);
  let capped = base_secs.min(BACKOFF_CAP.as_secs_f64());
  let jitter_fraction = rand::thread_rng().gen_range(-0.10..=0.10);
  let jittered = (capped * (1.0 + jitter_fraction)).max(0.0);
  Duration::from_secs_f64(jittered)
}

/// The decision table from §4.5, evaluated in order: terminal error class,
/// retry exhaustion, quota denial, budget shortfall, transient error,
/// otherwise proceed.
pub fn evaluate(ctx: &JobContext) -> Decision {
  if let Some(ErrorKind::Terminal) = ctx.error_kind {
    return Decision::Dlq;
  }
  if ctx.retry_count >= ctx.max_retries {
    return Decision::Dlq;
  }
  if let Some(ErrorKind::QuotaExceeded) = ctx.error_kind {
    let reset_in = ctx.reset_in.unwrap_or_else(|| backoff_duration(ctx.retry_count));
    return Decision::Retry(reset_in.min(PLANNING_TICK_INTERVAL));
  }
  if let Some(remaining) = ctx.budget_remaining_usd {
    if remaining < ctx.estimated_cost_usd {
      return Decision::Reject;
    }
  }
  if let Some(ErrorKind::Transient) = ctx.error_kind {
    return Decision::Retry(backoff_duration(ctx.retry_count));
  }
  Decision::Proceed
}

#[cfg(test)]
mod tests {
  use super::*;

  fn base_ctx() -> JobContext {
    JobContext {
      error_kind: None,
      retry_count: 0,
      max_retries: 3,
      budget_remaining_usd: Some(5.0),
      estimated_cost_usd: 0.1,
      reset_in: None,
    }
  }

  #[test]
  fn terminal_error_always_dlqs() {
    let ctx = JobContext {
      error_kind: Some(ErrorKind::Terminal),
      ..base_ctx()
    };
    assert_eq!(evaluate(&ctx), Decision::Dlq);
  }

  #[test]
  fn exhausted_retries_dlqs_even_without_error() {
    let ctx = JobContext {
      retry_count: 3,
      max_retries: 3,
      ..base_ctx()
    };
    assert_eq!(evaluate(&ctx), Decision::Dlq);
  }

  #[test]
  fn quota_denied_retries_with_backoff() {
    let ctx = JobContext {
      error_kind: Some(ErrorKind::QuotaExceeded),
      ..base_ctx()
    };
    assert!(matches!(evaluate(&ctx), Decision::Retry(_)));
  }

  #[test]
  fn quota_denied_retries_after_reset_in_rather_than_generic_backoff() {
    let ctx = JobContext {
      error_kind: Some(ErrorKind::QuotaExceeded),
      reset_in: Some(Duration::from_secs(3_600)),
      ..base_ctx()
    };
    assert_eq!(evaluate(&ctx), Decision::Retry(Duration::from_secs(3_600)));
  }

  #[test]
  fn quota_reset_in_is_capped_at_the_next_planning_tick() {
    let ctx = JobContext {
      error_kind: Some(ErrorKind::QuotaExceeded),
      reset_in: Some(Duration::from_secs(48 * 3_600)),
      ..base_ctx()
    };
    assert_eq!(evaluate(&ctx), Decision::Retry(PLANNING_TICK_INTERVAL));
  }

  #[test]
  fn insufficient_budget_rejects_not_dlq() {
    let ctx = JobContext {
      budget_remaining_usd: Some(0.05),
      estimated_cost_usd: 0.1,
      ..base_ctx()
    };
    assert_eq!(evaluate(&ctx), Decision::Reject);
  }

  #[test]
  fn transient_error_retries() {
    let ctx = JobContext {
      error_kind: Some(ErrorKind::Transient),
      ..base_ctx()
    };
    assert!(matches!(evaluate(&ctx), Decision::Retry(_)));
  }

  #[test]
  fn clean_job_proceeds() {
    assert_eq!(evaluate(&base_ctx()), Decision::Proceed);
  }

  #[test]
  fn backoff_doubles_and_caps() {
    assert!(backoff_duration(0).as_secs_f64() >= 54.0 && backoff_duration(0).as_secs_f64() <= 66.0);
    assert!(backoff_duration(1).as_secs_f64() >= 108.0 && backoff_duration(1).as_secs_f64() <= 132.0);
    let capped = backoff_duration(20);
    assert!(capped.as_secs_f64() <= BACKOFF_CAP.as_secs_f64() * 1.10 + 1.0);
  }
}
