use crate::error::Result;
use crate::models::{CostAggregate, QuotaCounter};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
  Allow,
  Deny,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
  pub outcome: CheckOutcome,
  pub remaining: f64,
  /// hours until the next local-midnight reset, as a float.
  pub reset_in_hours: f64,
}

/// Tracks per-day spend and per-service quota use; gates dispatch. `check`
/// and `record` are atomic against the per-day record (serialized by a
/// per-key lock, matching the per-day mutex described in §5).
#[async_trait]
pub trait BudgetLedger: Send + Sync {
  async fn check(&self, service: &str, requested_units: f64) -> Result<CheckResult>;
  async fn record(&self, service: &str, used_units: f64, cost_usd: f64) -> Result<()>;
  async fn aggregate(&self, day: &str) -> Result<CostAggregate>;
}

pub struct InMemoryBudgetLedger {
  timezone: Tz,
  daily_budget_usd: f64,
  aggregates: DashMap<String, CostAggregate>,
  quotas: DashMap<String, QuotaCounter>,
  locks: DashMap<String, Arc<Mutex<()>>>,
}

fn today_key(timezone: Tz) -> String {
  Utc::now()
    .with_timezone(&timezone)
    .format("%Y-%m-%d")
    .to_string()
}

fn reset_in_hours(timezone: Tz) -> f64 {
  let now_local = Utc::now().with_timezone(&timezone);
  let tomorrow_midnight = (now_local.date_naive() + chrono::Duration::days(1))
    .and_hms_opt(0, 0, 0)
    .expect("valid midnight");
  let next_midnight = timezone
    .from_local_datetime(&tomorrow_midnight)
    .single()
    .unwrap_or_else(|| Utc::now().with_timezone(&timezone));
  (next_midnight - now_local).num_seconds() as f64 / 3600.0
}

impl InMemoryBudgetLedger {
  pub fn new(timezone: Tz, daily_budget_usd: f64) -> Self {
    InMemoryBudgetLedger {
      timezone,
      daily_budget_usd,
      aggregates: DashMap::new(),
      quotas: DashMap::new(),
      locks: DashMap::new(),
    }
  }

  fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
    self
      .locks
      .entry(key.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone()
  }

  /// Returns true exactly once, the first time spend crosses the warning
  /// threshold for the day; used by callers to emit the at-most-one 80%
  /// alert via the alert sink.
  pub fn crossed_warning_threshold(spent_before: f64, spent_after: f64, budget: f64) -> bool {
    let threshold = budget * 0.80;
    spent_before < threshold && spent_after >= threshold
  }

  pub fn crossed_critical_threshold(spent_before: f64, spent_after: f64, budget: f64) -> bool {
    let threshold = budget * 0.95;
    spent_before < threshold && spent_after >= threshold
  }
}

#[async_trait]
impl BudgetLedger for InMemoryBudgetLedger {
  async fn check(&self, service: &str, requested_units: f64) -> Result<CheckResult> {
    let day = today_key(self.timezone);
    let lock = self.lock_for(&format!("{service}:{day}"));
    let _guard = lock.lock().await;

    if service == "transcription" {
      let spent = self
        .aggregates
        .get(&day)
        .map(|a| a.transcription_usd_total)
        .unwrap_or(0.0);
      let remaining = self.daily_budget_usd - spent;
      let outcome = if requested_units > remaining {
        CheckOutcome::Deny
      } else {
        CheckOutcome::Allow
      };
      return Ok(CheckResult {
        outcome,
        remaining,
        reset_in_hours: reset_in_hours(self.timezone),
      });
    }

    let counter = self.quotas.get(&format!("{service}:{day}"));
    let (used, limit) = counter
      .map(|c| (c.used_units, c.limit_units))
      .unwrap_or((0.0, f64::MAX));
    let remaining = limit - used;
    let outcome = if requested_units > remaining {
      CheckOutcome::Deny
    } else {
      CheckOutcome::Allow
    };
    Ok(CheckResult {
      outcome,
      remaining,
      reset_in_hours: reset_in_hours(self.timezone),
    })
  }

  async fn record(&self, service: &str, used_units: f64, cost_usd: f64) -> Result<()> {
    let day = today_key(self.timezone);
    let lock = self.lock_for(&format!("{service}:{day}"));
    let _guard = lock.lock().await;

    if cost_usd > 0.0 {
      let mut entry = self
        .aggregates
        .entry(day.clone())
        .or_insert_with(|| CostAggregate::empty(day.clone()));
      entry.transcription_usd_total += cost_usd;
      entry.transcript_count += 1;
      entry.last_updated = Utc::now();
    }

    if used_units > 0.0 {
      let key = format!("{service}:{day}");
      let mut counter = self.quotas.entry(key).or_insert_with(|| QuotaCounter {
        service: service.to_string(),
        day: day.clone(),
        used_units: 0.0,
        limit_units: f64::MAX,
        last_reset: Utc::now(),
      });
      counter.used_units += used_units;
    }
    Ok(())
  }

  async fn aggregate(&self, day: &str) -> Result<CostAggregate> {
    Ok(
      self
        .aggregates
        .get(day)
        .map(|a| a.clone())
        .unwrap_or_else(|| CostAggregate::empty(day)),
    )
  }
}

/// Marks `record_at` as the moment a given quota counter last reset.
pub fn quota_last_reset(day: &str, timezone: Tz) -> DateTime<Utc> {
  let naive = chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .unwrap_or_else(|| Utc::now().naive_utc());
  timezone
    .from_local_datetime(&naive)
    .single()
    .map(|dt| dt.with_timezone(&Utc))
    .unwrap_or_else(Utc::now)
}
