use crate::budget_ledger::{BudgetLedger, CheckOutcome};
use crate::config::Config;
use crate::error::Result;
use crate::models::{ResourceLimits, RunPlan};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

/// Persists a `RunPlan` for operator audit and replay. The sqlx-backed
/// implementation in `db.rs` wraps `record_run_plan`/`fetch_run_plan`;
/// `InMemoryRunPlanStore` is the default when no database is configured.
#[async_trait]
pub trait RunPlanStore: Send + Sync {
  async fn record(&self, plan: RunPlan) -> Result<()>;
  async fn fetch(&self, run_id: &str) -> Result<Option<RunPlan>>;
}

#[derive(Default)]
pub struct InMemoryRunPlanStore {
  plans: DashMap<String, RunPlan>,
}

impl InMemoryRunPlanStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl RunPlanStore for InMemoryRunPlanStore {
  async fn record(&self, plan: RunPlan) -> Result<()> {
    self.plans.insert(plan.run_id.clone(), plan);
    Ok(())
  }

  async fn fetch(&self, run_id: &str) -> Result<Option<RunPlan>> {
    Ok(self.plans.get(run_id).map(|p| p.clone()))
  }
}

/// Produces a `RunPlan` for a scheduled tick: the channels to discover
/// from, the per-channel limit, and the resource envelope derived from
/// the current budget/quota state. Persisted by the caller via the
/// metadata store; this function is pure apart from the budget check.
pub async fn plan_run(
  config: &Config,
  budget_ledger: &dyn BudgetLedger,
  channels: Vec<String>,
) -> Result<RunPlan> {
  let check = budget_ledger.check("transcription", 0.0).await?;
  let remaining_budget_usd = match check.outcome {
    CheckOutcome::Allow => check.remaining.max(0.0),
    CheckOutcome::Deny => 0.0,
  };

  let quota_check = budget_ledger.check("youtube", 0.0).await?;
  let remaining_quota_units = quota_check.remaining.max(0.0);

  let now = Utc::now();
  Ok(RunPlan {
    run_id: Uuid::new_v4().to_string(),
    channels,
    per_channel_limit: config.scheduler.daily_limit_per_channel,
    window_start: now - chrono::Duration::days(1),
    window_end: now,
    resource_limits: ResourceLimits {
      remaining_budget_usd,
      remaining_quota_units,
    },
    created_at: now,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::budget_ledger::InMemoryBudgetLedger;

  #[tokio::test]
  async fn plan_run_carries_configured_per_channel_limit() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");
    let config = Config::from_env().unwrap();
    let ledger = InMemoryBudgetLedger::new("Europe/Amsterdam".parse().unwrap(), 5.0);
    let plan = plan_run(&config, &ledger, vec!["chan1".to_string()])
      .await
      .unwrap();
    assert_eq!(plan.per_channel_limit, config.scheduler.daily_limit_per_channel);
    assert_eq!(plan.channels, vec!["chan1".to_string()]);
  }

  #[tokio::test]
  async fn in_memory_plan_store_round_trips() {
    let store = InMemoryRunPlanStore::new();
    let ledger = InMemoryBudgetLedger::new("Europe/Amsterdam".parse().unwrap(), 5.0);
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");
    let config = Config::from_env().unwrap();
    let plan = plan_run(&config, &ledger, vec!["chan1".to_string()]).await.unwrap();
    let run_id = plan.run_id.clone();
    store.record(plan).await.unwrap();
    let fetched = store.fetch(&run_id).await.unwrap().unwrap();
    assert_eq!(fetched.run_id, run_id);
  }

  #[tokio::test]
  async fn plan_run_reflects_exhausted_budget() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");
    let config = Config::from_env().unwrap();
    let ledger = InMemoryBudgetLedger::new("Europe/Amsterdam".parse().unwrap(), 5.0);
    ledger.record("transcription", 0.0, 5.0).await.unwrap();
    let plan = plan_run(&config, &ledger, vec!["chan1".to_string()])
      .await
      .unwrap();
    assert_eq!(plan.resource_limits.remaining_budget_usd, 0.0);
  }
}
