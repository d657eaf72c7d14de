use crate::error::Result;
use crate::models::AlertThrottleRecord;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
  Info,
  Warning,
  Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
  Sent,
  Throttled,
  Failed,
}

/// Deduplicated, rate-limited outbound operational events. At most one
/// emission per `alert_type` per rolling 60 minutes; a throttled call must
/// not mutate any state beyond the throttle record itself.
#[async_trait]
pub trait AlertSink: Send + Sync {
  async fn emit(&self, alert_type: &str, severity: AlertSeverity, payload: Value)
    -> Result<EmitOutcome>;
}

pub struct InMemoryAlertSink {
  throttle: DashMap<String, AlertThrottleRecord>,
  /// Messages actually "sent", retained for test assertions and for the
  /// operator CLI's `query-dlq`-adjacent introspection.
  sent: DashMap<String, Vec<Value>>,
}

impl Default for InMemoryAlertSink {
  fn default() -> Self {
    Self::new()
  }
}

const THROTTLE_WINDOW_MINUTES: i64 = 60;

impl InMemoryAlertSink {
  pub fn new() -> Self {
    InMemoryAlertSink {
      throttle: DashMap::new(),
      sent: DashMap::new(),
    }
  }

  pub fn sent_count(&self, alert_type: &str) -> usize {
    self.sent.get(alert_type).map(|v| v.len()).unwrap_or(0)
  }
}

#[async_trait]
impl AlertSink for InMemoryAlertSink {
  async fn emit(
    &self,
    alert_type: &str,
    _severity: AlertSeverity,
    payload: Value,
  ) -> Result<EmitOutcome> {
    let now = Utc::now();
    let mut record = self
      .throttle
      .entry(alert_type.to_string())
      .or_insert_with(|| AlertThrottleRecord {
        alert_type: alert_type.to_string(),
        last_sent: now - chrono::Duration::minutes(THROTTLE_WINDOW_MINUTES + 1),
        count: 0,
      });

    let elapsed_minutes = (now - record.last_sent).num_minutes();
    if elapsed_minutes < THROTTLE_WINDOW_MINUTES {
      record.count += 1;
      return Ok(EmitOutcome::Throttled);
    }

    record.last_sent = now;
    record.count = 1;
    drop(record);

    self
      .sent
      .entry(alert_type.to_string())
      .or_default()
      .push(payload);
    Ok(EmitOutcome::Sent)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn first_emission_sends() {
    let sink = InMemoryAlertSink::new();
    let outcome = sink
      .emit("budget_warning", AlertSeverity::Warning, json!({"day": "2026-07-27"}))
      .await
      .unwrap();
    assert_eq!(outcome, EmitOutcome::Sent);
  }

  #[tokio::test]
  async fn second_emission_within_hour_is_throttled() {
    let sink = InMemoryAlertSink::new();
    sink
      .emit("budget_warning", AlertSeverity::Warning, json!({}))
      .await
      .unwrap();
    let outcome = sink
      .emit("budget_warning", AlertSeverity::Warning, json!({}))
      .await
      .unwrap();
    assert_eq!(outcome, EmitOutcome::Throttled);
    assert_eq!(sink.sent_count("budget_warning"), 1);
  }

  #[tokio::test]
  async fn different_alert_types_are_independent() {
    let sink = InMemoryAlertSink::new();
    sink
      .emit("budget_warning", AlertSeverity::Warning, json!({}))
      .await
      .unwrap();
    let outcome = sink
      .emit("dlq_high_severity", AlertSeverity::Critical, json!({}))
      .await
      .unwrap();
    assert_eq!(outcome, EmitOutcome::Sent);
  }
}
