use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use hybrid_ingest_rust::budget_ledger::InMemoryBudgetLedger;
use hybrid_ingest_rust::config::Config;
use hybrid_ingest_rust::db::{self, SqlxBudgetLedger};
use hybrid_ingest_rust::observability::emit_run_started;
use hybrid_ingest_rust::scheduler::planner::plan_run;

fn bearer_token(header_value: Option<&str>) -> Option<&str> {
  let value = header_value?;
  value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Result<Response<ResponseBody>, Error> {
  Ok(
    Response::builder()
      .status(status)
      .header("content-type", "application/json; charset=utf-8")
      .body(ResponseBody::from(value))?,
  )
}

#[derive(Deserialize, Default)]
struct DispatchRequest {
  #[serde(default)]
  channels: Vec<String>,
}

fn channels_from_env() -> Vec<String> {
  std::env::var("SCHEDULER_CHANNELS")
    .ok()
    .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
    .unwrap_or_default()
}

/// Produces and persists today's `RunPlan` per §4.5. Dispatching individual
/// stage jobs against that plan is the worker tick's job, not this one's.
async fn handle_dispatch(method: &Method, headers: &HeaderMap, body: Bytes) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return json_response(
      StatusCode::METHOD_NOT_ALLOWED,
      serde_json::json!({"ok": false, "error": "method_not_allowed"}),
    );
  }

  let config = Config::from_env().map_err(|e| -> Error { Box::new(e) })?;

  let provided = bearer_token(headers.get("authorization").and_then(|v| v.to_str().ok())).unwrap_or("");
  if provided != config.internal_token {
    return json_response(
      StatusCode::UNAUTHORIZED,
      serde_json::json!({"ok": false, "error": "unauthorized"}),
    );
  }

  let parsed: DispatchRequest = if body.is_empty() {
    DispatchRequest::default()
  } else {
    serde_json::from_slice(&body)
      .map_err(|e| -> Error { Box::new(std::io::Error::other(format!("invalid json body: {e}"))) })?
  };

  let channels = if parsed.channels.is_empty() { channels_from_env() } else { parsed.channels };
  if channels.is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({
        "ok": false,
        "error": "bad_request",
        "message": "no channels configured (set SCHEDULER_CHANNELS or pass channels in the body)"
      }),
    );
  }

  let timezone: chrono_tz::Tz = config.scheduler.timezone.parse().unwrap_or(chrono_tz::Europe::Amsterdam);

  let plan = if let Some(database_url) = &config.database_url {
    let pool = db::get_pool(database_url).await?;
    let ledger = SqlxBudgetLedger::new(pool, timezone, config.budgets.transcription_daily_usd);
    let plan = plan_run(&config, &ledger, channels).await?;
    db::record_run_plan(pool, &plan).await?;
    plan
  } else {
    let ledger = InMemoryBudgetLedger::new(timezone, config.budgets.transcription_daily_usd);
    plan_run(&config, &ledger, channels).await?
  };
  emit_run_started(&plan);

  json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "run_id": plan.run_id,
      "channels": plan.channels,
      "per_channel_limit": plan.per_channel_limit,
      "remaining_budget_usd": plan.resource_limits.remaining_budget_usd,
      "remaining_quota_units": plan.resource_limits.remaining_quota_units,
    }),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_dispatch(&method, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn returns_unauthorized_when_token_mismatched() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");
    std::env::remove_var("DATABASE_URL");

    let headers = HeaderMap::new();
    let response = handle_dispatch(&Method::POST, &headers, Bytes::new()).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn returns_bad_request_when_no_channels_configured() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");
    std::env::remove_var("DATABASE_URL");
    std::env::remove_var("SCHEDULER_CHANNELS");

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    let response = handle_dispatch(&Method::POST, &headers, Bytes::new()).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn plans_a_run_from_request_channels() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");
    std::env::remove_var("DATABASE_URL");

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    let body = Bytes::from(r#"{"channels":["chan1","chan2"]}"#);
    let response = handle_dispatch(&Method::POST, &headers, body).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed.get("ok").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
      parsed.get("channels").and_then(|v| v.as_array()).map(|a| a.len()),
      Some(2)
    );
  }
}
