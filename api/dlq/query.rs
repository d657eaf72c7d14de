use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use hybrid_ingest_rust::config::Config;
use hybrid_ingest_rust::db;
use hybrid_ingest_rust::dlq::{DeadLetterQueue, DlqQuery, InMemoryDeadLetterQueue};
use hybrid_ingest_rust::models::DlqSeverity;

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
struct QueryRequest {
  #[serde(default)]
  job_type: Option<String>,
  #[serde(default)]
  severity: Option<String>,
  #[serde(default)]
  video_id: Option<String>,
  #[serde(default)]
  since: Option<chrono::DateTime<chrono::Utc>>,
  #[serde(default)]
  until: Option<chrono::DateTime<chrono::Utc>>,
  #[serde(default)]
  limit: Option<usize>,
}

fn parse_severity(raw: &str) -> Option<DlqSeverity> {
  match raw {
    "low" => Some(DlqSeverity::Low),
    "medium" => Some(DlqSeverity::Medium),
    "high" => Some(DlqSeverity::High),
    "critical" => Some(DlqSeverity::Critical),
    _ => None,
  }
}

/// Operator-facing read surface over the dead letter queue, matching the
/// same filters `operator_cli`'s `query-dlq` subcommand exposes.
async fn handle_query(method: &Method, headers: &HeaderMap, body: Bytes) -> Result<Response<ResponseBody>, Error> {
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

  let parsed: QueryRequest = if body.is_empty() {
    QueryRequest::default()
  } else {
    serde_json::from_slice(&body)
      .map_err(|e| -> Error { Box::new(std::io::Error::other(format!("invalid json body: {e}"))) })?
  };

  let query = DlqQuery {
    job_type: parsed.job_type,
    severity: parsed.severity.as_deref().and_then(parse_severity),
    video_id: parsed.video_id,
    since: parsed.since,
    until: parsed.until,
    limit: parsed.limit.unwrap_or(50),
  };

  let entries = if let Some(database_url) = &config.database_url {
    let pool = db::get_pool(database_url).await?;
    let dlq = db::SqlxDeadLetterQueue::new(pool);
    dlq.query(query).await.map_err(|e| -> Error { Box::new(e) })?
  } else {
    let dlq = InMemoryDeadLetterQueue::new();
    dlq.query(query).await.map_err(|e| -> Error { Box::new(e) })?
  };

  json_response(StatusCode::OK, serde_json::json!({"ok": true, "entries": entries}))
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_query(&method, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  run(service_fn(handler)).await
}
