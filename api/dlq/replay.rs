use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use hybrid_ingest_rust::config::Config;
use hybrid_ingest_rust::db;
use hybrid_ingest_rust::dlq::{DeadLetterQueue, InMemoryDeadLetterQueue};

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

#[derive(Deserialize)]
struct ReplayRequest {
  job_id: String,
}

/// Looks up a DLQ entry's original inputs by job id. The entry itself is
/// left in place as an audit record; it is the caller's responsibility to
/// actually re-dispatch the returned inputs through the worker tick.
async fn handle_replay(method: &Method, headers: &HeaderMap, body: Bytes) -> Result<Response<ResponseBody>, Error> {
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

  if body.is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "missing job_id"}),
    );
  }
  let parsed: ReplayRequest = serde_json::from_slice(&body)
    .map_err(|e| -> Error { Box::new(std::io::Error::other(format!("invalid json body: {e}"))) })?;

  let original_inputs = if let Some(database_url) = &config.database_url {
    let pool = db::get_pool(database_url).await?;
    let dlq = db::SqlxDeadLetterQueue::new(pool);
    dlq.replay(&parsed.job_id).await.map_err(|e| -> Error { Box::new(e) })?
  } else {
    let dlq = InMemoryDeadLetterQueue::new();
    dlq.replay(&parsed.job_id).await.map_err(|e| -> Error { Box::new(e) })?
  };

  match original_inputs {
    Some(inputs) => json_response(StatusCode::OK, serde_json::json!({"ok": true, "original_inputs": inputs})),
    None => json_response(
      StatusCode::NOT_FOUND,
      serde_json::json!({"ok": false, "error": "not_found", "job_id": parsed.job_id}),
    ),
  }
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_replay(&method, &headers, bytes).await
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
    let response = handle_replay(&Method::POST, &headers, Bytes::new()).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn returns_not_found_for_unknown_job_id() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");
    std::env::remove_var("DATABASE_URL");

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    let body = Bytes::from(r#"{"job_id":"nonexistent"}"#);
    let response = handle_replay(&Method::POST, &headers, body).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
  }
}
