use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use hybrid_ingest_rust::config::Config;
use hybrid_ingest_rust::db;
use hybrid_ingest_rust::providers::sinks::{
  InMemoryKeywordSink, InMemorySemanticSink, InMemoryStructuredSink, KeywordSink, SemanticSink, StructuredSink,
};
use hybrid_ingest_rust::retrieval::{retrieve, Policy, RetrievalFilters, RetrievalSources};

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
struct RetrieveRequest {
  query: String,
  #[serde(default)]
  top_k: Option<usize>,
  #[serde(default)]
  channel_id: Option<String>,
  #[serde(default)]
  since: Option<chrono::DateTime<chrono::Utc>>,
  #[serde(default)]
  until: Option<chrono::DateTime<chrono::Utc>>,
}

/// Thin handler over C7-C9: routes and fans out the query across the
/// configured sinks, fuses the hits, then enforces the configured
/// authorization policy before returning results. Backed by the same
/// sqlx-backed sinks `tick.rs` indexes into when `DATABASE_URL` is set;
/// falls back to empty in-memory sinks otherwise.
async fn handle_retrieve(method: &Method, headers: &HeaderMap, body: Bytes) -> Result<Response<ResponseBody>, Error> {
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

  let parsed: RetrieveRequest = if body.is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "missing query"}),
    );
  } else {
    serde_json::from_slice(&body)
      .map_err(|e| -> Error { Box::new(std::io::Error::other(format!("invalid json body: {e}"))) })?
  };

  if parsed.query.trim().is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "query must not be empty"}),
    );
  }

  let filters = RetrievalFilters {
    channel_id: parsed.channel_id,
    min_published_at: parsed.since,
    max_published_at: parsed.until,
  };

  let (semantic, keyword, structured): (Box<dyn SemanticSink>, Box<dyn KeywordSink>, Box<dyn StructuredSink>) =
    if let Some(database_url) = &config.database_url {
      let pool = db::get_pool(database_url).await?;
      (
        Box::new(db::SqlxSemanticSink::new(pool)),
        Box::new(db::SqlxKeywordSink::new(pool)),
        Box::new(db::SqlxStructuredSink::new(pool)),
      )
    } else {
      (
        Box::new(InMemorySemanticSink::default()),
        Box::new(InMemoryKeywordSink::default()),
        Box::new(InMemoryStructuredSink::default()),
      )
    };
  let sources = RetrievalSources {
    semantic: Some(semantic.as_ref()),
    keyword: Some(keyword.as_ref()),
    structured: Some(structured.as_ref()),
  };

  let top_k = parsed.top_k.unwrap_or(config.retrieval.top_k);
  let result = retrieve(
    &parsed.query,
    &filters,
    top_k,
    &sources,
    config.routing.mode,
    None,
    config.retrieval.per_source_timeout_ms,
    config.retrieval.rrf_k,
  )
  .await;

  let policy = Policy {
    allowed_channels: config.policy.allowed_channels.clone(),
    max_age_days: config.policy.max_age_days,
    sensitive_patterns: Vec::new(),
    mode: config.policy.mode,
  }
  .with_default_patterns();

  let (enforced, audit) = hybrid_ingest_rust::retrieval::policy::enforce(result.chunks, &policy);

  json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "strategy": result.routing.strategy,
      "rationale": result.routing.rationale,
      "no_sources_available": result.no_sources_available,
      "errors": result.errors,
      "results": enforced.iter().map(|c| serde_json::json!({
        "chunk_id": c.chunk.chunk_id,
        "video_id": c.chunk.video_id,
        "channel_id": c.chunk.channel_id,
        "score": c.chunk.score_fused,
        "redacted": c.redacted,
        "text_or_preview": c.chunk.text_or_preview,
      })).collect::<Vec<_>>(),
      "audit_count": audit.len(),
    }),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_retrieve(&method, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  run(service_fn(handler)).await
}
