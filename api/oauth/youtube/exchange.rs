use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use hybrid_ingest_rust::providers::youtube::{exchange_code_for_tokens, youtube_oauth_client_from_env};
use hybrid_ingest_rust::providers::youtube_api::fetch_my_channel_id;

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
struct ExchangeRequest {
  code: String,
}

/// Exchanges an OAuth authorization code for tokens and resolves the
/// connected channel id. This is a single-deployment tool, not a
/// multi-tenant SaaS: there is no connections table to persist into —
/// the operator copies the returned refresh token into its own config.
async fn handle_exchange(method: &Method, headers: &HeaderMap, body: Bytes) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return json_response(
      StatusCode::METHOD_NOT_ALLOWED,
      serde_json::json!({"ok": false, "error": "method_not_allowed"}),
    );
  }

  let expected = std::env::var("RUST_INTERNAL_TOKEN").unwrap_or_default();
  let provided = bearer_token(
    headers
      .get("authorization")
      .and_then(|v| v.to_str().ok()),
  )
  .unwrap_or("");

  if expected.is_empty() || provided != expected {
    return json_response(
      StatusCode::UNAUTHORIZED,
      serde_json::json!({"ok": false, "error": "unauthorized"}),
    );
  }

  let parsed: ExchangeRequest = serde_json::from_slice(&body).map_err(|e| -> Error {
    Box::new(std::io::Error::other(format!("invalid json body: {e}")))
  })?;

  if parsed.code.is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "code is required"}),
    );
  }

  let (client, _redirect) = youtube_oauth_client_from_env()?;
  let tokens = exchange_code_for_tokens(&client, &parsed.code).await?;
  let channel_id = fetch_my_channel_id(&tokens.access_token).await?;

  json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "channel_id": channel_id,
      "access_token": tokens.access_token,
      "refresh_token": tokens.refresh_token,
      "expires_in_seconds": tokens.expires_in_seconds,
      "scope": tokens.scope,
    }),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_exchange(&method, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn returns_unauthorized_when_missing_internal_token() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let headers = HeaderMap::new();
    let response = handle_exchange(&Method::POST, &headers, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn returns_bad_request_when_code_missing() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());

    let body = Bytes::from(r#"{"code":""}"#);
    let response = handle_exchange(&Method::POST, &headers, body).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn rejects_non_post_methods() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");
    let headers = HeaderMap::new();
    let response = handle_exchange(&Method::GET, &headers, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
  }
}
