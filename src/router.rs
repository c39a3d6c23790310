use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};

use crate::error::error_response;
use crate::models::{ChatRequest, StatusResponse};
use crate::pipeline::{ChatHandler, ChatReply};

pub const MANUAL_PATH: &str = "/api/chat";
pub const PROXIED_PATH: &str = "/api/chat/router";
pub const DIRECT_PATH: &str = "/api/chat/direct";

pub struct RouterState {
  pub started_at: Instant,
}

/// Mounts `POST` (chat) and `GET` (status) for one handler at `path`.
pub fn chat_routes(path: &str, handler: Arc<ChatHandler>) -> Router {
  Router::new()
    .route(path, get(status).post(chat))
    .with_state(handler)
}

pub fn app(handlers: Vec<(&str, Arc<ChatHandler>)>) -> Router {
  let state = Arc::new(RouterState {
    started_at: Instant::now(),
  });
  let mut router = Router::new().route("/health", get(health).with_state(state));
  for (path, handler) in handlers {
    router = router.merge(chat_routes(path, handler));
  }
  router.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

pub async fn run_router(bind: SocketAddr, app: Router) -> anyhow::Result<()> {
  let listener = tokio::net::TcpListener::bind(bind).await?;
  tracing::info!(addr = %listener.local_addr()?, "chat router listening");
  axum::serve(listener, app).await?;
  Ok(())
}

async fn health(State(state): State<Arc<RouterState>>) -> Json<serde_json::Value> {
  let uptime = state.started_at.elapsed().as_millis();
  Json(serde_json::json!({
    "status": "ok",
    "version": env!("CARGO_PKG_VERSION"),
    "uptime_ms": uptime
  }))
}

async fn status(State(handler): State<Arc<ChatHandler>>) -> Json<StatusResponse> {
  Json(handler.status())
}

async fn chat(
  State(handler): State<Arc<ChatHandler>>,
  body: Result<Json<ChatRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
  let Json(req) = match body {
    Ok(json) => json,
    Err(rejection) => {
      return error_response(StatusCode::BAD_REQUEST, "invalid_request", &rejection.body_text());
    }
  };

  match handler.handle(req).await {
    Ok(ChatReply::Complete(res)) => (StatusCode::OK, Json(res)).into_response(),
    Ok(ChatReply::Stream { session_id, chunks }) => stream_response(session_id, chunks),
    Err(err) => err.into_response(),
  }
}

/// The session id header is omitted when the id is not a valid header value.
fn stream_response(session_id: String, chunks: crate::provider::TextStream) -> Response {
  let body = Body::from_stream(chunks.map(|item| item.map_err(axum::Error::new)));
  let mut builder = Response::builder()
    .status(StatusCode::OK)
    .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
    .header(header::CACHE_CONTROL, "no-cache");
  match HeaderValue::from_str(&session_id) {
    Ok(value) => builder = builder.header("x-session-id", value),
    Err(_) => tracing::debug!(session_id = ?session_id, "session id is not a valid header value"),
  }
  builder.body(body).unwrap_or_else(|err| {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", &err.to_string())
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ValidatedConfig;
  use crate::error::Result;
  use crate::pipeline::{HandlerMode, EMPTY_RESPONSE_CODE};
  use crate::provider::{GenerationRequest, ProviderConfig, ProviderKind, TextGenerator, TextStream};
  use async_trait::async_trait;
  use axum::http::Request;
  use tower::ServiceExt;

  struct Scripted(Vec<&'static str>);

  #[async_trait]
  impl TextGenerator for Scripted {
    fn kind(&self) -> ProviderKind {
      ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
      "claude-test"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
      Ok(self.0.concat())
    }

    async fn generate_stream(&self, _request: &GenerationRequest) -> Result<TextStream> {
      let items: Vec<Result<String>> = self.0.iter().map(|c| Ok(c.to_string())).collect();
      Ok(Box::pin(tokio_stream::iter(items)))
    }
  }

  fn handler(streaming: bool, chunks: Vec<&'static str>) -> Arc<ChatHandler> {
    let config = ValidatedConfig {
      provider: ProviderConfig::new(ProviderKind::Anthropic, Some("k"), None).unwrap(),
      supermemory_api_key: "sm".to_string(),
      container: "portfolio".to_string(),
      system_prompt: None,
      temperature: 0.7,
      max_tokens: 1024,
      streaming,
    };
    Arc::new(ChatHandler::from_parts(HandlerMode::Proxied, config, Arc::new(Scripted(chunks))))
  }

  fn post(path: &str, body: &str) -> Request<Body> {
    Request::builder()
      .method("POST")
      .uri(path)
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(body.to_string()))
      .unwrap()
  }

  async fn body_string(res: Response) -> String {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
  }

  #[tokio::test]
  async fn streams_plain_text_chunks() {
    let app = app(vec![(PROXIED_PATH, handler(true, vec!["Hel", "lo"]))]);
    let res = app
      .oneshot(post(PROXIED_PATH, r#"{"message":"hi","sessionId":"s1"}"#))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    assert_eq!(res.headers()["x-session-id"], "s1");
    assert_eq!(body_string(res).await, "Hello");
  }

  #[tokio::test]
  async fn session_id_unfit_for_a_header_still_streams() {
    let app = app(vec![(PROXIED_PATH, handler(true, vec!["o", "k"]))]);
    let res = app
      .oneshot(post(PROXIED_PATH, r#"{"message":"hi","sessionId":"a\u0001b"}"#))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("x-session-id").is_none());
    assert_eq!(body_string(res).await, "ok");
  }

  #[tokio::test]
  async fn malformed_history_entries_do_not_reject_the_request() {
    let app = app(vec![(DIRECT_PATH, handler(false, vec!["fine"]))]);
    let body = r#"{"message":"hi","sessionId":"s1","history":[
      {"role":null,"content":"x"},
      {"role":"user","content":{"text":"obj"}},
      {"role":"user","content":"prev"}
    ]}"#;
    let res = app.oneshot(post(DIRECT_PATH, body)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(res).await).unwrap();
    assert_eq!(json["answer"], "fine");
  }

  #[tokio::test]
  async fn buffered_reply_is_json() {
    let app = app(vec![(DIRECT_PATH, handler(false, vec!["Hi there"]))]);
    let res = app
      .oneshot(post(DIRECT_PATH, r#"{"message":"hi","sessionId":"s1"}"#))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(res).await).unwrap();
    assert_eq!(json["answer"], "Hi there");
    assert_eq!(json["sessionId"], "s1");
  }

  #[tokio::test]
  async fn empty_message_is_bad_request() {
    let app = app(vec![(PROXIED_PATH, handler(true, vec!["x"]))]);
    let res = app
      .oneshot(post(PROXIED_PATH, r#"{"message":"   ","sessionId":"s1"}"#))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_str(&body_string(res).await).unwrap();
    assert_eq!(json["code"], "invalid_request");
  }

  #[tokio::test]
  async fn malformed_json_is_bad_request() {
    let app = app(vec![(PROXIED_PATH, handler(true, vec!["x"]))]);
    let res = app.oneshot(post(PROXIED_PATH, "{not json")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn empty_generation_is_success_shaped() {
    let app = app(vec![(PROXIED_PATH, handler(true, vec![]))]);
    let res = app
      .oneshot(post(PROXIED_PATH, r#"{"message":"hi","sessionId":"s1"}"#))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(res).await).unwrap();
    assert_eq!(json["error"], EMPTY_RESPONSE_CODE);
    assert!(!json["answer"].as_str().unwrap().is_empty());
  }

  #[tokio::test]
  async fn get_reports_status_and_health_is_up() {
    let app = app(vec![(PROXIED_PATH, handler(true, vec!["x"]))]);
    let res = app
      .clone()
      .oneshot(Request::builder().uri(PROXIED_PATH).body(Body::empty()).unwrap())
      .await
      .unwrap();
    let json: serde_json::Value = serde_json::from_str(&body_string(res).await).unwrap();
    assert_eq!(json["provider"], "anthropic");
    assert_eq!(json["model"], "claude-test");
    assert_eq!(json["container"], "portfolio");
    assert_eq!(json["streaming"], true);

    let res = app
      .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
  }
}
