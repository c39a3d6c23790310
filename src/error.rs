use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::provider::ProviderKind;

#[derive(Debug, Error)]
pub enum ChatError {
  #[error("configuration error: {0}")]
  Config(String),

  #[error("unsupported provider \"{0}\"; supported: {}", ProviderKind::supported_list())]
  UnsupportedProvider(String),

  #[error("{0}")]
  InvalidRequest(String),

  #[error("authentication failed: {0}. Check your LLM and Supermemory API keys.")]
  Unauthorized(String),

  #[error("not found: {0}. Check the configured model name.")]
  NotFound(String),

  #[error("upstream error ({status}): {message}")]
  Upstream { status: u16, message: String },

  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),

  #[error("internal error: {0}")]
  Internal(String),
}

impl ChatError {
  /// Maps a non-success upstream status and body onto the error taxonomy.
  pub fn from_upstream(status: reqwest::StatusCode, body: &str) -> Self {
    let message = upstream_message(body).unwrap_or_else(|| {
      if body.trim().is_empty() {
        status.to_string()
      } else {
        body.trim().to_string()
      }
    });
    match status.as_u16() {
      401 | 403 => ChatError::Unauthorized(message),
      404 => ChatError::NotFound(message),
      code => ChatError::Upstream { status: code, message },
    }
  }

  pub fn status_code(&self) -> StatusCode {
    match self {
      ChatError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
      ChatError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      ChatError::NotFound(_) => StatusCode::NOT_FOUND,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  pub fn code(&self) -> &'static str {
    match self {
      ChatError::Config(_) | ChatError::UnsupportedProvider(_) => "config_error",
      ChatError::InvalidRequest(_) => "invalid_request",
      ChatError::Unauthorized(_) => "unauthorized",
      ChatError::NotFound(_) => "not_found",
      ChatError::Upstream { .. } | ChatError::Network(_) => "upstream_error",
      ChatError::Internal(_) => "internal_error",
    }
  }

  fn public_message(&self) -> String {
    match self {
      ChatError::Internal(msg) if msg.trim().is_empty() => "internal error".to_string(),
      other => other.to_string(),
    }
  }
}

impl IntoResponse for ChatError {
  fn into_response(self) -> Response {
    error_response(self.status_code(), self.code(), &self.public_message())
  }
}

pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
  let body = Json(serde_json::json!({ "error": message, "code": code }));
  (status, body).into_response()
}

// Providers nest their message differently: {"error": {"message"}} for OpenAI,
// Anthropic and Google; {"error": "..."} or {"message": "..."} elsewhere.
fn upstream_message(body: &str) -> Option<String> {
  let value: serde_json::Value = serde_json::from_str(body).ok()?;
  value["error"]["message"]
    .as_str()
    .or_else(|| value["error"].as_str())
    .or_else(|| value["message"].as_str())
    .map(|s| s.to_string())
}

pub type Result<T> = std::result::Result<T, ChatError>;
