use std::pin::Pin;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tokio_stream::{Stream, StreamExt};

use crate::models::{ChatRequest, ChatResponse};

#[derive(Debug, thiserror::Error)]
pub enum WidgetError {
  #[error("request failed: {0}")]
  Http(#[from] reqwest::Error),
  #[error("server returned {status}: {message}")]
  Status { status: u16, message: String },
  #[error("reply ended without any text")]
  EmptyReply,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, WidgetError>> + Send>>;

/// What the chat endpoint sent back: a JSON body, or a chunked text body
/// still being read.
pub enum Reply {
  Buffered(ChatResponse),
  Streamed(ByteStream),
}

impl std::fmt::Debug for Reply {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Reply::Buffered(res) => f.debug_tuple("Buffered").field(res).finish(),
      Reply::Streamed(_) => f.write_str("Streamed(..)"),
    }
  }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
  async fn send(&self, request: &ChatRequest) -> Result<Reply, WidgetError>;
}

/// Posts to a chat endpoint over HTTP.
pub struct HttpTransport {
  client: reqwest::Client,
  endpoint: String,
}

impl HttpTransport {
  pub fn new(endpoint: impl Into<String>) -> Self {
    Self {
      client: reqwest::Client::new(),
      endpoint: endpoint.into(),
    }
  }
}

#[async_trait]
impl ChatTransport for HttpTransport {
  async fn send(&self, request: &ChatRequest) -> Result<Reply, WidgetError> {
    let res = self.client.post(&self.endpoint).json(request).send().await?;
    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
      return Err(WidgetError::Status {
        status: status.as_u16(),
        message,
      });
    }

    let is_json = res
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map_or(false, |v| v.starts_with("application/json"));
    if is_json {
      return Ok(Reply::Buffered(res.json::<ChatResponse>().await?));
    }

    let bytes = res
      .bytes_stream()
      .map(|chunk| chunk.map(|b| b.to_vec()).map_err(WidgetError::from));
    Ok(Reply::Streamed(Box::pin(bytes)))
  }
}
