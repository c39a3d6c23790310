use async_trait::async_trait;
use reqwest::header::HeaderValue;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ChatError, Result};
use crate::provider::{
  fold_for_alternation, http_client, send_checked, sse, GenerationRequest, ProviderConfig,
  ProviderKind, TextGenerator, TextStream,
};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicGenerator {
  config: ProviderConfig,
  client: reqwest::Client,
}

#[derive(Serialize)]
struct ApiMessage {
  role: &'static str,
  content: String,
}

#[derive(Serialize)]
struct MessageRequest<'a> {
  model: &'a str,
  #[serde(skip_serializing_if = "String::is_empty")]
  system: String,
  messages: Vec<ApiMessage>,
  max_tokens: u32,
  temperature: f32,
  stream: bool,
}

impl AnthropicGenerator {
  pub fn new(config: ProviderConfig) -> Result<Self> {
    let mut headers = config.extra_headers()?;
    headers.insert(
      "x-api-key",
      HeaderValue::from_str(&config.api_key)
        .map_err(|err| ChatError::Config(format!("invalid API key header value: {err}")))?,
    );
    headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
    let client = http_client(headers)?;
    Ok(Self { config, client })
  }

  fn endpoint(&self) -> String {
    format!("{}/messages", self.config.base_url)
  }

  fn payload<'a>(&'a self, request: &GenerationRequest, stream: bool) -> MessageRequest<'a> {
    let (system, turns) = fold_for_alternation(request);
    MessageRequest {
      model: &self.config.model,
      system,
      messages: turns
        .into_iter()
        .map(|m| ApiMessage {
          role: m.role.as_str(),
          content: m.content,
        })
        .collect(),
      max_tokens: request.max_tokens,
      temperature: request.temperature,
      stream,
    }
  }
}

fn delta_text(value: &Value) -> Option<String> {
  if value["type"].as_str() != Some("content_block_delta") {
    return None;
  }
  value["delta"]["text"].as_str().map(str::to_string)
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
  fn kind(&self) -> ProviderKind {
    ProviderKind::Anthropic
  }

  fn model(&self) -> &str {
    &self.config.model
  }

  async fn generate(&self, request: &GenerationRequest) -> Result<String> {
    let resp = send_checked(
      self
        .client
        .post(self.endpoint())
        .json(&self.payload(request, false)),
    )
    .await?;
    let body: Value = resp.json().await?;
    let text = body["content"]
      .as_array()
      .map(|blocks| {
        blocks
          .iter()
          .filter(|b| b["type"].as_str() == Some("text"))
          .filter_map(|b| b["text"].as_str())
          .collect::<String>()
      })
      .unwrap_or_default();
    Ok(text)
  }

  async fn generate_stream(&self, request: &GenerationRequest) -> Result<TextStream> {
    let resp = send_checked(
      self
        .client
        .post(self.endpoint())
        .json(&self.payload(request, true)),
    )
    .await?;
    Ok(sse::text_stream(resp, delta_text))
  }
}
