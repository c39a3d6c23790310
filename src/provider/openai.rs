use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::Serialize;
use serde_json::Value;

use crate::error::{ChatError, Result};
use crate::models::Role;
use crate::provider::{
  http_client, send_checked, sse, GenerationRequest, ProviderConfig, ProviderKind, TextGenerator,
  TextStream,
};

/// Chat-completions adapter shared by OpenAI, Groq and OpenRouter.
pub struct OpenAiCompatibleGenerator {
  config: ProviderConfig,
  client: reqwest::Client,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct WireMessage {
  pub role: &'static str,
  pub content: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
  model: &'a str,
  messages: Vec<WireMessage>,
  temperature: f32,
  max_tokens: u32,
  stream: bool,
}

impl OpenAiCompatibleGenerator {
  pub fn new(config: ProviderConfig) -> Result<Self> {
    let mut headers = config.extra_headers()?;
    headers.insert(
      AUTHORIZATION,
      HeaderValue::from_str(&format!("Bearer {}", config.api_key))
        .map_err(|err| ChatError::Config(format!("invalid API key header value: {err}")))?,
    );
    let client = http_client(headers)?;
    Ok(Self { config, client })
  }

  fn endpoint(&self) -> String {
    format!("{}/chat/completions", self.config.base_url)
  }

  fn payload<'a>(&'a self, request: &GenerationRequest, stream: bool) -> ChatCompletionRequest<'a> {
    ChatCompletionRequest {
      model: &self.config.model,
      messages: wire_messages(self.config.kind, request),
      temperature: request.temperature,
      max_tokens: request.max_tokens,
      stream,
    }
  }
}

pub(crate) fn wire_messages(kind: ProviderKind, request: &GenerationRequest) -> Vec<WireMessage> {
  let mut out = Vec::with_capacity(request.messages.len() + 1);
  if !request.system.trim().is_empty() {
    out.push(WireMessage {
      role: Role::System.as_str(),
      content: request.system.clone(),
    });
  }
  if kind.keeps_history() {
    out.extend(request.messages.iter().map(|m| WireMessage {
      role: m.role.as_str(),
      content: m.content.clone(),
    }));
  } else if let Some(current) = request.messages.iter().rev().find(|m| m.role == Role::User) {
    out.push(WireMessage {
      role: Role::User.as_str(),
      content: current.content.clone(),
    });
  }
  out
}

fn delta_text(value: &Value) -> Option<String> {
  value["choices"][0]["delta"]["content"].as_str().map(str::to_string)
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
  fn kind(&self) -> ProviderKind {
    self.config.kind
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
    Ok(
      body["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string(),
    )
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
