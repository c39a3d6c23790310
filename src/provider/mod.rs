//! LLM provider selection and the text-generation capability.
//!
//! Every provider implements [`TextGenerator`]; [`build_generator`] is the
//! registry that turns a validated [`ProviderConfig`] into a strategy
//! instance. OpenAI, Groq and OpenRouter share the chat-completions wire
//! format, Anthropic and Google get their own adapters.

mod anthropic;
mod google;
mod openai;
pub mod sse;

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_stream::Stream;

use crate::error::{ChatError, Result};
use crate::prompt::PromptMessage;

pub use anthropic::AnthropicGenerator;
pub use google::GoogleGenerator;
pub use openai::OpenAiCompatibleGenerator;

/// Base of the Supermemory memory router. The provider's own base URL is
/// appended as a path.
pub const MEMORY_ROUTER_BASE: &str = "https://api.supermemory.ai/v3";
pub const MEMORY_API_KEY_HEADER: &str = "x-supermemory-api-key";
pub const MEMORY_USER_HEADER: &str = "x-sm-user-id";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
  Anthropic,
  OpenAi,
  Groq,
  OpenRouter,
  Google,
}

impl ProviderKind {
  pub const ALL: [ProviderKind; 5] = [
    ProviderKind::Anthropic,
    ProviderKind::OpenAi,
    ProviderKind::Groq,
    ProviderKind::OpenRouter,
    ProviderKind::Google,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ProviderKind::Anthropic => "anthropic",
      ProviderKind::OpenAi => "openai",
      ProviderKind::Groq => "groq",
      ProviderKind::OpenRouter => "openrouter",
      ProviderKind::Google => "google",
    }
  }

  pub fn supported_list() -> String {
    Self::ALL.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
  }

  pub fn default_model(&self) -> &'static str {
    match self {
      ProviderKind::Anthropic => "claude-sonnet-4-20250514",
      ProviderKind::OpenAi => "gpt-4o",
      ProviderKind::Groq => "llama-3.3-70b-versatile",
      ProviderKind::OpenRouter => "openai/gpt-4o-mini",
      ProviderKind::Google => "gemini-2.0-flash",
    }
  }

  pub fn direct_base_url(&self) -> &'static str {
    match self {
      ProviderKind::Anthropic => "https://api.anthropic.com/v1",
      ProviderKind::OpenAi => "https://api.openai.com/v1",
      ProviderKind::Groq => "https://api.groq.com/openai/v1",
      ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
      ProviderKind::Google => "https://generativelanguage.googleapis.com/v1beta",
    }
  }

  pub fn proxied_base_url(&self) -> String {
    format!("{}/{}", MEMORY_ROUTER_BASE, self.direct_base_url())
  }

  /// OpenRouter does not reliably accept multi-turn history in the format
  /// sent here, so only the system prompt and current user turn go out.
  pub fn keeps_history(&self) -> bool {
    !matches!(self, ProviderKind::OpenRouter)
  }
}

impl fmt::Display for ProviderKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ProviderKind {
  type Err = ChatError;

  fn from_str(s: &str) -> Result<Self> {
    let needle = s.trim().to_ascii_lowercase();
    Self::ALL
      .iter()
      .copied()
      .find(|kind| kind.as_str() == needle)
      .ok_or_else(|| ChatError::UnsupportedProvider(s.to_string()))
  }
}

#[derive(Clone, Debug)]
pub struct ProviderConfig {
  pub kind: ProviderKind,
  pub api_key: String,
  pub model: String,
  pub base_url: String,
  pub headers: Vec<(String, String)>,
}

impl ProviderConfig {
  pub fn new(kind: ProviderKind, api_key: Option<&str>, model: Option<&str>) -> Result<Self> {
    let api_key = api_key
      .map(str::trim)
      .filter(|k| !k.is_empty())
      .ok_or_else(|| ChatError::Config(format!("an API key is required for provider {kind}")))?;
    let model = model
      .map(str::trim)
      .filter(|m| !m.is_empty())
      .unwrap_or(kind.default_model());
    Ok(Self {
      kind,
      api_key: api_key.to_string(),
      model: model.to_string(),
      base_url: kind.direct_base_url().to_string(),
      headers: Vec::new(),
    })
  }

  pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
    self.base_url = base_url.into().trim_end_matches('/').to_string();
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Routes generation through the memory router, which injects retrieved
  /// context and persists the exchange under `container`.
  pub fn via_memory_router(self, memory_api_key: &str, container: &str) -> Self {
    let base_url = self.kind.proxied_base_url();
    self.with_base_url(base_url).with_memory_headers(memory_api_key, container)
  }

  pub fn with_memory_headers(self, memory_api_key: &str, container: &str) -> Self {
    self
      .with_header(MEMORY_API_KEY_HEADER, memory_api_key)
      .with_header(MEMORY_USER_HEADER, container)
  }

  pub fn targets_memory_router(&self) -> bool {
    self.base_url.starts_with(MEMORY_ROUTER_BASE)
  }

  pub(crate) fn extra_headers(&self) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in &self.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|err| ChatError::Config(format!("invalid header name {name}: {err}")))?;
      let value = HeaderValue::from_str(value)
        .map_err(|err| ChatError::Config(format!("invalid value for header {name}: {err}")))?;
      map.insert(name, value);
    }
    Ok(map)
  }
}

#[derive(Clone, Debug)]
pub struct GenerationRequest {
  pub system: String,
  pub messages: Vec<PromptMessage>,
  pub temperature: f32,
  pub max_tokens: u32,
}

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait TextGenerator: Send + Sync {
  fn kind(&self) -> ProviderKind;

  fn model(&self) -> &str;

  /// Waits for the full completion.
  async fn generate(&self, request: &GenerationRequest) -> Result<String>;

  /// Yields text deltas as the provider produces them.
  async fn generate_stream(&self, request: &GenerationRequest) -> Result<TextStream>;
}

pub fn build_generator(config: ProviderConfig) -> Result<Arc<dyn TextGenerator>> {
  tracing::debug!(provider = %config.kind, model = %config.model, base_url = %config.base_url, "building generator");
  let generator: Arc<dyn TextGenerator> = match config.kind {
    ProviderKind::Anthropic => Arc::new(AnthropicGenerator::new(config)?),
    ProviderKind::Google => Arc::new(GoogleGenerator::new(config)?),
    ProviderKind::OpenAi | ProviderKind::Groq | ProviderKind::OpenRouter => {
      Arc::new(OpenAiCompatibleGenerator::new(config)?)
    }
  };
  Ok(generator)
}

pub(crate) fn http_client(headers: HeaderMap) -> Result<reqwest::Client> {
  reqwest::Client::builder()
    .default_headers(headers)
    .build()
    .map_err(|err| ChatError::Config(format!("failed to build HTTP client: {err}")))
}

pub(crate) async fn send_checked(builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
  let resp = builder.send().await?;
  let status = resp.status();
  if status.is_success() {
    return Ok(resp);
  }
  let body = resp.text().await.unwrap_or_default();
  tracing::warn!(status = %status, body = %body, "provider returned an error");
  Err(ChatError::from_upstream(status, &body))
}

/// Folds the system prompt with any `system` turns from history, and merges
/// consecutive turns of the same role so providers that require strict
/// user/assistant alternation accept the list. Leading assistant turns are
/// dropped for the same reason.
pub(crate) fn fold_for_alternation(request: &GenerationRequest) -> (String, Vec<PromptMessage>) {
  use crate::models::Role;

  let mut system = request.system.clone();
  let mut turns: Vec<PromptMessage> = Vec::new();
  for msg in &request.messages {
    if msg.role == Role::System {
      if !system.is_empty() {
        system.push_str("\n\n");
      }
      system.push_str(&msg.content);
      continue;
    }
    if turns.is_empty() && msg.role == Role::Assistant {
      continue;
    }
    match turns.last_mut() {
      Some(last) if last.role == msg.role => {
        last.content.push_str("\n\n");
        last.content.push_str(&msg.content);
      }
      _ => turns.push(msg.clone()),
    }
  }
  (system, turns)
}
