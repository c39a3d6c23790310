use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};
use crate::provider::{ProviderConfig, ProviderKind};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Options accepted when constructing a chat handler. Everything is optional
/// at this layer; [`HandlerConfig::validate`] enforces the required fields.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct HandlerConfig {
  pub llm_provider: Option<String>,
  pub llm_api_key: Option<String>,
  pub llm_model: Option<String>,
  pub supermemory_api_key: Option<String>,
  pub supermemory_container: Option<String>,
  pub system_prompt: Option<String>,
  pub temperature: Option<f32>,
  pub max_tokens: Option<u32>,
  pub streaming: Option<bool>,
  pub base_url: Option<String>,
  pub openrouter_referer: Option<String>,
  pub openrouter_title: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ValidatedConfig {
  pub provider: ProviderConfig,
  pub supermemory_api_key: String,
  pub container: String,
  pub system_prompt: Option<String>,
  pub temperature: f32,
  pub max_tokens: u32,
  pub streaming: bool,
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
  value
    .as_deref()
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(str::to_string)
    .ok_or_else(|| ChatError::Config(format!("{name} is required")))
}

impl HandlerConfig {
  pub fn validate(&self) -> Result<ValidatedConfig> {
    let kind: ProviderKind = required(&self.llm_provider, "llmProvider")?.parse()?;
    let api_key = required(&self.llm_api_key, "llmApiKey")?;
    let supermemory_api_key = required(&self.supermemory_api_key, "supermemoryApiKey")?;
    let container = required(&self.supermemory_container, "supermemoryContainer")?;

    let temperature = self.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    if !(0.0..=2.0).contains(&temperature) {
      return Err(ChatError::Config(format!(
        "temperature must be between 0 and 2, got {temperature}"
      )));
    }
    let max_tokens = self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    if max_tokens == 0 {
      return Err(ChatError::Config("maxTokens must be greater than 0".to_string()));
    }

    let mut provider = ProviderConfig::new(kind, Some(&api_key), self.llm_model.as_deref())?;
    if let Some(base_url) = self.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
      provider = provider.with_base_url(base_url.trim());
    }
    if kind == ProviderKind::OpenRouter {
      if let Some(referer) = &self.openrouter_referer {
        provider = provider.with_header("HTTP-Referer", referer.as_str());
      }
      if let Some(title) = &self.openrouter_title {
        provider = provider.with_header("X-Title", title.as_str());
      }
    }
    provider.extra_headers()?;

    Ok(ValidatedConfig {
      provider,
      supermemory_api_key,
      container,
      system_prompt: self.system_prompt.clone(),
      temperature,
      max_tokens,
      streaming: self.streaming.unwrap_or(true),
    })
  }

  /// Fills unset secrets from `LLM_API_KEY`, `SUPERMEMORY_API_KEY` and
  /// `SUPERMEMORY_CONTAINER`.
  pub fn apply_env(&mut self) {
    fill_from_env(&mut self.llm_api_key, "LLM_API_KEY");
    fill_from_env(&mut self.supermemory_api_key, "SUPERMEMORY_API_KEY");
    fill_from_env(&mut self.supermemory_container, "SUPERMEMORY_CONTAINER");
  }
}

fn fill_from_env(slot: &mut Option<String>, var: &str) {
  if slot.as_deref().map_or(true, |v| v.trim().is_empty()) {
    if let Ok(value) = std::env::var(var) {
      *slot = Some(value);
    }
  }
}

/// Server configuration file. Each handler section is optional; a handler
/// is mounted only when its section is present.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
  #[serde(default = "default_bind")]
  pub bind: SocketAddr,
  #[serde(default)]
  pub log_file: Option<PathBuf>,
  #[serde(default)]
  pub manual: Option<HandlerConfig>,
  #[serde(default)]
  pub proxied: Option<HandlerConfig>,
  #[serde(default)]
  pub direct: Option<HandlerConfig>,
}

fn default_bind() -> SocketAddr {
  SocketAddr::from(([127, 0, 0, 1], 8787))
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      bind: default_bind(),
      log_file: None,
      manual: None,
      proxied: Some(HandlerConfig {
        llm_provider: Some(ProviderKind::OpenAi.as_str().to_string()),
        ..Default::default()
      }),
      direct: None,
    }
  }
}

impl AppConfig {
  pub fn apply_env(&mut self) {
    for handler in [&mut self.manual, &mut self.proxied, &mut self.direct]
      .into_iter()
      .flatten()
    {
      handler.apply_env();
    }
  }
}

pub fn load_or_init(path: &Path) -> anyhow::Result<AppConfig> {
  let mut config = if path.exists() {
    let data = std::fs::read_to_string(path)
      .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str::<AppConfig>(&data)
      .with_context(|| format!("invalid config {}", path.display()))?
  } else {
    let config = AppConfig::default();
    save_config(path, &config)?;
    tracing::info!(path = %path.display(), "wrote default config");
    config
  };
  config.apply_env();
  Ok(config)
}

pub fn save_config(path: &Path, config: &AppConfig) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(config)?;
  std::fs::write(path, json)?;
  Ok(())
}
