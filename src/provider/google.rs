use async_trait::async_trait;
use reqwest::header::HeaderValue;
use serde_json::{json, Value};

use crate::error::{ChatError, Result};
use crate::models::Role;
use crate::provider::{
  fold_for_alternation, http_client, send_checked, sse, GenerationRequest, ProviderConfig,
  ProviderKind, TextGenerator, TextStream,
};

/// Gemini `generateContent` adapter.
pub struct GoogleGenerator {
  config: ProviderConfig,
  client: reqwest::Client,
}

impl GoogleGenerator {
  pub fn new(config: ProviderConfig) -> Result<Self> {
    let mut headers = config.extra_headers()?;
    headers.insert(
      "x-goog-api-key",
      HeaderValue::from_str(&config.api_key)
        .map_err(|err| ChatError::Config(format!("invalid API key header value: {err}")))?,
    );
    let client = http_client(headers)?;
    Ok(Self { config, client })
  }

  fn endpoint(&self, stream: bool) -> String {
    if stream {
      format!(
        "{}/models/{}:streamGenerateContent?alt=sse",
        self.config.base_url, self.config.model
      )
    } else {
      format!("{}/models/{}:generateContent", self.config.base_url, self.config.model)
    }
  }
}

fn payload(request: &GenerationRequest) -> Value {
  let (system, turns) = fold_for_alternation(request);
  let contents: Vec<Value> = turns
    .into_iter()
    .map(|m| {
      let role = if m.role == Role::Assistant { "model" } else { "user" };
      json!({ "role": role, "parts": [{ "text": m.content }] })
    })
    .collect();
  let mut body = json!({
    "contents": contents,
    "generationConfig": {
      "temperature": request.temperature,
      "maxOutputTokens": request.max_tokens
    }
  });
  if !system.is_empty() {
    body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
  }
  body
}

fn candidate_text(value: &Value) -> Option<String> {
  let parts = value["candidates"][0]["content"]["parts"].as_array()?;
  Some(parts.iter().filter_map(|p| p["text"].as_str()).collect())
}

#[async_trait]
impl TextGenerator for GoogleGenerator {
  fn kind(&self) -> ProviderKind {
    ProviderKind::Google
  }

  fn model(&self) -> &str {
    &self.config.model
  }

  async fn generate(&self, request: &GenerationRequest) -> Result<String> {
    let resp = send_checked(self.client.post(self.endpoint(false)).json(&payload(request))).await?;
    let body: Value = resp.json().await?;
    Ok(candidate_text(&body).unwrap_or_default())
  }

  async fn generate_stream(&self, request: &GenerationRequest) -> Result<TextStream> {
    let resp = send_checked(self.client.post(self.endpoint(true)).json(&payload(request))).await?;
    Ok(sse::text_stream(resp, candidate_text))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::prompt::PromptMessage;
  use tokio_stream::StreamExt;
  use wiremock::matchers::{header, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[test]
  fn payload_maps_assistant_to_model_and_lifts_system() {
    let request = GenerationRequest {
      system: "persona".to_string(),
      messages: vec![
        PromptMessage::new(Role::User, "hi"),
        PromptMessage::new(Role::Assistant, "hello"),
        PromptMessage::new(Role::User, "projects?"),
      ],
      temperature: 0.5,
      max_tokens: 256,
    };
    let body = payload(&request);
    assert_eq!(body["contents"][1]["role"], "model");
    assert_eq!(body["systemInstruction"]["parts"][0]["text"], "persona");
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
  }

  #[tokio::test]
  async fn stream_uses_sse_endpoint() {
    let server = MockServer::start().await;
    let body = concat!(
      "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi \"}],\"role\":\"model\"}}]}\r\n\r\n",
      "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"there\"}],\"role\":\"model\"}}]}\r\n\r\n",
    );
    Mock::given(method("POST"))
      .and(path("/models/gemini-2.0-flash:streamGenerateContent"))
      .and(query_param("alt", "sse"))
      .and(header("x-goog-api-key", "g-key"))
      .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
      .mount(&server)
      .await;

    let config = ProviderConfig::new(ProviderKind::Google, Some("g-key"), None)
      .unwrap()
      .with_base_url(server.uri());
    let generator = GoogleGenerator::new(config).unwrap();
    let request = GenerationRequest {
      system: String::new(),
      messages: vec![PromptMessage::new(Role::User, "hi")],
      temperature: 0.7,
      max_tokens: 1024,
    };
    let stream = generator.generate_stream(&request).await.unwrap();
    let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
    assert_eq!(chunks.concat(), "Hi there");
  }
}
