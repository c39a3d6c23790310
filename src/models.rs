use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Assistant,
  System,
}

impl Role {
  pub fn parse(value: &str) -> Option<Self> {
    match value.trim().to_ascii_lowercase().as_str() {
      "user" => Some(Role::User),
      "assistant" => Some(Role::Assistant),
      "system" => Some(Role::System),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Role::User => "user",
      Role::Assistant => "assistant",
      Role::System => "system",
    }
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A single conversation turn in canonical form.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
  pub role: Role,
  pub content: String,
  pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
  pub fn new(role: Role, content: impl Into<String>) -> Self {
    Self {
      role,
      content: content.into(),
      timestamp: Utc::now(),
    }
  }

  pub fn user(content: impl Into<String>) -> Self {
    Self::new(Role::User, content)
  }

  pub fn assistant(content: impl Into<String>) -> Self {
    Self::new(Role::Assistant, content)
  }
}

/// Message content as it arrives over the wire: either a plain string or a
/// list of segments (`[{"type": "text", "text": "..."}]`). Anything else
/// lands in `Other` and normalises to no text.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
  Text(String),
  Parts(Vec<ContentPart>),
  Other(Value),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ContentPart {
  Text { text: String },
  Bare(String),
  Other(Value),
}

impl MessageContent {
  pub fn into_text(self) -> String {
    match self {
      MessageContent::Text(text) => text,
      MessageContent::Parts(parts) => parts
        .into_iter()
        .filter_map(|part| match part {
          ContentPart::Text { text } | ContentPart::Bare(text) => Some(text),
          ContentPart::Other(_) => None,
        })
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" "),
      MessageContent::Other(_) => String::new(),
    }
  }
}

/// History entry as supplied by the caller, before normalisation. Every
/// field accepts any JSON so that one bad entry is dropped by
/// [`IncomingMessage::normalize`] instead of failing the whole request.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct IncomingMessage {
  #[serde(default)]
  pub role: Value,
  #[serde(default)]
  pub content: Option<MessageContent>,
  #[serde(default, deserialize_with = "lenient_timestamp")]
  pub timestamp: Option<DateTime<Utc>>,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = Option::<Value>::deserialize(deserializer)?;
  Ok(raw.and_then(|v| serde_json::from_value(v).ok()))
}

/// Entries that are not even objects are skipped here.
fn lenient_history<'de, D>(deserializer: D) -> Result<Option<Vec<IncomingMessage>>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = Option::<Vec<Value>>::deserialize(deserializer)?;
  Ok(raw.map(|entries| {
    entries
      .into_iter()
      .filter_map(|entry| serde_json::from_value(entry).ok())
      .collect()
  }))
}

impl IncomingMessage {
  /// Returns `None` for unknown or non-string roles and blank content.
  pub fn normalize(self) -> Option<ChatMessage> {
    let role = self.role.as_str().and_then(Role::parse)?;
    let content = self.content.map(MessageContent::into_text).unwrap_or_default();
    if content.trim().is_empty() {
      return None;
    }
    Some(ChatMessage {
      role,
      content,
      timestamp: self.timestamp.unwrap_or_else(Utc::now),
    })
  }
}

impl From<&ChatMessage> for IncomingMessage {
  fn from(msg: &ChatMessage) -> Self {
    Self {
      role: Value::from(msg.role.as_str()),
      content: Some(MessageContent::Text(msg.content.clone())),
      timestamp: Some(msg.timestamp),
    }
  }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub session_id: Option<String>,
  #[serde(default, deserialize_with = "lenient_history")]
  pub history: Option<Vec<IncomingMessage>>,
}

impl ChatRequest {
  pub fn new(message: impl Into<String>, session_id: impl Into<String>) -> Self {
    Self {
      message: Some(message.into()),
      session_id: Some(session_id.into()),
      history: None,
    }
  }

  pub fn with_history(mut self, history: &[ChatMessage]) -> Self {
    self.history = Some(history.iter().map(IncomingMessage::from).collect());
    self
  }
}

/// Summary of a retrieved document returned alongside an answer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Source {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  pub summary: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub score: Option<f64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
  pub answer: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sources: Option<Vec<Source>>,
  pub session_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StatusResponse {
  pub status: String,
  pub mode: String,
  pub provider: String,
  pub model: String,
  pub container: String,
  pub streaming: bool,
}
