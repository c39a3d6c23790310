use serde::Serialize;

use crate::models::{ChatMessage, Role};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly assistant embedded in a developer's portfolio website. \
Answer questions about the developer's projects, skills, experience and background. \
Keep answers concise and conversational, and say so when you do not know something \
instead of inventing details.";

pub const GENERAL_KNOWLEDGE_FALLBACK: &str =
  "No relevant information was found in the portfolio knowledge base. Answer from general knowledge if appropriate.";

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct PromptMessage {
  pub role: Role,
  pub content: String,
}

impl PromptMessage {
  pub fn new(role: Role, content: impl Into<String>) -> Self {
    Self {
      role,
      content: content.into(),
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Prompt {
  pub system: String,
  pub messages: Vec<PromptMessage>,
}

/// Drops turns with blank content. Applying it twice yields the same list.
pub fn filter_history(history: &[ChatMessage]) -> Vec<ChatMessage> {
  history
    .iter()
    .filter(|m| !m.content.trim().is_empty())
    .cloned()
    .collect()
}

pub fn system_prompt(custom: Option<&str>) -> String {
  custom
    .map(str::trim)
    .filter(|p| !p.is_empty())
    .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    .to_string()
}

/// Current user turn framed around retrieved context, or around the
/// general-knowledge fallback when nothing was retrieved.
pub fn contextual_turn(context: &str, message: &str) -> String {
  if context.trim().is_empty() {
    format!("{GENERAL_KNOWLEDGE_FALLBACK}\n\nQuestion: {message}")
  } else {
    format!(
      "Context from the portfolio knowledge base:\n\n{context}\n\n\
       Use the context above to answer the question. If it does not cover the question, say so briefly \
       and answer from general knowledge where appropriate.\n\nQuestion: {message}"
    )
  }
}

pub fn assemble(
  custom_system: Option<&str>,
  context: &str,
  history: &[ChatMessage],
  message: &str,
) -> Prompt {
  build(custom_system, history, contextual_turn(context, message.trim()))
}

/// Used when the memory router injects context itself: the current turn is
/// the trimmed message untouched.
pub fn assemble_passthrough(
  custom_system: Option<&str>,
  history: &[ChatMessage],
  message: &str,
) -> Prompt {
  build(custom_system, history, message.trim().to_string())
}

fn build(custom_system: Option<&str>, history: &[ChatMessage], current: String) -> Prompt {
  let mut messages: Vec<PromptMessage> = filter_history(history)
    .into_iter()
    .map(|m| PromptMessage::new(m.role, m.content))
    .collect();
  messages.push(PromptMessage::new(Role::User, current));
  Prompt {
    system: system_prompt(custom_system),
    messages,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn history() -> Vec<ChatMessage> {
    vec![
      ChatMessage::user("Hi"),
      ChatMessage::assistant("   "),
      ChatMessage::assistant("Hello! Ask me about the projects."),
      ChatMessage::new(Role::System, ""),
    ]
  }

  #[test]
  fn filter_history_is_idempotent() {
    let once = filter_history(&history());
    let twice = filter_history(&once);
    assert_eq!(once.len(), 2);
    assert_eq!(once, twice);
  }

  #[test]
  fn context_is_prepended_to_current_turn() {
    let prompt = assemble(None, "Built a Rust compiler.", &history(), "  What did they build?  ");
    assert_eq!(prompt.system, DEFAULT_SYSTEM_PROMPT);
    assert_eq!(prompt.messages.len(), 3);
    let current = prompt.messages.last().unwrap();
    assert_eq!(current.role, Role::User);
    assert!(current.content.starts_with("Context from the portfolio knowledge base:"));
    assert!(current.content.contains("Built a Rust compiler."));
    assert!(current.content.ends_with("Question: What did they build?"));
  }

  #[test]
  fn empty_context_uses_general_knowledge_fallback() {
    let prompt = assemble(Some("Custom persona"), "", &[], "What is Rust?");
    assert_eq!(prompt.system, "Custom persona");
    assert_eq!(prompt.messages.len(), 1);
    assert!(prompt.messages[0].content.contains("Answer from general knowledge if appropriate"));
  }

  #[test]
  fn passthrough_keeps_trimmed_message() {
    let prompt = assemble_passthrough(Some("  "), &history(), "  hello  ");
    assert_eq!(prompt.system, DEFAULT_SYSTEM_PROMPT);
    assert_eq!(prompt.messages.last().unwrap().content, "hello");
  }
}
