use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::ChatMessage;

pub const DEFAULT_SESSION_CAPACITY: usize = 20;

/// Server-held conversation history keyed by session id.
///
/// Implementations are best-effort: history may vanish on restart and
/// concurrent writers to one session race, last writer wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
  async fn get(&self, session_id: &str) -> Vec<ChatMessage>;

  async fn append(&self, session_id: &str, turn: ChatMessage);
}

pub struct InMemorySessionStore {
  capacity: usize,
  sessions: Mutex<HashMap<String, VecDeque<ChatMessage>>>,
}

impl InMemorySessionStore {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      sessions: Mutex::new(HashMap::new()),
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

impl Default for InMemorySessionStore {
  fn default() -> Self {
    Self::new(DEFAULT_SESSION_CAPACITY)
  }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
  async fn get(&self, session_id: &str) -> Vec<ChatMessage> {
    let sessions = self.sessions.lock().await;
    sessions
      .get(session_id)
      .map(|turns| turns.iter().cloned().collect())
      .unwrap_or_default()
  }

  async fn append(&self, session_id: &str, turn: ChatMessage) {
    let mut sessions = self.sessions.lock().await;
    let turns = sessions.entry(session_id.to_string()).or_default();
    turns.push_back(turn);
    while turns.len() > self.capacity {
      turns.pop_front();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn keeps_only_most_recent_turns_in_order() {
    let store = InMemorySessionStore::default();
    for i in 0..27 {
      store.append("s1", ChatMessage::user(format!("turn {i}"))).await;
    }
    let turns = store.get("s1").await;
    assert_eq!(turns.len(), 20);
    assert_eq!(turns.first().unwrap().content, "turn 7");
    assert_eq!(turns.last().unwrap().content, "turn 26");
    let contents: Vec<_> = turns.iter().map(|t| t.content.clone()).collect();
    let expected: Vec<_> = (7..27).map(|i| format!("turn {i}")).collect();
    assert_eq!(contents, expected);
  }

  #[tokio::test]
  async fn sessions_are_independent() {
    let store = InMemorySessionStore::new(2);
    store.append("a", ChatMessage::user("hi")).await;
    store.append("b", ChatMessage::user("hello")).await;
    assert_eq!(store.get("a").await.len(), 1);
    assert_eq!(store.get("b").await[0].content, "hello");
    assert!(store.get("missing").await.is_empty());
  }
}
