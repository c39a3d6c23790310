//! Client side of the chat: the embeddable widget's state machine.

mod decoder;
pub mod session_id;
mod transport;

use tokio_stream::StreamExt;

pub use decoder::Utf8StreamDecoder;
pub use transport::{ByteStream, ChatTransport, HttpTransport, Reply, WidgetError};

use crate::models::{ChatMessage, ChatRequest};

pub const THINKING_PLACEHOLDER: &str = "Thinking...";
pub const APOLOGY_MESSAGE: &str =
  "Sorry, I couldn't get a response right now. Please try again in a moment.";

/// Accumulated text of a streamed reply. `append` is a pure reducer: it
/// consumes the previous state and returns the next one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamAccumulator {
  text: String,
}

impl StreamAccumulator {
  pub fn append(self, chunk: &str) -> Self {
    let mut text = self.text;
    text.push_str(chunk);
    Self { text }
  }

  pub fn text(&self) -> &str {
    &self.text
  }

  pub fn is_empty(&self) -> bool {
    self.text.is_empty()
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expansion {
  Collapsed,
  Expanded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
  Idle,
  Sending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
  /// Blank input, or a request was already in flight.
  Ignored,
  Answered,
  Failed,
}

#[derive(Clone, Debug, Default)]
pub struct WidgetOptions {
  pub collapse_on_outside_click: bool,
}

pub struct ChatWidget {
  session_id: String,
  options: WidgetOptions,
  expansion: Expansion,
  turn: TurnState,
  transcript: Vec<ChatMessage>,
  input: String,
  error: Option<String>,
  scroll_anchor: Option<usize>,
}

impl ChatWidget {
  pub fn new(session_id: impl Into<String>, options: WidgetOptions) -> Self {
    Self {
      session_id: session_id.into(),
      options,
      expansion: Expansion::Collapsed,
      turn: TurnState::Idle,
      transcript: Vec::new(),
      input: String::new(),
      error: None,
      scroll_anchor: None,
    }
  }

  pub fn session_id(&self) -> &str {
    &self.session_id
  }

  pub fn expansion(&self) -> Expansion {
    self.expansion
  }

  pub fn turn(&self) -> TurnState {
    self.turn
  }

  pub fn transcript(&self) -> &[ChatMessage] {
    &self.transcript
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  /// Index of the message the view should keep scrolled into sight.
  pub fn scroll_anchor(&self) -> Option<usize> {
    self.scroll_anchor
  }

  pub fn input(&self) -> &str {
    &self.input
  }

  pub fn set_input(&mut self, text: impl Into<String>) {
    self.input = text.into();
  }

  pub fn focus(&mut self) {
    self.expansion = Expansion::Expanded;
  }

  pub fn click_outside(&mut self) {
    if self.options.collapse_on_outside_click {
      self.expansion = Expansion::Collapsed;
    }
  }

  /// Sends the current input and drives the transcript until the reply
  /// is complete. `render` is called after every visible change.
  pub async fn submit<T, F>(&mut self, transport: &T, mut render: F) -> SubmitOutcome
  where
    T: ChatTransport + ?Sized,
    F: FnMut(&[ChatMessage]),
  {
    let text = self.input.trim().to_string();
    if text.is_empty() || self.turn == TurnState::Sending {
      return SubmitOutcome::Ignored;
    }

    self.input.clear();
    self.error = None;
    self.expansion = Expansion::Expanded;
    self.turn = TurnState::Sending;

    let request = ChatRequest::new(text.as_str(), self.session_id.as_str()).with_history(&self.transcript);
    self.push(ChatMessage::user(text));
    self.push(ChatMessage::assistant(THINKING_PLACEHOLDER));
    render(&self.transcript);

    let outcome = match self.exchange(transport, &request, &mut render).await {
      Ok(()) => SubmitOutcome::Answered,
      Err(err) => {
        tracing::warn!(session_id = %self.session_id, error = %err, "chat request failed");
        self.replace_placeholder(APOLOGY_MESSAGE);
        self.error = Some(err.to_string());
        render(&self.transcript);
        SubmitOutcome::Failed
      }
    };
    self.turn = TurnState::Idle;
    outcome
  }

  async fn exchange<T, F>(&mut self, transport: &T, request: &ChatRequest, render: &mut F) -> Result<(), WidgetError>
  where
    T: ChatTransport + ?Sized,
    F: FnMut(&[ChatMessage]),
  {
    match transport.send(request).await? {
      Reply::Buffered(res) => {
        self.replace_placeholder(&res.answer);
        render(&self.transcript);
      }
      Reply::Streamed(mut body) => {
        let mut decoder = Utf8StreamDecoder::default();
        let mut acc = StreamAccumulator::default();
        while let Some(bytes) = body.next().await {
          let chunk = decoder.decode(&bytes?);
          if chunk.is_empty() {
            continue;
          }
          acc = acc.append(&chunk);
          self.replace_placeholder(acc.text());
          render(&self.transcript);
        }
        let tail = decoder.finish();
        if !tail.is_empty() {
          acc = acc.append(&tail);
          self.replace_placeholder(acc.text());
          render(&self.transcript);
        }
        if acc.is_empty() {
          return Err(WidgetError::EmptyReply);
        }
      }
    }
    Ok(())
  }

  fn push(&mut self, message: ChatMessage) {
    self.transcript.push(message);
    self.scroll_anchor = self.transcript.len().checked_sub(1);
  }

  fn replace_placeholder(&mut self, content: &str) {
    if let Some(last) = self.transcript.last_mut() {
      last.content = content.to_string();
    }
    self.scroll_anchor = self.transcript.len().checked_sub(1);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{ChatResponse, Role};
  use async_trait::async_trait;
  use std::sync::Mutex;

  enum Canned {
    Chunks(Vec<Vec<u8>>),
    Answer(&'static str),
    Fail,
    BrokenStream(&'static str),
  }

  struct FakeTransport {
    canned: Canned,
    seen: Mutex<Vec<ChatRequest>>,
  }

  impl FakeTransport {
    fn new(canned: Canned) -> Self {
      Self {
        canned,
        seen: Mutex::new(Vec::new()),
      }
    }
  }

  #[async_trait]
  impl ChatTransport for FakeTransport {
    async fn send(&self, request: &ChatRequest) -> Result<Reply, WidgetError> {
      self.seen.lock().unwrap().push(request.clone());
      match &self.canned {
        Canned::Chunks(chunks) => {
          let items: Vec<Result<Vec<u8>, WidgetError>> = chunks.iter().cloned().map(Ok).collect();
          Ok(Reply::Streamed(Box::pin(tokio_stream::iter(items))))
        }
        Canned::Answer(answer) => Ok(Reply::Buffered(ChatResponse {
          answer: answer.to_string(),
          sources: None,
          session_id: "s1".to_string(),
          error: None,
        })),
        Canned::BrokenStream(partial) => {
          let items: Vec<Result<Vec<u8>, WidgetError>> = vec![
            Ok(partial.as_bytes().to_vec()),
            Err(WidgetError::Status {
              status: 502,
              message: "stream reset".to_string(),
            }),
          ];
          Ok(Reply::Streamed(Box::pin(tokio_stream::iter(items))))
        }
        Canned::Fail => Err(WidgetError::Status {
          status: 500,
          message: "boom".to_string(),
        }),
      }
    }
  }

  fn chunks(parts: &[&str]) -> Canned {
    Canned::Chunks(parts.iter().map(|p| p.as_bytes().to_vec()).collect())
  }

  fn widget_with_input(text: &str) -> ChatWidget {
    let mut widget = ChatWidget::new("s1", WidgetOptions::default());
    widget.set_input(text);
    widget
  }

  #[test]
  fn accumulator_is_a_pure_reducer() {
    let start = StreamAccumulator::default();
    let next = start.clone().append("Hel");
    assert_eq!(start.text(), "");
    assert_eq!(next.text(), "Hel");
  }

  #[tokio::test]
  async fn streamed_chunks_render_progressively() {
    let transport = FakeTransport::new(chunks(&["Hel", "lo wo", "rld"]));
    let mut widget = widget_with_input("hi");
    let mut seen = Vec::new();
    let outcome = widget
      .submit(&transport, |t| seen.push(t.last().unwrap().content.clone()))
      .await;

    assert_eq!(outcome, SubmitOutcome::Answered);
    assert_eq!(seen, vec!["Thinking...", "Hel", "Hello wo", "Hello world"]);
    assert_eq!(widget.turn(), TurnState::Idle);
    assert_eq!(widget.transcript().len(), 2);
    assert_eq!(widget.scroll_anchor(), Some(1));
  }

  #[tokio::test]
  async fn split_multibyte_character_is_not_garbled() {
    let bytes = "caf\u{e9}".as_bytes();
    let split = Canned::Chunks(vec![bytes[..4].to_vec(), bytes[4..].to_vec()]);
    let transport = FakeTransport::new(split);
    let mut widget = widget_with_input("hi");
    widget.submit(&transport, |_| {}).await;
    assert_eq!(widget.transcript()[1].content, "caf\u{e9}");
  }

  #[tokio::test]
  async fn buffered_reply_replaces_placeholder_once() {
    let transport = FakeTransport::new(Canned::Answer("Hello!"));
    let mut widget = widget_with_input("  hi  ");
    let mut renders = 0;
    widget.submit(&transport, |_| renders += 1).await;

    assert_eq!(renders, 2);
    assert_eq!(widget.transcript()[0].content, "hi");
    assert_eq!(widget.transcript()[1].role, Role::Assistant);
    assert_eq!(widget.transcript()[1].content, "Hello!");
    assert_eq!(widget.expansion(), Expansion::Expanded);
    assert!(widget.input().is_empty());
  }

  #[tokio::test]
  async fn failure_shows_apology_and_banner() {
    let transport = FakeTransport::new(Canned::Fail);
    let mut widget = widget_with_input("hi");
    let outcome = widget.submit(&transport, |_| {}).await;

    assert_eq!(outcome, SubmitOutcome::Failed);
    assert_eq!(widget.transcript()[1].content, APOLOGY_MESSAGE);
    assert!(widget.error().unwrap().contains("500"));
    assert_eq!(widget.turn(), TurnState::Idle);
  }

  #[tokio::test]
  async fn broken_stream_replaces_partial_text_with_apology() {
    let transport = FakeTransport::new(Canned::BrokenStream("Hel"));
    let mut widget = widget_with_input("hi");
    let mut seen = Vec::new();
    let outcome = widget
      .submit(&transport, |t| seen.push(t.last().unwrap().content.clone()))
      .await;
    assert_eq!(outcome, SubmitOutcome::Failed);
    assert_eq!(seen, vec![THINKING_PLACEHOLDER, "Hel", APOLOGY_MESSAGE]);
    assert!(widget.error().is_some());
  }

  #[tokio::test]
  async fn empty_stream_counts_as_failure() {
    let transport = FakeTransport::new(Canned::Chunks(vec![]));
    let mut widget = widget_with_input("hi");
    assert_eq!(widget.submit(&transport, |_| {}).await, SubmitOutcome::Failed);
    assert_eq!(widget.transcript()[1].content, APOLOGY_MESSAGE);
  }

  #[tokio::test]
  async fn blank_input_is_ignored() {
    let transport = FakeTransport::new(Canned::Answer("x"));
    let mut widget = widget_with_input("   ");
    assert_eq!(widget.submit(&transport, |_| {}).await, SubmitOutcome::Ignored);
    assert!(widget.transcript().is_empty());
    assert!(transport.seen.lock().unwrap().is_empty());
    assert_eq!(widget.expansion(), Expansion::Collapsed);
  }

  #[tokio::test]
  async fn history_is_the_transcript_before_the_turn() {
    let transport = FakeTransport::new(Canned::Answer("second answer"));
    let mut widget = widget_with_input("first");
    widget.submit(&transport, |_| {}).await;
    widget.set_input("second");
    widget.submit(&transport, |_| {}).await;

    let seen = transport.seen.lock().unwrap();
    assert!(seen[0].history.as_ref().unwrap().is_empty());
    let history = seen[1].history.as_ref().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, "user");
    assert_eq!(seen[1].message.as_deref(), Some("second"));
    assert_eq!(seen[1].session_id.as_deref(), Some("s1"));
  }

  #[test]
  fn outside_click_collapses_only_when_enabled() {
    let mut widget = ChatWidget::new("s1", WidgetOptions::default());
    widget.focus();
    widget.click_outside();
    assert_eq!(widget.expansion(), Expansion::Expanded);

    let mut widget = ChatWidget::new(
      "s1",
      WidgetOptions {
        collapse_on_outside_click: true,
      },
    );
    widget.focus();
    widget.click_outside();
    assert_eq!(widget.expansion(), Expansion::Collapsed);
  }
}
