use std::fmt::Display;

use async_stream::stream;
use eventsource_stream::{EventStreamError, Eventsource};
use serde_json::Value;
use tokio_stream::{Stream, StreamExt};

use crate::error::ChatError;
use crate::provider::TextStream;

enum Frame {
  Text(String),
  Skip,
  Done,
  Failed(ChatError),
}

fn interpret<F>(data: &str, extract: &F) -> Frame
where
  F: Fn(&Value) -> Option<String>,
{
  let data = data.trim();
  if data == "[DONE]" {
    return Frame::Done;
  }
  if data.is_empty() {
    return Frame::Skip;
  }
  let value: Value = match serde_json::from_str(data) {
    Ok(value) => value,
    Err(err) => {
      tracing::debug!(error = %err, "skipping non-JSON stream frame");
      return Frame::Skip;
    }
  };
  if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
    let message = error["message"]
      .as_str()
      .or_else(|| error.as_str())
      .unwrap_or("provider reported an error mid-stream")
      .to_string();
    return Frame::Failed(ChatError::Upstream { status: 500, message });
  }
  match extract(&value) {
    Some(text) if !text.is_empty() => Frame::Text(text),
    _ => Frame::Skip,
  }
}

/// Turns a streaming provider response into a stream of text deltas, using
/// `extract` to pull the delta out of each JSON frame.
pub fn text_stream<F>(response: reqwest::Response, extract: F) -> TextStream
where
  F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
{
  decode_events(response.bytes_stream(), extract)
}

fn decode_events<S, B, E, F>(bytes: S, extract: F) -> TextStream
where
  S: Stream<Item = Result<B, E>> + Send + 'static,
  B: AsRef<[u8]> + Send + 'static,
  E: Into<ChatError> + Display + Send + 'static,
  F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
{
  let mut events = Box::pin(bytes.eventsource());
  let stream = stream! {
    while let Some(item) = events.next().await {
      let event = match item {
        Ok(event) => event,
        Err(err) => {
          yield Err(stream_error(err));
          return;
        }
      };
      match interpret(&event.data, &extract) {
        Frame::Text(text) => {
          yield Ok(text);
        }
        Frame::Skip => {}
        Frame::Done => return,
        Frame::Failed(err) => {
          yield Err(err);
          return;
        }
      }
    }
  };
  Box::pin(stream)
}

fn stream_error<E>(err: EventStreamError<E>) -> ChatError
where
  E: Into<ChatError> + Display,
{
  match err {
    EventStreamError::Transport(err) => err.into(),
    other => ChatError::Upstream {
      status: 502,
      message: format!("malformed event stream: {other}"),
    },
  }
}
