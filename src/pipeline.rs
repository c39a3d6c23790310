//! The chat request pipeline.
//!
//! A [`ChatHandler`] validates a request, optionally retrieves context,
//! assembles a prompt and drives a [`TextGenerator`]. Three variants share
//! the same flow and differ in who supplies context and who persists the
//! conversation:
//!
//! * [`HandlerMode::Manual`]: retrieval and prompt assembly happen here, the
//!   server-side [`SessionStore`] is the source of truth, OpenAI only,
//!   buffered only.
//! * [`HandlerMode::Proxied`]: the memory router injects context and stores
//!   the exchange; this side forwards the client's history as-is.
//! * [`HandlerMode::Direct`]: retrieval and assembly happen here, the
//!   provider is called directly and nothing is persisted anywhere.

use std::fmt;
use std::sync::Arc;

use async_stream::stream;
use tokio_stream::StreamExt;

use crate::config::{HandlerConfig, ValidatedConfig};
use crate::error::{ChatError, Result};
use crate::models::{ChatMessage, ChatRequest, ChatResponse, IncomingMessage, StatusResponse};
use crate::prompt::{self, Prompt};
use crate::provider::{self, GenerationRequest, ProviderConfig, ProviderKind, TextGenerator, TextStream};
use crate::retriever::{self, DocumentRetriever, RetrievedDocument, SupermemoryRetriever};
use crate::session::{InMemorySessionStore, SessionStore};

pub const SOURCE_COUNT: usize = 3;
pub const EMPTY_RESPONSE_CODE: &str = "empty_response";
pub const EMPTY_RESPONSE_MESSAGE: &str = "Sorry, I couldn't come up with an answer this time: the language model \
returned an empty reply. This usually points at the model name or provider settings, so it's worth \
checking the configuration. Please try asking again in a moment.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerMode {
  Manual,
  Proxied,
  Direct,
}

impl HandlerMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      HandlerMode::Manual => "manual",
      HandlerMode::Proxied => "proxied",
      HandlerMode::Direct => "direct",
    }
  }

  fn retrieves_context(&self) -> bool {
    !matches!(self, HandlerMode::Proxied)
  }
}

impl fmt::Display for HandlerMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
  Idle,
  Validating,
  Retrieving,
  Assembling,
  Generating,
  Streaming,
  Buffering,
  Completed,
  Failed,
}

struct StageLog {
  mode: HandlerMode,
  current: Stage,
}

impl StageLog {
  fn new(mode: HandlerMode) -> Self {
    Self {
      mode,
      current: Stage::Idle,
    }
  }

  fn enter(&mut self, next: Stage) {
    tracing::debug!(mode = %self.mode, from = ?self.current, to = ?next, "pipeline stage");
    self.current = next;
  }
}

/// What the caller should send back: a finished JSON payload or a stream of
/// incremental text chunks.
pub enum ChatReply {
  Complete(ChatResponse),
  Stream { session_id: String, chunks: TextStream },
}

impl fmt::Debug for ChatReply {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChatReply::Complete(res) => f.debug_tuple("Complete").field(res).finish(),
      ChatReply::Stream { session_id, .. } => {
        f.debug_struct("Stream").field("session_id", session_id).finish_non_exhaustive()
      }
    }
  }
}

#[derive(Debug)]
pub struct ValidRequest {
  pub message: String,
  pub session_id: String,
  pub history: Vec<ChatMessage>,
}

pub fn validate_request(request: ChatRequest) -> Result<ValidRequest> {
  let message = request
    .message
    .ok_or_else(|| ChatError::InvalidRequest("message is required".to_string()))?;
  let message = message.trim();
  if message.is_empty() {
    return Err(ChatError::InvalidRequest("message must not be empty".to_string()));
  }
  let session_id = request
    .session_id
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty())
    .ok_or_else(|| ChatError::InvalidRequest("sessionId is required".to_string()))?;
  let history = request
    .history
    .unwrap_or_default()
    .into_iter()
    .filter_map(IncomingMessage::normalize)
    .collect();
  Ok(ValidRequest {
    message: message.to_string(),
    session_id,
    history,
  })
}

pub fn empty_response(session_id: String) -> ChatResponse {
  ChatResponse {
    answer: EMPTY_RESPONSE_MESSAGE.to_string(),
    sources: None,
    session_id,
    error: Some(EMPTY_RESPONSE_CODE.to_string()),
  }
}

pub struct ChatHandler {
  mode: HandlerMode,
  config: ValidatedConfig,
  generator: Arc<dyn TextGenerator>,
  retriever: Option<Arc<dyn DocumentRetriever>>,
  sessions: Option<Arc<dyn SessionStore>>,
}

impl ChatHandler {
  /// Retrieval-augmented handler backed by OpenAI with server-held history.
  pub fn manual(options: &HandlerConfig) -> Result<Self> {
    let mut options = options.clone();
    let selector = options
      .llm_provider
      .get_or_insert_with(|| ProviderKind::OpenAi.as_str().to_string());
    if selector.parse::<ProviderKind>()? != ProviderKind::OpenAi {
      return Err(ChatError::Config(format!(
        "the manual handler only supports the openai provider, got {selector}"
      )));
    }
    options.streaming = Some(false);
    let config = options.validate()?;
    let retriever = SupermemoryRetriever::new(&config.supermemory_api_key)?;
    let generator = provider::build_generator(config.provider.clone())?;
    Ok(
      Self::from_parts(HandlerMode::Manual, config, generator)
        .with_retriever(Arc::new(retriever))
        .with_session_store(Arc::new(InMemorySessionStore::default())),
    )
  }

  /// Handler that routes generation through the memory router.
  pub fn proxied(options: &HandlerConfig) -> Result<Self> {
    let config = options.validate()?;
    if options.base_url.is_some() {
      tracing::warn!("baseUrl is ignored by the proxied handler; the memory router URL is used");
    }
    let provider_config = ProviderConfig {
      base_url: config.provider.kind.direct_base_url().to_string(),
      ..config.provider.clone()
    }
    .via_memory_router(&config.supermemory_api_key, &config.container);
    let generator = provider::build_generator(provider_config)?;
    Ok(Self::from_parts(HandlerMode::Proxied, config, generator))
  }

  /// Read-only handler: retrieval here, generation direct, nothing stored.
  pub fn direct(options: &HandlerConfig) -> Result<Self> {
    let config = options.validate()?;
    let retriever = SupermemoryRetriever::new(&config.supermemory_api_key)?;
    let generator = provider::build_generator(direct_provider(&config))?;
    Ok(Self::from_parts(HandlerMode::Direct, config, generator).with_retriever(Arc::new(retriever)))
  }

  pub fn from_parts(
    mode: HandlerMode,
    config: ValidatedConfig,
    generator: Arc<dyn TextGenerator>,
  ) -> Self {
    Self {
      mode,
      config,
      generator,
      retriever: None,
      sessions: None,
    }
  }

  pub fn with_retriever(mut self, retriever: Arc<dyn DocumentRetriever>) -> Self {
    self.retriever = Some(retriever);
    self
  }

  /// Only the manual variant reads or writes the store.
  pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
    self.sessions = Some(sessions);
    self
  }

  pub fn mode(&self) -> HandlerMode {
    self.mode
  }

  pub fn streaming(&self) -> bool {
    self.config.streaming && self.mode != HandlerMode::Manual
  }

  pub fn status(&self) -> StatusResponse {
    StatusResponse {
      status: "ok".to_string(),
      mode: self.mode.as_str().to_string(),
      provider: self.generator.kind().as_str().to_string(),
      model: self.generator.model().to_string(),
      container: self.config.container.clone(),
      streaming: self.streaming(),
    }
  }

  pub async fn handle(&self, request: ChatRequest) -> Result<ChatReply> {
    let mut stages = StageLog::new(self.mode);
    let result = self.run(request, &mut stages).await;
    match &result {
      Ok(ChatReply::Complete(_)) => stages.enter(Stage::Completed),
      Ok(ChatReply::Stream { .. }) => {}
      Err(err) => {
        stages.enter(Stage::Failed);
        tracing::warn!(mode = %self.mode, error = %err, "chat pipeline failed");
      }
    }
    result
  }

  async fn run(&self, request: ChatRequest, stages: &mut StageLog) -> Result<ChatReply> {
    stages.enter(Stage::Validating);
    let request = validate_request(request)?;
    tracing::info!(
      mode = %self.mode,
      session_id = %request.session_id,
      history = request.history.len(),
      "chat request"
    );

    let history = self.history_for(&request).await;

    let documents = if self.mode.retrieves_context() {
      stages.enter(Stage::Retrieving);
      self.retrieve(&request.message).await
    } else {
      Vec::new()
    };

    stages.enter(Stage::Assembling);
    let prompt = self.assemble(&documents, &history, &request.message);
    let generation = GenerationRequest {
      system: prompt.system,
      messages: prompt.messages,
      temperature: self.config.temperature,
      max_tokens: self.config.max_tokens,
    };
    let sources = if documents.is_empty() {
      None
    } else {
      Some(retriever::top_sources(&documents, SOURCE_COUNT))
    };

    stages.enter(Stage::Generating);
    if self.streaming() {
      let chunks = self.generator.generate_stream(&generation).await?;
      stages.enter(Stage::Streaming);
      return commit_stream(request.session_id, chunks).await;
    }

    let answer = self.generator.generate(&generation).await?;
    stages.enter(Stage::Buffering);
    if answer.trim().is_empty() {
      tracing::warn!(mode = %self.mode, "provider returned an empty answer");
      return Ok(ChatReply::Complete(empty_response(request.session_id)));
    }

    if let (HandlerMode::Manual, Some(sessions)) = (self.mode, &self.sessions) {
      sessions
        .append(&request.session_id, ChatMessage::user(request.message.clone()))
        .await;
      sessions
        .append(&request.session_id, ChatMessage::assistant(answer.clone()))
        .await;
    }

    Ok(ChatReply::Complete(ChatResponse {
      answer,
      sources,
      session_id: request.session_id,
      error: None,
    }))
  }

  async fn history_for(&self, request: &ValidRequest) -> Vec<ChatMessage> {
    if let (HandlerMode::Manual, Some(sessions)) = (self.mode, &self.sessions) {
      let stored = sessions.get(&request.session_id).await;
      if !stored.is_empty() {
        return stored;
      }
    }
    request.history.clone()
  }

  async fn retrieve(&self, query: &str) -> Vec<RetrievedDocument> {
    match &self.retriever {
      Some(retriever) => {
        retriever::retrieve_or_empty(retriever.as_ref(), query, &self.config.container).await
      }
      None => Vec::new(),
    }
  }

  fn assemble(&self, documents: &[RetrievedDocument], history: &[ChatMessage], message: &str) -> Prompt {
    let system = self.config.system_prompt.as_deref();
    if self.mode.retrieves_context() {
      let context = retriever::build_context(documents);
      prompt::assemble(system, &context, history, message)
    } else {
      prompt::assemble_passthrough(system, history, message)
    }
  }
}

/// A `baseUrl` pointing at the memory router still needs its key and
/// container headers, or the router rejects the call.
fn direct_provider(config: &ValidatedConfig) -> ProviderConfig {
  let provider = config.provider.clone();
  if !provider.targets_memory_router() {
    return provider;
  }
  tracing::warn!(
    container = %config.container,
    "direct handler baseUrl targets the memory router; the router will store this conversation"
  );
  provider.with_memory_headers(&config.supermemory_api_key, &config.container)
}

/// Buffers chunks until they contain visible text before committing to a
/// streamed reply, so a stream that produces nothing but whitespace becomes
/// the empty-response diagnostic, as a blank buffered answer does.
async fn commit_stream(session_id: String, mut chunks: TextStream) -> Result<ChatReply> {
  let mut first = String::new();
  while first.trim().is_empty() {
    match chunks.next().await {
      Some(Ok(chunk)) => first.push_str(&chunk),
      Some(Err(err)) => return Err(err),
      None => {
        tracing::warn!(session_id = %session_id, "provider stream ended without any text");
        return Ok(ChatReply::Complete(empty_response(session_id)));
      }
    }
  }

  let log_session = session_id.clone();
  let stream = stream! {
    let mut total = first.len();
    yield Ok(first);
    while let Some(item) = chunks.next().await {
      match item {
        Ok(chunk) => {
          total += chunk.len();
          yield Ok(chunk);
        }
        Err(err) => {
          tracing::warn!(session_id = %log_session, error = %err, "provider stream failed mid-response");
          yield Err(err);
          return;
        }
      }
    }
    tracing::debug!(session_id = %log_session, bytes = total, "stream completed");
  };
  Ok(ChatReply::Stream {
    session_id,
    chunks: Box::pin(stream),
  })
}
