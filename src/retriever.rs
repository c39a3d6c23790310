//! Document retrieval from the Supermemory search API.
//!
//! Search results come back in a few shapes (full documents, summaries,
//! chunk lists), so each hit is parsed leniently into a [`RetrievedDocument`]
//! and flattened into text segments. Retrieval never fails a chat request:
//! any error is logged and treated as "no documents".

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::Serialize;
use serde_json::Value;

use crate::error::{ChatError, Result};
use crate::models::Source;

pub const DEFAULT_MEMORY_BASE_URL: &str = "https://api.supermemory.ai";
pub const SEARCH_LIMIT: usize = 5;
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetrievedDocument {
  pub title: Option<String>,
  pub content: Option<String>,
  pub summary: Option<String>,
  pub metadata: Value,
  pub chunks: Vec<String>,
  pub score: Option<f64>,
}

impl RetrievedDocument {
  pub fn from_value(value: &Value) -> Self {
    let text = |v: &Value| v.as_str().map(str::to_string);
    let chunks = value["chunks"]
      .as_array()
      .map(|chunks| {
        chunks
          .iter()
          .filter_map(|c| {
            c.as_str()
              .or_else(|| c["content"].as_str())
              .or_else(|| c["text"].as_str())
              .map(str::to_string)
          })
          .collect()
      })
      .unwrap_or_default();
    Self {
      title: text(&value["title"]),
      content: text(&value["content"]),
      summary: text(&value["summary"]),
      metadata: value.get("metadata").cloned().unwrap_or(Value::Null),
      chunks,
      score: value["score"].as_f64(),
    }
  }

  /// Flattens the document into its non-empty text segments: content,
  /// summary, metadata summary or description, then chunk contents.
  pub fn segments(&self) -> Vec<String> {
    let metadata_summary = self.metadata["summary"]
      .as_str()
      .or_else(|| self.metadata["description"].as_str())
      .map(str::to_string);
    self
      .content
      .iter()
      .chain(self.summary.iter())
      .chain(metadata_summary.iter())
      .chain(self.chunks.iter())
      .map(|s| s.trim())
      .filter(|s| !s.is_empty())
      .map(str::to_string)
      .collect()
  }

  pub fn to_source(&self) -> Option<Source> {
    let summary = self
      .summary
      .clone()
      .or_else(|| self.segments().into_iter().next())?;
    Some(Source {
      title: self.title.clone(),
      summary,
      score: self.score,
    })
  }
}

pub fn build_context(documents: &[RetrievedDocument]) -> String {
  documents
    .iter()
    .flat_map(RetrievedDocument::segments)
    .collect::<Vec<_>>()
    .join(CONTEXT_SEPARATOR)
}

pub fn top_sources(documents: &[RetrievedDocument], n: usize) -> Vec<Source> {
  documents.iter().filter_map(RetrievedDocument::to_source).take(n).collect()
}

#[async_trait]
pub trait DocumentRetriever: Send + Sync {
  async fn search(&self, query: &str, container: &str) -> Result<Vec<RetrievedDocument>>;
}

/// Runs a search and swallows any failure into an empty result.
pub async fn retrieve_or_empty(
  retriever: &dyn DocumentRetriever,
  query: &str,
  container: &str,
) -> Vec<RetrievedDocument> {
  match retriever.search(query, container).await {
    Ok(docs) => {
      tracing::debug!(count = docs.len(), container, "retrieved documents");
      docs
    }
    Err(err) => {
      tracing::warn!(error = %err, container, "document retrieval failed; continuing without context");
      Vec::new()
    }
  }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
  q: &'a str,
  container_tags: Vec<&'a str>,
  limit: usize,
  include_full_docs: bool,
  include_summary: bool,
  rerank: bool,
}

pub struct SupermemoryRetriever {
  client: reqwest::Client,
  base_url: String,
}

impl SupermemoryRetriever {
  pub fn new(api_key: &str) -> Result<Self> {
    Self::with_base_url(api_key, DEFAULT_MEMORY_BASE_URL)
  }

  pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self> {
    if api_key.trim().is_empty() {
      return Err(ChatError::Config("supermemoryApiKey is required".to_string()));
    }
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
      AUTHORIZATION,
      HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
        .map_err(|err| ChatError::Config(format!("invalid Supermemory API key: {err}")))?,
    );
    let client = reqwest::Client::builder()
      .default_headers(headers)
      .build()
      .map_err(|err| ChatError::Config(format!("failed to build HTTP client: {err}")))?;
    Ok(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
    })
  }
}

#[async_trait]
impl DocumentRetriever for SupermemoryRetriever {
  async fn search(&self, query: &str, container: &str) -> Result<Vec<RetrievedDocument>> {
    let payload = SearchRequest {
      q: query,
      container_tags: vec![container],
      limit: SEARCH_LIMIT,
      include_full_docs: true,
      include_summary: true,
      rerank: true,
    };
    let resp = self
      .client
      .post(format!("{}/v3/search", self.base_url))
      .json(&payload)
      .send()
      .await?;
    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(ChatError::from_upstream(status, &body));
    }
    let body: Value = resp.json().await?;
    let results = body["results"]
      .as_array()
      .or_else(|| body.as_array())
      .ok_or_else(|| ChatError::Internal("search response has no results array".to_string()))?;
    Ok(
      results
        .iter()
        .take(SEARCH_LIMIT)
        .map(RetrievedDocument::from_value)
        .collect(),
    )
  }
}
