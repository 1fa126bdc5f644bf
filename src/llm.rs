//! Clients for the external embedding and chat completion services
//!
//! Both services speak the OpenAI wire format. Embeddings are batched with a
//! bounded fan-out and retried on transient failures; chat completions are
//! streamed over SSE and surfaced as an ordered token stream.

use crate::config::LlmConfig;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Message role in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Helper function to create a system message
pub fn system_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::System,
        content: content.into(),
    }
}

/// Helper function to create a user message
pub fn user_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::User,
        content: content.into(),
    }
}

/// Ordered stream of content tokens from a chat completion
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Trait for the external embedding service
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts; outputs are in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (query path)
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>>;
}

/// Trait for the external chat completion service
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Start a streaming completion; tokens arrive in model order
    async fn stream_chat(&self, messages: &[Message], model: Option<&str>) -> Result<TokenStream>;
}

/// Client for an OpenAI-compatible API
#[derive(Debug)]
pub struct OpenAiClient {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a client bound to one API key
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey.into());
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), endpoint)
    }

    /// One embeddings call with retries on transport failures and 5xx
    async fn embed_request(&self, batch: &[String], batch_index: usize) -> Result<Vec<Vec<f32>>> {
        let url = self.api_url("embeddings");
        let mut attempt = 0usize;

        loop {
            let request = EmbeddingsRequest {
                model: &self.config.embedding_model,
                input: batch,
            };

            let outcome = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await;

            let retryable_reason = match outcome {
                Ok(response) if response.status().is_success() => {
                    let parsed: EmbeddingsResponse = response
                        .json()
                        .await
                        .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

                    let mut data = parsed.data;
                    data.sort_by_key(|d| d.index);
                    if data.len() != batch.len() {
                        return Err(LlmError::EmbeddingFailed {
                            batch_index,
                            reason: format!(
                                "expected {} embeddings, got {}",
                                batch.len(),
                                data.len()
                            ),
                        }
                        .into());
                    }
                    return Ok(data.into_iter().map(|d| d.embedding).collect());
                }
                Ok(response) if response.status().is_server_error() => {
                    format!("HTTP {}", response.status())
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    error!("Embedding API error {}: {}", status, body);
                    return Err(LlmError::EmbeddingFailed {
                        batch_index,
                        reason: format!("HTTP {}: {}", status, body),
                    }
                    .into());
                }
                Err(e) => e.to_string(),
            };

            if attempt >= self.config.max_retries {
                return Err(LlmError::EmbeddingFailed {
                    batch_index,
                    reason: retryable_reason,
                }
                .into());
            }

            let backoff = Duration::from_millis(500u64 << attempt);
            warn!(
                "Embedding batch {} failed ({}), retrying in {:?}",
                batch_index, retryable_reason, backoff
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = self.config.embedding_batch_size.max(1);
        let batches: Vec<(usize, Vec<String>)> = texts
            .chunks(batch_size)
            .enumerate()
            .map(|(i, chunk)| (i, chunk.to_vec()))
            .collect();
        debug!(
            "Embedding {} texts in {} batches",
            texts.len(),
            batches.len()
        );

        // Bounded fan-out; `buffered` yields results in input order, so the
        // caller sees one flat vector aligned with its texts.
        let results: Vec<Result<Vec<Vec<f32>>>> = futures::stream::iter(batches)
            .map(|(i, batch)| async move { self.embed_request(&batch, i).await })
            .buffered(self.config.embedding_concurrency.max(1))
            .collect()
            .await;

        let mut embeddings = Vec::with_capacity(texts.len());
        for result in results {
            embeddings.extend(result?);
        }

        info!("Generated {} embeddings", embeddings.len());
        Ok(embeddings)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let batch = vec![text.to_string()];
        let mut vectors = self.embed_request(&batch, 0).await?;
        vectors
            .pop()
            .ok_or_else(|| LlmError::InvalidResponse("empty embedding response".to_string()).into())
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn stream_chat(&self, messages: &[Message], model: Option<&str>) -> Result<TokenStream> {
        let model = model.unwrap_or(&self.config.chat_model);
        debug!("Streaming chat completion with {} messages via {}", messages.len(), model);

        let request = ChatCompletionRequest {
            model,
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(self.api_url("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Chat API error {}: {}", status, body);
            return Err(LlmError::ChatFailed(format!("HTTP {}: {}", status, body)).into());
        }

        struct SseState {
            inner: Pin<Box<dyn futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
            buffer: String,
            done: bool,
        }

        let state = SseState {
            inner: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if st.done {
                    return None;
                }

                // Drain any complete events already buffered
                while let Some(pos) = st.buffer.find("\n\n") {
                    let event: String = st.buffer.drain(..pos + 2).collect();
                    let Some(data) = parse_sse_data(&event) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        st.done = true;
                        return None;
                    }
                    if let Some(content) = parse_delta(&data) {
                        if !content.is_empty() {
                            return Some((Ok(content), st));
                        }
                    }
                }

                match st.inner.next().await {
                    Some(Ok(bytes)) => {
                        st.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        return Some((
                            Err(LlmError::ChatFailed(e.to_string()).into()),
                            st,
                        ));
                    }
                    None => {
                        st.done = true;
                        return None;
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

/// Extract the payload of one SSE event ("data: ..." lines)
fn parse_sse_data(event: &str) -> Option<String> {
    let mut parts = Vec::new();
    for line in event.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            parts.push(rest.trim_start());
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Pull delta content out of one streamed completion chunk
fn parse_delta(data: &str) -> Option<String> {
    let chunk: ChatStreamChunk = serde_json::from_str(data).ok()?;
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
}
