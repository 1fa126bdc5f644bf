//! Retrieval-augmented generation pipeline
//!
//! Query → embed → top-k search → grounded context block → streamed chat
//! completion. Output is re-framed into paragraph-sized strings separated by
//! blank lines regardless of how the upstream provider chunks its tokens.

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::kb::{GlobalKb, RetrievedChunk};
use crate::llm::{system_message, user_message, ChatClient, EmbeddingClient, TokenStream};
use futures::stream::StreamExt;
use std::sync::Arc;
use tracing::debug;

/// System prompt for grounded answers
const GROUNDED_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions based on provided document context.

When answering:
1. Use ONLY the information provided in the context
2. If the context doesn't contain relevant information, clearly state that
3. Cite specific parts of the context when possible
4. Be accurate and don't make assumptions beyond the provided context
5. Format your response clearly with proper markdown

Context format: Each piece of context will be marked with [Source: filename] followed by the content.";

/// Terminal paragraph sent when retrieval finds nothing
pub const NO_RESULTS_MESSAGE: &str = "I couldn't find any relevant information in the knowledge base to answer your question. Please upload the appropriate documents first.";

/// The base retrieval-augmented generation pipeline
pub struct RagPipeline {
    kb: GlobalKb,
    embedder: Arc<dyn EmbeddingClient>,
    chat: Arc<dyn ChatClient>,
    config: RetrievalConfig,
}

impl RagPipeline {
    pub fn new(
        kb: GlobalKb,
        embedder: Arc<dyn EmbeddingClient>,
        chat: Arc<dyn ChatClient>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            kb,
            embedder,
            chat,
            config,
        }
    }

    pub fn kb(&self) -> &GlobalKb {
        &self.kb
    }

    pub fn embedder(&self) -> &dyn EmbeddingClient {
        self.embedder.as_ref()
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Embed the query and run a top-k search against the global index
    pub async fn search_documents(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let query_vector = self.embedder.embed_one(query).await?;
        debug!("Query embedded, dimension {}", query_vector.len());
        self.kb.search(&query_vector, k).await
    }

    /// Format retrieved chunks into the grounded context block and a
    /// human-readable provenance summary
    pub fn format_context(results: &[RetrievedChunk]) -> (String, String) {
        use crate::ingest::types::{keys, MetadataExt};

        let mut context_parts = Vec::new();
        let mut metadata_parts = Vec::new();

        for result in results {
            let content = result.text.trim();
            if content.is_empty() {
                continue;
            }

            let filename = result.metadata.filename().unwrap_or("Unknown");
            context_parts.push(format!("[Source: {}]\n{}", filename, content));

            let mut info = format!("Source: {}, Relevance: {:.3}", filename, result.score);
            if let Some(chunk_index) = result.metadata.int_value(keys::CHUNK_INDEX) {
                info.push_str(&format!(", Chunk: {}", chunk_index));
            }
            metadata_parts.push(info);
        }

        (
            context_parts.join("\n\n---\n\n"),
            metadata_parts.join(" | "),
        )
    }

    /// Run the full pipeline, returning a paragraph-framed stream
    pub async fn run(
        &self,
        query: &str,
        k: Option<usize>,
        model: Option<&str>,
    ) -> Result<TokenStream> {
        let k = k.unwrap_or(self.config.top_k);
        let results = self.search_documents(query, k).await?;

        if results.is_empty() {
            return Ok(single_paragraph(NO_RESULTS_MESSAGE));
        }

        let (context, sources) = Self::format_context(&results);
        debug!("Retrieved {} chunks ({})", results.len(), sources);

        let user_prompt = format!(
            "Question: {}\n\nContext from documents:\n{}\n\nPlease answer the question based on the provided context.",
            query, context
        );
        let messages = vec![
            system_message(GROUNDED_SYSTEM_PROMPT),
            user_message(user_prompt),
        ];

        let tokens = self.chat.stream_chat(&messages, model).await?;
        Ok(into_paragraphs(tokens))
    }

    /// Plain chat without retrieval (`use_rag = false` and `/api/chat`)
    pub async fn chat_only(&self, message: &str, model: Option<&str>) -> Result<TokenStream> {
        let messages = vec![
            system_message("You are a helpful assistant."),
            user_message(message),
        ];
        let tokens = self.chat.stream_chat(&messages, model).await?;
        Ok(into_paragraphs(tokens))
    }

    /// Stream a completion for prompts assembled by a wrapper (the
    /// regulatory enhancer builds its own system and user messages)
    pub async fn generate(
        &self,
        messages: Vec<crate::llm::Message>,
        model: Option<&str>,
    ) -> Result<TokenStream> {
        let tokens = self.chat.stream_chat(&messages, model).await?;
        Ok(into_paragraphs(tokens))
    }
}

/// A stream holding exactly one terminal paragraph
pub fn single_paragraph(text: &str) -> TokenStream {
    let para = format!("{}\n\n", text.trim_end());
    futures::stream::once(async move { Ok(para) }).boxed()
}

/// Re-frame an upstream token stream into paragraphs separated by `\n\n`.
/// The final partial paragraph is flushed with a trailing separator at EOF.
pub fn into_paragraphs(tokens: TokenStream) -> TokenStream {
    struct FrameState {
        inner: TokenStream,
        buffer: String,
        done: bool,
    }

    let state = FrameState {
        inner: tokens,
        buffer: String::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }

            if let Some(pos) = st.buffer.find("\n\n") {
                let paragraph: String = st.buffer.drain(..pos + 2).collect();
                if paragraph.trim().is_empty() {
                    continue;
                }
                return Some((Ok(paragraph), st));
            }

            match st.inner.next().await {
                Some(Ok(token)) => st.buffer.push_str(&token),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.done = true;
                    let rest = st.buffer.trim().to_string();
                    if rest.is_empty() {
                        return None;
                    }
                    return Some((Ok(format!("{}\n\n", rest)), st));
                }
            }
        }
    })
    .boxed()
}
