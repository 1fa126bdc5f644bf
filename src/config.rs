//! Configuration management for the regulatory copilot

use serde::{Deserialize, Serialize};

/// Main configuration for the copilot service
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CopilotConfig {
    /// Embedding and chat completion service configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Document ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Retrieval and re-ranking configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// External model service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible API
    pub api_base: String,

    /// Default model for chat completions
    pub chat_model: String,

    /// Model for embeddings
    pub embedding_model: String,

    /// Maximum inputs per embedding request
    pub embedding_batch_size: usize,

    /// Maximum concurrent embedding requests
    pub embedding_concurrency: usize,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Retries on transient failures
    pub max_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_batch_size: 1024,
            embedding_concurrency: 8,
            timeout: 120,
            max_retries: 2,
        }
    }
}

/// Document ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Enable the overlapping-window chunker
    pub chunking_enabled: bool,

    /// Target chunk size in characters
    pub chunk_size: usize,

    /// Overlap carried from the previous chunk
    pub chunk_overlap: usize,

    /// Path to the preloaded corpus snapshot (JSON)
    pub snapshot_path: Option<String>,

    /// Directory for caching raw uploads (none = uploads are not kept)
    pub upload_cache_dir: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunking_enabled: true,
            chunk_size: 800,
            chunk_overlap: 50,
            snapshot_path: None,
            upload_cache_dir: None,
        }
    }
}

/// Retrieval and regulatory re-ranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved per query
    pub top_k: usize,

    /// Weight of the cosine score in the combined ranking
    pub cosine_weight: f32,

    /// Weight of the regulatory score in the combined ranking
    pub regulatory_weight: f32,

    /// Cosine multiplier applied to priority sources
    pub priority_boost: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            cosine_weight: 0.7,
            regulatory_weight: 0.3,
            priority_boost: 1.5,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,

    /// Listen port; the PORT environment variable overrides this
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl CopilotConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(config)
    }

    /// Apply environment overrides (PORT, OPENAI_API_KEY handled by callers)
    pub fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.llm.api_base.starts_with("http") {
            return Err(anyhow::anyhow!("Invalid API base URL: {}", self.llm.api_base));
        }

        if self.llm.chat_model.is_empty() {
            return Err(anyhow::anyhow!("Chat model name cannot be empty"));
        }

        if self.llm.embedding_model.is_empty() {
            return Err(anyhow::anyhow!("Embedding model name cannot be empty"));
        }

        if self.llm.embedding_batch_size == 0 {
            return Err(anyhow::anyhow!("Embedding batch size must be greater than 0"));
        }

        if self.ingest.chunk_size == 0 {
            return Err(anyhow::anyhow!("Chunk size must be greater than 0"));
        }

        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            return Err(anyhow::anyhow!("Chunk overlap must be smaller than chunk size"));
        }

        if self.retrieval.top_k == 0 {
            return Err(anyhow::anyhow!("top_k must be greater than 0"));
        }

        let weight_sum = self.retrieval.cosine_weight + self.retrieval.regulatory_weight;
        if !(0.99..=1.01).contains(&weight_sum) {
            return Err(anyhow::anyhow!(
                "Ranking weights must sum to 1.0, got {}",
                weight_sum
            ));
        }

        Ok(())
    }

    /// Resolve the API key for a request: explicit key wins, then environment
    pub fn resolve_api_key(request_key: Option<&str>) -> Option<String> {
        match request_key {
            Some(key) if !key.trim().is_empty() => Some(key.trim().to_string()),
            _ => std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
        }
    }
}
