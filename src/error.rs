//! Error handling for the regulatory copilot

use thiserror::Error;

/// Result type alias for the regulatory copilot
pub type Result<T> = std::result::Result<T, CopilotError>;

/// Main error type for the regulatory copilot
#[derive(Error, Debug)]
pub enum CopilotError {
    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Knowledge base error: {0}")]
    Kb(#[from] KbError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Unknown document: {0}")]
    UnknownDocument(String),
}

/// Errors raised while parsing and chunking uploaded documents
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Failed to parse {filename}: {reason}")]
    ParseError { filename: String, reason: String },

    #[error("Empty document: {0}")]
    EmptyDocument(String),
}

/// Errors raised by the vector index
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    DimensionError { expected: usize, actual: usize },

    #[error("Metadata rejected: {0}")]
    InvalidMetadata(String),
}

/// Errors related to the external embedding and chat completion services
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Embedding failed for batch {batch_index}: {reason}")]
    EmbeddingFailed { batch_index: usize, reason: String },

    #[error("Chat completion failed: {0}")]
    ChatFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Timeout: operation took too long")]
    Timeout,
}

/// Errors related to the knowledge base lifecycle
#[derive(Error, Debug)]
pub enum KbError {
    #[error("Knowledge base not ready")]
    NotReady,

    #[error("Document is part of the preloaded corpus and cannot be modified: {0}")]
    ProtectedDocument(String),

    #[error("Seeding failed: {0}")]
    SeedingFailed(String),
}

impl CopilotError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CopilotError::Llm(LlmError::Timeout)
                | CopilotError::Llm(LlmError::ConnectionFailed(_))
                | CopilotError::Http(_)
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            CopilotError::Ingest(_) => "ingest",
            CopilotError::Index(_) => "index",
            CopilotError::Llm(_) => "llm",
            CopilotError::Kb(_) => "kb",
            CopilotError::Config(_) => "config",
            CopilotError::Io(_) => "io",
            CopilotError::Serialization(_) => "serialization",
            CopilotError::Http(_) => "http",
            CopilotError::Network(_) => "network",
            CopilotError::UnknownSession(_) => "unknown_session",
            CopilotError::UnknownDocument(_) => "unknown_document",
        }
    }

    /// HTTP status code the API layer should surface for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CopilotError::Ingest(_) => 400,
            CopilotError::Kb(KbError::ProtectedDocument(_)) => 400,
            CopilotError::Kb(KbError::NotReady) => 503,
            CopilotError::UnknownSession(_) | CopilotError::UnknownDocument(_) => 404,
            CopilotError::Llm(LlmError::MissingApiKey) => 400,
            _ => 500,
        }
    }
}
