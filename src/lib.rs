//! Regulatory Reporting Copilot
//!
//! A retrieval-augmented question-answering service for a curated regulatory
//! document corpus (Basel III frameworks, COREP/FINREP templates, and the
//! operational artifacts around them). The library integrates:
//! - Multi-format document ingestion into provenance-tagged chunks
//! - An in-memory embedding index with exact cosine search
//! - A global knowledge base seeded from a precomputed corpus snapshot
//! - Streaming retrieval-augmented generation with a regulatory enhancement
//!   layer (role prompts, re-ranking, typed citations)
//!
//! # Example
//!
//! ```rust,no_run
//! use reg_copilot::api::{start_server, AppState};
//! use reg_copilot::config::CopilotConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CopilotConfig::default();
//!     let state = AppState::new(config).await?;
//!     start_server(state, "0.0.0.0", 8080).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod index;
pub mod ingest;
pub mod kb;
pub mod llm;
pub mod rag;
pub mod regulatory;
pub mod session;

// Re-export main types
pub use config::{CopilotConfig, IngestConfig, LlmConfig, RetrievalConfig, ServerConfig};
pub use error::{CopilotError, IndexError, IngestError, KbError, LlmError, Result};
pub use index::{SearchHit, VectorIndex};
pub use ingest::types::{Chunk, DocType, Fragment, MetaValue, Metadata, RegulatoryType, SourceKind};
pub use kb::{CorpusSnapshot, GlobalKb, KbInfo, RetrievedChunk};
pub use llm::{ChatClient, EmbeddingClient, Message, OpenAiClient, Role, TokenStream};
pub use rag::RagPipeline;
pub use regulatory::{RegulatoryEnhancer, RegulatoryFilters, UserRole};
pub use session::{Session, SessionRegistry};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
