//! Global knowledge base: one vector index plus its chunk manifest
//!
//! The knowledge base is seeded once at startup from a precomputed snapshot
//! of `(text, metadata)` chunks. Vectors are materialized lazily on the
//! first request carrying a usable API key, because the embedding dimension
//! is tied to the embedding backend behind that key. The chunk manifest is
//! kept alongside the index so a different key can trigger a full rebuild
//! without reparsing any document.
//!
//! All mutation goes through the writer lock; embeddings are produced
//! before the guard is taken so no await happens while writing.

use crate::error::{KbError, Result};
use crate::index::{SearchHit, VectorIndex};
use crate::ingest::types::{keys, Chunk, Metadata, MetadataExt, ParsedDocument, SourceKind};
use crate::llm::EmbeddingClient;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Snapshot-level metadata emitted by the preprocessing pass
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapshotMetadata {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub total_chunks: Option<usize>,
    #[serde(default)]
    pub total_documents: Option<usize>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub processed_files: Vec<ProcessedFileInfo>,
}

/// Per-file entry in the snapshot metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedFileInfo {
    pub filename: String,
    #[serde(default)]
    pub subfolder: Option<String>,
    #[serde(default)]
    pub chunk_count: Option<usize>,
    #[serde(default)]
    pub doc_type: Option<String>,
}

/// The preloaded corpus: chunk texts and metadata, no vectors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    #[serde(default)]
    pub metadata: Option<SnapshotMetadata>,
    pub chunks: Vec<Chunk>,
}

impl CorpusSnapshot {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KbError::SeedingFailed(format!("{}: {}", path.display(), e)))?;
        let snapshot: Self = serde_json::from_str(&content)
            .map_err(|e| KbError::SeedingFailed(format!("invalid snapshot: {}", e)))?;
        Ok(snapshot)
    }
}

/// Aggregate state reported by `/api/global-knowledge-base` and `/health`
#[derive(Debug, Clone, Serialize)]
pub struct KbInfo {
    pub status: String,
    pub initialized: bool,
    pub error: Option<String>,
    pub documents: Vec<String>,
    pub user_uploaded_documents: Vec<String>,
    pub document_count: usize,
    pub original_document_count: usize,
    pub user_uploaded_document_count: usize,
    pub chunk_count: usize,
    pub description: String,
}

/// A search hit joined with its stored metadata
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// Synchronous core: index, manifest, and lifecycle flags
#[derive(Debug, Default)]
pub struct KnowledgeBase {
    index: VectorIndex,
    preloaded_filenames: Vec<String>,
    user_uploaded_filenames: Vec<String>,
    chunked_documents: Vec<Chunk>,
    snapshot_metadata: Option<SnapshotMetadata>,
    bound_fingerprint: Option<String>,
    seeded: bool,
    error: Option<String>,
}

/// Stable fingerprint of an API key: prefix plus length, never the whole key
fn key_fingerprint(api_key: &str) -> String {
    let prefix: String = api_key.chars().take(12).collect();
    format!("{}:{}", prefix, api_key.len())
}

impl KnowledgeBase {
    fn seed(&mut self, snapshot: CorpusSnapshot) {
        let mut filenames: Vec<String> = Vec::new();
        for chunk in &snapshot.chunks {
            if let Some(name) = chunk.metadata.filename() {
                if !filenames.iter().any(|f| f == name) {
                    filenames.push(name.to_string());
                }
            }
        }

        info!(
            "Seeded knowledge base: {} chunks from {} preloaded documents",
            snapshot.chunks.len(),
            filenames.len()
        );

        self.preloaded_filenames = filenames;
        self.chunked_documents = snapshot.chunks;
        self.snapshot_metadata = snapshot.metadata;
        self.seeded = true;
    }

    fn is_bound(&self) -> bool {
        self.bound_fingerprint.is_some()
    }

    pub fn info(&self) -> KbInfo {
        if !self.seeded {
            return KbInfo {
                status: "not_initialized".to_string(),
                initialized: false,
                error: None,
                documents: Vec::new(),
                user_uploaded_documents: Vec::new(),
                document_count: 0,
                original_document_count: 0,
                user_uploaded_document_count: 0,
                chunk_count: 0,
                description: "Global knowledge base not yet initialized".to_string(),
            };
        }

        if let Some(error) = &self.error {
            return KbInfo {
                status: "error".to_string(),
                initialized: true,
                error: Some(error.clone()),
                documents: Vec::new(),
                user_uploaded_documents: Vec::new(),
                document_count: 0,
                original_document_count: 0,
                user_uploaded_document_count: 0,
                chunk_count: 0,
                description: format!("Global knowledge base initialization failed: {}", error),
            };
        }

        let originals = self.preloaded_filenames.len();
        let uploads = self.user_uploaded_filenames.len();
        let chunk_count = self.chunked_documents.len();

        KbInfo {
            status: "ready".to_string(),
            initialized: true,
            error: None,
            documents: self.preloaded_filenames.clone(),
            user_uploaded_documents: self.user_uploaded_filenames.clone(),
            document_count: originals + uploads,
            original_document_count: originals,
            user_uploaded_document_count: uploads,
            chunk_count,
            description: format!(
                "Global knowledge base ready with {} regulatory documents and {} user uploads ({} chunks total)",
                originals, uploads, chunk_count
            ),
        }
    }
}

/// Process-wide handle guarding the knowledge base with a readers-writer lock
#[derive(Clone)]
pub struct GlobalKb {
    inner: Arc<RwLock<KnowledgeBase>>,
}

impl Default for GlobalKb {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalKb {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(KnowledgeBase::default())),
        }
    }

    /// Seed from a snapshot file; a missing or broken snapshot leaves the KB
    /// seeded-but-empty so the service still answers plain chat requests.
    pub async fn seed_from_file(&self, path: &Path) {
        match CorpusSnapshot::from_file(path) {
            Ok(snapshot) => self.seed(snapshot).await,
            Err(e) => {
                warn!("Snapshot load failed: {}", e);
                let mut kb = self.inner.write().await;
                kb.seeded = true;
                kb.error = Some(e.to_string());
            }
        }
    }

    pub async fn seed(&self, snapshot: CorpusSnapshot) {
        self.inner.write().await.seed(snapshot);
    }

    /// Seed with an empty corpus (no preloaded documents configured)
    pub async fn seed_empty(&self) {
        self.inner.write().await.seeded = true;
    }

    pub async fn is_ready(&self) -> bool {
        let kb = self.inner.read().await;
        kb.seeded && kb.error.is_none()
    }

    pub async fn is_bound(&self) -> bool {
        self.inner.read().await.is_bound()
    }

    pub async fn info(&self) -> KbInfo {
        self.inner.read().await.info()
    }

    /// Materialize vectors against the embedding backend behind `api_key`.
    ///
    /// Idempotent for a key with the same fingerprint. A different key drops
    /// the index and re-embeds the whole chunk manifest. The embedding pass
    /// runs without any lock held; only the reinsert takes the writer lock.
    pub async fn bind(&self, api_key: &str, embedder: &dyn EmbeddingClient) -> Result<()> {
        let fingerprint = key_fingerprint(api_key);

        let (chunks, rebind) = {
            let kb = self.inner.read().await;
            if !kb.seeded || kb.error.is_some() {
                return Err(KbError::NotReady.into());
            }
            if kb.bound_fingerprint.as_deref() == Some(fingerprint.as_str()) {
                return Ok(());
            }
            (kb.chunked_documents.clone(), kb.is_bound())
        };

        if rebind {
            info!("API key changed, rebuilding index for {} chunks", chunks.len());
        } else {
            info!("Binding knowledge base: embedding {} seeded chunks", chunks.len());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            embedder.embed_batch(&texts).await?
        };

        let mut kb = self.inner.write().await;
        kb.index.clear();
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            kb.index.insert(chunk.text, vector, chunk.metadata)?;
        }
        kb.bound_fingerprint = Some(fingerprint);
        info!("Knowledge base bound: {} entries", kb.index.len());
        Ok(())
    }

    /// Insert a parsed upload. Chunks are stamped as user uploads, embedded
    /// in one batched pass, then inserted atomically in chunk order.
    pub async fn add_document(
        &self,
        mut parsed: ParsedDocument,
        embedder: &dyn EmbeddingClient,
    ) -> Result<usize> {
        {
            let kb = self.inner.read().await;
            if !kb.seeded || kb.error.is_some() || !kb.is_bound() {
                return Err(KbError::NotReady.into());
            }
            if kb.preloaded_filenames.iter().any(|f| f == &parsed.filename) {
                return Err(KbError::ProtectedDocument(parsed.filename).into());
            }
        }

        let upload_time = Utc::now();
        for chunk in &mut parsed.chunks {
            chunk.metadata.insert(
                keys::SOURCE.to_string(),
                SourceKind::UserUploaded.as_str().into(),
            );
            chunk.metadata.insert(keys::IS_ORIGINAL.to_string(), false.into());
            chunk
                .metadata
                .insert(keys::UPLOAD_TIME.to_string(), upload_time.into());
        }

        // Embed before taking the writer lock
        let texts: Vec<String> = parsed.chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;

        let mut kb = self.inner.write().await;
        // Re-uploads replace the previous version wholesale
        kb.index.delete_by_filename(&parsed.filename);
        kb.chunked_documents
            .retain(|c| c.metadata.filename() != Some(parsed.filename.as_str()));

        let inserted = parsed.chunks.len();
        for (chunk, vector) in parsed.chunks.iter().zip(vectors) {
            kb.index
                .insert(chunk.text.clone(), vector, chunk.metadata.clone())?;
        }
        kb.chunked_documents.extend(parsed.chunks);

        if !kb
            .user_uploaded_filenames
            .iter()
            .any(|f| f == &parsed.filename)
        {
            kb.user_uploaded_filenames.push(parsed.filename.clone());
        }

        info!("Indexed {}: {} chunks", parsed.filename, inserted);
        Ok(inserted)
    }

    /// Remove a user-uploaded document atomically.
    /// Returns `(removed_chunks, remaining_user_documents, total_documents)`.
    pub async fn remove_document(&self, filename: &str) -> Result<(usize, usize, usize)> {
        let mut kb = self.inner.write().await;

        if !kb.seeded {
            return Err(KbError::NotReady.into());
        }
        if kb.preloaded_filenames.iter().any(|f| f == filename) {
            return Err(KbError::ProtectedDocument(filename.to_string()).into());
        }
        if !kb.user_uploaded_filenames.iter().any(|f| f == filename) {
            return Err(crate::error::CopilotError::UnknownDocument(
                filename.to_string(),
            ));
        }

        let removed = kb.index.delete_by_filename(filename);
        kb.chunked_documents
            .retain(|c| c.metadata.filename() != Some(filename));
        kb.user_uploaded_filenames.retain(|f| f != filename);

        let remaining = kb.user_uploaded_filenames.len();
        let total = kb.preloaded_filenames.len() + remaining;
        info!("Removed {}: {} chunks deleted", filename, removed);
        Ok((removed, remaining, total))
    }

    /// Top-k search joined with stored metadata. Requires a bound index.
    pub async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        let kb = self.inner.read().await;
        if !kb.seeded || kb.error.is_some() {
            return Err(KbError::NotReady.into());
        }

        let hits = kb.index.search(query_vector, k);
        Ok(hits
            .into_iter()
            .map(|SearchHit { text, score }| {
                let metadata = kb.index.get_metadata(&text).cloned().unwrap_or_default();
                RetrievedChunk {
                    text,
                    score,
                    metadata,
                }
            })
            .collect())
    }

    /// Number of entries currently in the index
    pub async fn index_len(&self) -> usize {
        self.inner.read().await.index.len()
    }
}
