//! Knowledge base lifecycle tests with mocked embedding clients

use async_trait::async_trait;
use mockall::mock;
use mockall::predicate::always;
use reg_copilot::error::Result;
use reg_copilot::ingest::types::{keys, Chunk, DocType, Metadata, MetadataExt, ParsedDocument};
use reg_copilot::kb::{CorpusSnapshot, GlobalKb};
use reg_copilot::llm::EmbeddingClient;

mock! {
    pub Embedder {}

    #[async_trait]
    impl EmbeddingClient for Embedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
        async fn embed_one(&self, text: &str) -> Result<Vec<f32>>;
    }
}

/// Deterministic embedder: a tiny bag-of-words vector so cosine search
/// behaves like the real thing
struct BagOfWords;

const VOCAB: &[&str] = &["tier", "capital", "ratio", "liquidity", "template", "exposure"];

fn bow_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    VOCAB
        .iter()
        .map(|w| lower.matches(w).count() as f32)
        .collect()
}

#[async_trait]
impl EmbeddingClient for BagOfWords {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| bow_vector(t)).collect())
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        Ok(bow_vector(text))
    }
}

fn chunk(text: &str, filename: &str, index: usize) -> Chunk {
    let mut metadata = Metadata::new();
    metadata.insert(keys::FILENAME.to_string(), filename.into());
    metadata.insert(keys::DOC_TYPE.to_string(), "text".into());
    metadata.insert(keys::CHUNK_INDEX.to_string(), index.into());
    Chunk::new(text, metadata)
}

fn seeded_snapshot() -> CorpusSnapshot {
    CorpusSnapshot {
        metadata: None,
        chunks: vec![
            chunk("The tier 1 capital ratio measures core capital.", "basel.pdf", 0),
            chunk("Liquidity coverage requires unencumbered assets.", "basel.pdf", 1),
            chunk("Own funds template C 01.00 rows.", "corep.xlsx", 0),
        ],
    }
}

fn upload(filename: &str, texts: &[&str]) -> ParsedDocument {
    ParsedDocument {
        filename: filename.to_string(),
        doc_type: DocType::Text,
        regulatory_type: None,
        chunks: texts
            .iter()
            .enumerate()
            .map(|(i, t)| chunk(t, filename, i))
            .collect(),
    }
}

#[tokio::test]
async fn bind_embeds_every_seeded_chunk_once() {
    let kb = GlobalKb::new();
    kb.seed(seeded_snapshot()).await;

    let mut embedder = MockEmbedder::new();
    embedder
        .expect_embed_batch()
        .with(always())
        .times(1)
        .returning(|texts| Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect()));

    kb.bind("sk-test-key-000001", &embedder).await.unwrap();
    assert!(kb.is_bound().await);
    assert_eq!(kb.index_len().await, 3);

    // Same key fingerprint: no re-embedding
    kb.bind("sk-test-key-000001", &embedder).await.unwrap();
}

#[tokio::test]
async fn rebind_with_new_key_rebuilds_index() {
    let kb = GlobalKb::new();
    kb.seed(seeded_snapshot()).await;

    kb.bind("sk-first-key-000001", &BagOfWords).await.unwrap();
    kb.add_document(upload("notes.txt", &["exposure summary"]), &BagOfWords)
        .await
        .unwrap();
    assert_eq!(kb.index_len().await, 4);

    // A different key re-embeds snapshot plus uploads; texts and metadata
    // are unchanged, only vectors may differ.
    kb.bind("sk-second-key-00001", &BagOfWords).await.unwrap();
    assert_eq!(kb.index_len().await, 4);

    let info = kb.info().await;
    assert_eq!(info.original_document_count, 2);
    assert_eq!(info.user_uploaded_documents, vec!["notes.txt"]);
}

#[tokio::test]
async fn search_before_seed_is_not_ready() {
    let kb = GlobalKb::new();
    let err = kb.search(&[1.0], 3).await.unwrap_err();
    assert_eq!(err.status_code(), 503);
}

#[tokio::test]
async fn query_with_literal_phrase_retrieves_its_chunk() {
    let kb = GlobalKb::new();
    kb.seed(seeded_snapshot()).await;
    kb.bind("sk-test-key-000001", &BagOfWords).await.unwrap();

    let query_vector = bow_vector("tier 1 capital ratio");
    let hits = kb.search(&query_vector, 3).await.unwrap();

    assert!(!hits.is_empty());
    assert!(hits[0].text.contains("tier 1 capital ratio"));
    assert_eq!(hits[0].metadata.filename(), Some("basel.pdf"));
}

#[tokio::test]
async fn upload_then_delete_restores_index_size() {
    let kb = GlobalKb::new();
    kb.seed(seeded_snapshot()).await;
    kb.bind("sk-test-key-000001", &BagOfWords).await.unwrap();
    let before = kb.index_len().await;

    kb.add_document(
        upload("foo.pdf", &["capital exposure one", "capital exposure two"]),
        &BagOfWords,
    )
    .await
    .unwrap();
    assert_eq!(kb.index_len().await, before + 2);

    let (removed, remaining, total) = kb.remove_document("foo.pdf").await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(remaining, 0);
    assert_eq!(total, 2);
    assert_eq!(kb.index_len().await, before);

    // Subsequent searches never return the deleted file's chunks
    let hits = kb.search(&bow_vector("capital exposure"), 10).await.unwrap();
    assert!(hits
        .iter()
        .all(|h| h.metadata.filename() != Some("foo.pdf")));
}

#[tokio::test]
async fn preloaded_documents_are_protected() {
    let kb = GlobalKb::new();
    kb.seed(seeded_snapshot()).await;
    kb.bind("sk-test-key-000001", &BagOfWords).await.unwrap();
    let before = kb.index_len().await;

    // Deleting an original fails and leaves the index unchanged
    let err = kb.remove_document("basel.pdf").await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(kb.index_len().await, before);

    // Uploading over an original is rejected too
    let err = kb
        .add_document(upload("basel.pdf", &["fake replacement"]), &BagOfWords)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(kb.index_len().await, before);
}

#[tokio::test]
async fn deleting_unknown_document_is_404() {
    let kb = GlobalKb::new();
    kb.seed(seeded_snapshot()).await;
    let err = kb.remove_document("nope.pdf").await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn reupload_is_idempotent() {
    let kb = GlobalKb::new();
    kb.seed(seeded_snapshot()).await;
    kb.bind("sk-test-key-000001", &BagOfWords).await.unwrap();

    let texts = ["capital mapping row one", "capital mapping row two"];
    kb.add_document(upload("map.csv", &texts), &BagOfWords)
        .await
        .unwrap();
    let after_first = kb.index_len().await;

    kb.add_document(upload("map.csv", &texts), &BagOfWords)
        .await
        .unwrap();
    assert_eq!(kb.index_len().await, after_first);

    let info = kb.info().await;
    assert_eq!(info.user_uploaded_documents, vec!["map.csv"]);
}

#[tokio::test]
async fn embedding_failure_leaves_index_unchanged() {
    let kb = GlobalKb::new();
    kb.seed(seeded_snapshot()).await;
    kb.bind("sk-test-key-000001", &BagOfWords).await.unwrap();
    let before = kb.index_len().await;

    let mut failing = MockEmbedder::new();
    failing.expect_embed_batch().returning(|_| {
        Err(reg_copilot::error::LlmError::EmbeddingFailed {
            batch_index: 0,
            reason: "upstream 500".to_string(),
        }
        .into())
    });

    let err = kb
        .add_document(upload("doc.txt", &["some capital text"]), &failing)
        .await
        .unwrap_err();
    assert_eq!(err.category(), "llm");
    assert_eq!(kb.index_len().await, before);

    let info = kb.info().await;
    assert!(info.user_uploaded_documents.is_empty());
}

#[tokio::test]
async fn concurrent_searches_never_observe_partial_uploads() {
    let kb = GlobalKb::new();
    kb.seed(seeded_snapshot()).await;
    kb.bind("sk-test-key-000001", &BagOfWords).await.unwrap();

    let texts: Vec<String> = (0..50)
        .map(|i| format!("capital exposure item {}", i))
        .collect();
    let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let parsed = upload("bulk.txt", &text_refs);

    let writer_kb = kb.clone();
    let writer = tokio::spawn(async move {
        writer_kb.add_document(parsed, &BagOfWords).await.unwrap();
    });

    // Readers must see either none or all of the file's chunks
    let query = bow_vector("capital exposure");
    for _ in 0..20 {
        let hits = kb.search(&query, 100).await.unwrap();
        let bulk_count = hits
            .iter()
            .filter(|h| h.metadata.filename() == Some("bulk.txt"))
            .count();
        assert!(
            bulk_count == 0 || bulk_count == 50,
            "observed partial upload: {} chunks",
            bulk_count
        );
        tokio::task::yield_now().await;
    }

    writer.await.unwrap();
    let hits = kb.search(&query, 100).await.unwrap();
    let bulk_count = hits
        .iter()
        .filter(|h| h.metadata.filename() == Some("bulk.txt"))
        .count();
    assert_eq!(bulk_count, 50);
}
