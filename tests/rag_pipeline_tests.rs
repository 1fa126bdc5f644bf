//! End-to-end pipeline tests with stubbed model clients

use async_trait::async_trait;
use futures::StreamExt;
use reg_copilot::config::RetrievalConfig;
use reg_copilot::error::{LlmError, Result};
use reg_copilot::ingest::types::{keys, Chunk, Metadata};
use reg_copilot::kb::{CorpusSnapshot, GlobalKb};
use reg_copilot::llm::{ChatClient, EmbeddingClient, Message, Role, TokenStream};
use reg_copilot::rag::{RagPipeline, NO_RESULTS_MESSAGE};
use reg_copilot::regulatory::{RegulatoryEnhancer, RegulatoryFilters, UserRole};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const VOCAB: &[&str] = &["tier", "capital", "ratio", "liquidity", "basel", "corep"];

fn bow_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    VOCAB
        .iter()
        .map(|w| lower.matches(w).count() as f32)
        .collect()
}

struct BagOfWords;

#[async_trait]
impl EmbeddingClient for BagOfWords {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| bow_vector(t)).collect())
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        Ok(bow_vector(text))
    }
}

/// Chat stub: records prompts and streams a canned reply
struct StubChat {
    reply: Vec<&'static str>,
    seen: Mutex<Vec<Message>>,
    calls: AtomicUsize,
    fail_first: bool,
}

impl StubChat {
    fn new(reply: Vec<&'static str>) -> Self {
        Self {
            reply,
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_first: false,
        }
    }

    fn failing_once(reply: Vec<&'static str>) -> Self {
        Self {
            fail_first: true,
            ..Self::new(reply)
        }
    }

    fn last_user_prompt(&self) -> String {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    fn last_system_prompt(&self) -> String {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatClient for StubChat {
    async fn stream_chat(&self, messages: &[Message], _model: Option<&str>) -> Result<TokenStream> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_first && call == 0 {
            return Err(LlmError::ChatFailed("synthetic failure".to_string()).into());
        }

        self.seen.lock().unwrap().extend(messages.to_vec());
        let tokens: Vec<Result<String>> =
            self.reply.iter().map(|t| Ok(t.to_string())).collect();
        Ok(futures::stream::iter(tokens).boxed())
    }
}

fn chunk(text: &str, filename: &str, doc_type: &str, regulatory_type: Option<&str>) -> Chunk {
    let mut metadata = Metadata::new();
    metadata.insert(keys::FILENAME.to_string(), filename.into());
    metadata.insert(keys::DOC_TYPE.to_string(), doc_type.into());
    metadata.insert(keys::CHUNK_INDEX.to_string(), 0usize.into());
    if let Some(rt) = regulatory_type {
        metadata.insert(keys::REGULATORY_TYPE.to_string(), rt.into());
    }
    Chunk::new(text, metadata)
}

async fn ready_kb(chunks: Vec<Chunk>) -> GlobalKb {
    let kb = GlobalKb::new();
    kb.seed(CorpusSnapshot {
        metadata: None,
        chunks,
    })
    .await;
    kb.bind("sk-test-key-000001", &BagOfWords).await.unwrap();
    kb
}

async fn collect(stream: TokenStream) -> Vec<String> {
    stream.map(|r| r.unwrap()).collect().await
}

#[tokio::test]
async fn rag_run_grounds_answer_in_retrieved_context() {
    let kb = ready_kb(vec![
        chunk(
            "The tier 1 capital ratio minimum is 6%.",
            "basel.pdf",
            "pdf",
            Some("basel_document"),
        ),
        chunk("Unrelated liquidity note.", "notes.txt", "text", None),
    ])
    .await;

    let chat = Arc::new(StubChat::new(vec!["The minimum is 6%.", "\n\nSee basel.pdf."]));
    let pipeline = RagPipeline::new(
        kb,
        Arc::new(BagOfWords),
        chat.clone(),
        RetrievalConfig::default(),
    );

    let stream = pipeline
        .run("What is the tier 1 capital ratio?", Some(2), None)
        .await
        .unwrap();
    let paragraphs = collect(stream).await;

    assert_eq!(paragraphs.len(), 2);
    assert!(paragraphs.iter().all(|p| p.ends_with("\n\n")));

    let prompt = chat.last_user_prompt();
    assert!(prompt.contains("Question: What is the tier 1 capital ratio?"));
    assert!(prompt.contains("Context from documents:"));
    assert!(prompt.contains("[Source: basel.pdf]"));
    assert!(prompt.contains("The tier 1 capital ratio minimum is 6%."));
}

#[tokio::test]
async fn rag_run_with_empty_index_returns_canned_paragraph() {
    let kb = ready_kb(Vec::new()).await;
    let chat = Arc::new(StubChat::new(vec!["never sent"]));
    let pipeline = RagPipeline::new(
        kb,
        Arc::new(BagOfWords),
        chat.clone(),
        RetrievalConfig::default(),
    );

    let stream = pipeline.run("anything", None, None).await.unwrap();
    let paragraphs = collect(stream).await;

    assert_eq!(paragraphs.len(), 1);
    assert!(paragraphs[0].starts_with(NO_RESULTS_MESSAGE));
    assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn regulatory_run_uses_role_prompt_and_grouped_context() {
    let kb = ready_kb(vec![
        chunk(
            "CET1 capital requirements under Basel III.",
            "basel_iii.pdf",
            "pdf",
            Some("basel_document"),
        ),
        chunk(
            "Own funds template with capital rows.",
            "corep_own_funds.xlsx",
            "excel",
            Some("corep_template"),
        ),
    ])
    .await;

    let chat = Arc::new(StubChat::new(vec!["Grounded regulatory answer."]));
    let pipeline = RagPipeline::new(
        kb,
        Arc::new(BagOfWords),
        chat.clone(),
        RetrievalConfig::default(),
    );
    let enhancer = RegulatoryEnhancer::new(pipeline);

    let response = enhancer
        .run(
            "What are the CET1 capital requirements?",
            UserRole::Analyst,
            Some(2),
            &RegulatoryFilters::default(),
            None,
        )
        .await
        .unwrap();

    assert!(!response.fallback);
    let paragraphs = collect(response.stream).await;
    assert_eq!(paragraphs, vec!["Grounded regulatory answer.\n\n".to_string()]);

    let system = chat.last_system_prompt();
    assert!(system.contains("Regulatory Reporting Copilot"));
    assert!(system.contains("Regulatory Analyst"));

    let prompt = chat.last_user_prompt();
    assert!(prompt.contains("Regulatory Context:"));
    assert!(prompt.contains("DOCUMENTS"));
    assert!(prompt.contains("Source: basel_iii.pdf"));
}

#[tokio::test]
async fn regulatory_doc_type_filter_limits_context() {
    let kb = ready_kb(vec![
        chunk("Capital text in pdf.", "a.pdf", "pdf", None),
        chunk("Capital text in sheet.", "b.xlsx", "excel", None),
    ])
    .await;

    let chat = Arc::new(StubChat::new(vec!["ok"]));
    let pipeline = RagPipeline::new(
        kb,
        Arc::new(BagOfWords),
        chat.clone(),
        RetrievalConfig::default(),
    );
    let enhancer = RegulatoryEnhancer::new(pipeline);

    let filters = RegulatoryFilters {
        doc_types: vec!["excel".to_string()],
        priority_sources: Vec::new(),
    };
    let response = enhancer
        .run("capital question", UserRole::General, Some(2), &filters, None)
        .await
        .unwrap();
    collect(response.stream).await;

    let prompt = chat.last_user_prompt();
    assert!(prompt.contains("b.xlsx"));
    assert!(!prompt.contains("a.pdf"));
}

#[tokio::test]
async fn regulatory_falls_back_to_base_pipeline_on_error() {
    let kb = ready_kb(vec![chunk(
        "Basel capital guidance.",
        "basel.pdf",
        "pdf",
        None,
    )])
    .await;

    // First chat call (enhanced path) fails; the base pipeline's call succeeds
    let chat = Arc::new(StubChat::failing_once(vec!["base answer"]));
    let pipeline = RagPipeline::new(
        kb,
        Arc::new(BagOfWords),
        chat.clone(),
        RetrievalConfig::default(),
    );
    let enhancer = RegulatoryEnhancer::new(pipeline);

    let response = enhancer
        .run(
            "capital question",
            UserRole::General,
            None,
            &RegulatoryFilters::default(),
            None,
        )
        .await
        .unwrap();

    assert!(response.fallback);
    let paragraphs = collect(response.stream).await;
    assert_eq!(paragraphs, vec!["base answer\n\n".to_string()]);
    assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn chat_only_bypasses_retrieval() {
    let kb = GlobalKb::new(); // not even seeded
    let chat = Arc::new(StubChat::new(vec!["plain answer"]));
    let pipeline = RagPipeline::new(
        kb,
        Arc::new(BagOfWords),
        chat.clone(),
        RetrievalConfig::default(),
    );

    let stream = pipeline.chat_only("hello", None).await.unwrap();
    let paragraphs = collect(stream).await;
    assert_eq!(paragraphs, vec!["plain answer\n\n".to_string()]);
}
