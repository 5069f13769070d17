//! End-to-end tests for the question-answering service and HTTP server.
//!
//! Providers are in-process stubs: embeddings count a few keywords and the
//! generator echoes what it was given, so every scenario runs offline.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use ragchat::config::Config;
use ragchat::extract::TextExtractor;
use ragchat::rag::{IndexStatus, RagService};
use ragchat::server;
use ragchat_core::embedding::EmbeddingProvider;
use ragchat_core::error::GenerationFailure;
use ragchat_core::generation::Generator;
use ragchat_core::models::{Document, Role};
use ragchat_core::{RagError, Result};
use serde_json::{json, Value};
use tempfile::TempDir;

// ─── Stub providers ─────────────────────────────────────────────────

const KEYWORDS: [&str; 3] = ["deadline", "budget", "venue"];

/// One dimension per keyword plus a constant, so no vector is zero.
struct KeywordProvider {
    id: String,
    dims: usize,
}

impl KeywordProvider {
    fn new() -> Self {
        Self {
            id: "test:keywords".to_string(),
            dims: KEYWORDS.len() + 1,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                let mut v = vec![0.1; self.dims];
                for (i, kw) in KEYWORDS.iter().enumerate().take(self.dims) {
                    v[i] = lower.matches(kw).count() as f32;
                }
                v
            })
            .collect())
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Echo,
    Fail,
    Hang,
}

/// Records every call and answers according to its behavior.
struct StubGenerator {
    behavior: Behavior,
    calls: Mutex<Vec<(String, String)>>,
}

impl StubGenerator {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn last_call(&self) -> (String, String) {
        self.calls.lock().last().cloned().expect("generator was not called")
    }
}

#[async_trait]
impl Generator for StubGenerator {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, _instruction: &str, context: &str, question: &str) -> Result<String> {
        self.calls
            .lock()
            .push((context.to_string(), question.to_string()));
        match self.behavior {
            Behavior::Echo if context.is_empty() => Ok("I don't know.".to_string()),
            Behavior::Echo => Ok("Answered from context.".to_string()),
            Behavior::Fail => Err(RagError::generation(
                GenerationFailure::Auth,
                "invalid api key",
            )),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("too late".to_string())
            }
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.documents.path = tmp.path().join("documents");
    config.index.path = tmp.path().join("vector_store");
    config.retrieval.top_k = 1;
    config.generation.max_retries = 0;
    config.server.request_timeout_secs = 5;
    config
}

fn write_corpus(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("deadline.txt"),
        "The project deadline is March 3. The deadline applies to all teams.",
    )
    .unwrap();
    std::fs::write(dir.join("budget.md"), "# Budget\n\nThe budget is ten thousand.").unwrap();
    std::fs::write(dir.join("venue.txt"), "The venue is the town hall.").unwrap();
}

fn service_with(config: Config, generator: Arc<StubGenerator>) -> RagService {
    RagService::new(config, Arc::new(KeywordProvider::new()), generator).unwrap()
}

fn documents() -> Vec<Document> {
    vec![
        Document::new("deadline.txt", "The project deadline is March 3."),
        Document::new("budget.md", "The budget is ten thousand."),
    ]
}

// ─── Answering ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_empty_index_uses_insufficient_context_path() {
    let tmp = TempDir::new().unwrap();
    let generator = StubGenerator::new(Behavior::Echo);
    let service = service_with(test_config(&tmp), generator.clone());
    service.build_index(&[]).await.unwrap();

    let answer = service.answer("s1", "What is X?", false).await.unwrap();
    assert!(answer.sources.is_empty());
    assert_eq!(answer.answer, "I don't know.");
    let (context, question) = generator.last_call();
    assert!(context.is_empty());
    assert_eq!(question, "What is X?");
}

#[tokio::test]
async fn test_answer_before_index_is_not_ready() {
    let tmp = TempDir::new().unwrap();
    let generator = StubGenerator::new(Behavior::Echo);
    let service = service_with(test_config(&tmp), generator.clone());

    let err = service.answer("s1", "What is the deadline?", true).await.unwrap_err();
    assert!(matches!(err.root(), RagError::IndexNotReady));
    assert!(generator.calls.lock().is_empty());
    assert!(service.history("s1").is_empty());
}

#[tokio::test]
async fn test_answer_cites_retrieved_source() {
    let tmp = TempDir::new().unwrap();
    let generator = StubGenerator::new(Behavior::Echo);
    let service = service_with(test_config(&tmp), generator.clone());
    service.build_index(&documents()).await.unwrap();

    let answer = service.answer("s1", "What is the budget?", false).await.unwrap();
    assert_eq!(answer.sources.iter().collect::<Vec<_>>(), vec!["budget.md"]);
    let (context, _) = generator.last_call();
    assert!(context.starts_with("[source: budget.md]"));
    assert!(service.history("s1").is_empty());
}

#[tokio::test]
async fn test_follow_up_is_rewritten_with_history() {
    let tmp = TempDir::new().unwrap();
    let generator = StubGenerator::new(Behavior::Echo);
    let service = service_with(test_config(&tmp), generator.clone());
    service.build_index(&documents()).await.unwrap();

    service.answer("s1", "What is the deadline?", true).await.unwrap();
    let follow_up = service.answer("s1", "Is it flexible?", true).await.unwrap();

    assert!(follow_up.standalone_question.contains("deadline"));
    assert!(follow_up
        .standalone_question
        .ends_with("Current question: Is it flexible?"));
    assert!(follow_up.sources.contains("deadline.txt"));
    let (_, question) = generator.last_call();
    assert!(question.contains("deadline"));

    let history = service.history("s1");
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].role, Role::Question);
    assert_eq!(history[0].text, "What is the deadline?");
    assert_eq!(history[3].role, Role::Answer);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let service = service_with(test_config(&tmp), StubGenerator::new(Behavior::Echo));
    service.build_index(&documents()).await.unwrap();

    service.answer("s1", "What is the deadline?", true).await.unwrap();
    let other = service.answer("s2", "Is it flexible?", true).await.unwrap();

    assert_eq!(other.standalone_question, "Is it flexible?");
    assert_eq!(service.history("s1").len(), 2);
    assert_eq!(service.history("s2").len(), 2);
    assert!(service.history("s2").iter().all(|t| !t.text.contains("deadline")));
}

#[tokio::test]
async fn test_clear_session_empties_history() {
    let tmp = TempDir::new().unwrap();
    let service = service_with(test_config(&tmp), StubGenerator::new(Behavior::Echo));
    service.build_index(&documents()).await.unwrap();

    service.answer("s1", "What is the deadline?", true).await.unwrap();
    service.clear_session("s1");
    assert!(service.history("s1").is_empty());

    let fresh = service.answer("s1", "Is it flexible?", true).await.unwrap();
    assert_eq!(fresh.standalone_question, "Is it flexible?");
}

#[tokio::test]
async fn test_generation_failure_leaves_memory_unchanged() {
    let tmp = TempDir::new().unwrap();
    let service = service_with(test_config(&tmp), StubGenerator::new(Behavior::Fail));
    service.build_index(&documents()).await.unwrap();

    let err = service.answer("s1", "What is the deadline?", true).await.unwrap_err();
    assert!(matches!(
        err,
        RagError::Generation {
            kind: GenerationFailure::Auth,
            ..
        }
    ));
    assert!(service.history("s1").is_empty());
}

#[tokio::test]
async fn test_timeout_leaves_memory_unchanged() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.server.request_timeout_secs = 1;
    let service = service_with(config, StubGenerator::new(Behavior::Hang));
    service.build_index(&documents()).await.unwrap();

    let err = service.answer("s1", "What is the deadline?", true).await.unwrap_err();
    assert!(matches!(err, RagError::TransientNetwork(_)));
    assert!(service.history("s1").is_empty());
}

#[tokio::test]
async fn test_empty_question_rejected() {
    let tmp = TempDir::new().unwrap();
    let service = service_with(test_config(&tmp), StubGenerator::new(Behavior::Echo));
    service.build_index(&documents()).await.unwrap();
    assert!(matches!(
        service.answer("s1", "   ", true).await,
        Err(RagError::InvalidArgument(_))
    ));
}

// ─── Index lifecycle ────────────────────────────────────────────────

#[tokio::test]
async fn test_build_persist_and_reload() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_corpus(&config.documents.path);

    let first = service_with(config.clone(), StubGenerator::new(Behavior::Echo));
    let status = first.ensure_index(false).await.unwrap();
    let IndexStatus::Built(report) = status else {
        panic!("expected a build, got {:?}", status);
    };
    assert_eq!(report.documents, 3);
    assert!(report.skipped.is_empty());
    let before = first.answer("s1", "Where is the venue?", false).await.unwrap();

    let second = service_with(config, StubGenerator::new(Behavior::Echo));
    assert_eq!(
        second.ensure_index(false).await.unwrap(),
        IndexStatus::Loaded {
            entries: report.entries
        }
    );
    let after = second.answer("s1", "Where is the venue?", false).await.unwrap();
    assert_eq!(before.sources, after.sources);
    assert!(after.sources.contains("venue.txt"));
}

#[tokio::test]
async fn test_changed_documents_trigger_rebuild() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_corpus(&config.documents.path);

    let service = service_with(config.clone(), StubGenerator::new(Behavior::Echo));
    service.ensure_index(false).await.unwrap();

    std::fs::write(config.documents.path.join("extra.txt"), "A second venue.").unwrap();
    let restarted = service_with(config.clone(), StubGenerator::new(Behavior::Echo));
    match restarted.ensure_index(false).await.unwrap() {
        IndexStatus::Built(report) => assert_eq!(report.documents, 4),
        other => panic!("expected a rebuild, got {:?}", other),
    }
}

#[tokio::test]
async fn test_changed_documents_without_auto_rebuild_serve_stale() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.index.auto_rebuild = false;
    write_corpus(&config.documents.path);

    let service = service_with(config.clone(), StubGenerator::new(Behavior::Echo));
    service.ensure_index(false).await.unwrap();
    let entries = service.health().entries;

    std::fs::write(config.documents.path.join("extra.txt"), "A second venue.").unwrap();
    let restarted = service_with(config, StubGenerator::new(Behavior::Echo));
    assert_eq!(
        restarted.ensure_index(false).await.unwrap(),
        IndexStatus::Stale { entries }
    );
    assert!(restarted.health().index_ready);
}

#[tokio::test]
async fn test_provider_mismatch_refuses_to_serve() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_corpus(&config.documents.path);

    service_with(config.clone(), StubGenerator::new(Behavior::Echo))
        .ensure_index(false)
        .await
        .unwrap();

    let narrower = KeywordProvider {
        id: "test:keywords".to_string(),
        dims: 2,
    };
    let service = RagService::new(
        config.clone(),
        Arc::new(narrower),
        StubGenerator::new(Behavior::Echo),
    )
    .unwrap();
    let err = service.ensure_index(false).await.unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 4 }));
    assert!(!service.health().index_ready);

    let renamed = KeywordProvider {
        id: "test:other".to_string(),
        dims: 4,
    };
    let service = RagService::new(config, Arc::new(renamed), StubGenerator::new(Behavior::Echo))
        .unwrap();
    let err = service.ensure_index(false).await.unwrap_err();
    assert!(matches!(err, RagError::IndexMismatch(_)));
}

#[tokio::test]
async fn test_forced_rebuild_replaces_mismatched_index() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_corpus(&config.documents.path);

    service_with(config.clone(), StubGenerator::new(Behavior::Echo))
        .ensure_index(false)
        .await
        .unwrap();

    let renamed = KeywordProvider {
        id: "test:other".to_string(),
        dims: 4,
    };
    let service = RagService::new(config, Arc::new(renamed), StubGenerator::new(Behavior::Echo))
        .unwrap();
    assert!(matches!(
        service.ensure_index(true).await.unwrap(),
        IndexStatus::Built(_)
    ));
    assert_eq!(service.ensure_index(false).await.unwrap(), IndexStatus::Loaded {
        entries: service.health().entries
    });
}

#[tokio::test]
async fn test_failed_extraction_skips_document() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_corpus(&config.documents.path);
    std::fs::write(config.documents.path.join("broken.pdf"), b"not a pdf").unwrap();

    let service = service_with(config, StubGenerator::new(Behavior::Echo));
    let report = service.rebuild_from_documents().await.unwrap();
    assert_eq!(report.documents, 3);
    assert_eq!(report.skipped, vec!["broken.pdf".to_string()]);
    assert!(!service.indexed_sources().contains("broken.pdf"));
}

#[tokio::test]
async fn test_no_documents_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    std::fs::create_dir_all(&config.documents.path).unwrap();

    let service = service_with(config, StubGenerator::new(Behavior::Echo));
    let err = service.rebuild_from_documents().await.unwrap_err();
    assert!(err.to_string().contains("No documents found"));
    assert!(!service.health().index_ready);
}

#[tokio::test]
async fn test_add_documents_appends() {
    let tmp = TempDir::new().unwrap();
    let service = service_with(test_config(&tmp), StubGenerator::new(Behavior::Echo));
    service.build_index(&documents()).await.unwrap();
    let before = service.health().entries;

    let report = service
        .add_documents(&[Document::new("venue.txt", "The venue is the town hall.")])
        .await
        .unwrap();
    assert_eq!(report.entries, before + 1);

    let answer = service.answer("s1", "Which venue?", false).await.unwrap();
    assert!(answer.sources.contains("venue.txt"));

    // The appended entry survives a reload.
    let reloaded = service_with(test_config(&tmp), StubGenerator::new(Behavior::Echo));
    let manifest = reloaded.load_index().unwrap().unwrap();
    assert_eq!(manifest.entries, before + 1);
}

#[tokio::test]
async fn test_add_keeps_pending_edits_stale() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_corpus(&config.documents.path);

    let service = service_with(config.clone(), StubGenerator::new(Behavior::Echo));
    service.ensure_index(false).await.unwrap();

    // Edited in place but never rebuilt.
    std::fs::write(
        config.documents.path.join("venue.txt"),
        "The venue moved to the library.",
    )
    .unwrap();
    let outside = tmp.path().join("notes.txt");
    std::fs::write(&outside, "Budget notes for the venue.").unwrap();
    service.add_files(&[outside]).await.unwrap();

    let restarted = service_with(config, StubGenerator::new(Behavior::Echo));
    match restarted.ensure_index(false).await.unwrap() {
        IndexStatus::Built(report) => assert_eq!(report.documents, 3),
        other => panic!("expected a rebuild, got {:?}", other),
    }
}

#[tokio::test]
async fn test_re_adding_a_source_replaces_it() {
    let tmp = TempDir::new().unwrap();
    let service = service_with(test_config(&tmp), StubGenerator::new(Behavior::Echo));
    service.build_index(&[]).await.unwrap();

    let doc = Document::new("x.txt", "hello");
    service.add_documents(&[doc.clone()]).await.unwrap();
    let report = service.add_documents(&[doc]).await.unwrap();
    assert_eq!(report.entries, 1);

    service.build_index(&documents()).await.unwrap();
    let before = service.health().entries;
    let report = service
        .add_documents(&[Document::new("deadline.txt", "The deadline moved to May.")])
        .await
        .unwrap();
    assert_eq!(report.entries, before);

    let reloaded = service_with(test_config(&tmp), StubGenerator::new(Behavior::Echo));
    assert_eq!(reloaded.load_index().unwrap().unwrap().entries, before);
}

/// Serves canned text for `venue.txt` and fails everything else.
struct CannedExtractor;

impl TextExtractor for CannedExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        match path.file_name().and_then(|n| n.to_str()) {
            Some("venue.txt") => Ok("Transcribed: the venue is the old mill.".to_string()),
            _ => Err(RagError::Extraction(format!("{}: unreadable", path.display()))),
        }
    }
}

#[tokio::test]
async fn test_custom_extractor_feeds_the_index() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_corpus(&config.documents.path);

    let generator = StubGenerator::new(Behavior::Echo);
    let service = service_with(config, generator.clone()).with_extractor(Arc::new(CannedExtractor));
    let report = service.rebuild_from_documents().await.unwrap();
    assert_eq!(report.documents, 1);
    assert_eq!(
        report.skipped,
        vec!["budget.md".to_string(), "deadline.txt".to_string()]
    );

    let answer = service.answer("s1", "Which venue?", false).await.unwrap();
    assert!(answer.sources.contains("venue.txt"));
    let (context, _) = generator.last_call();
    assert!(context.contains("old mill"));
}

// ─── HTTP ───────────────────────────────────────────────────────────

async fn spawn_server(service: RagService) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = Arc::new(service);
    tokio::spawn(async move {
        server::serve(listener, service).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_chat_flow() {
    let tmp = TempDir::new().unwrap();
    let service = service_with(test_config(&tmp), StubGenerator::new(Behavior::Echo));
    service.build_index(&documents()).await.unwrap();
    let base = spawn_server(service).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["index_ready"], true);

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({ "question": "What is the deadline?", "session_id": "web" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["session_id"], "web");
    assert_eq!(body["sources"], json!(["deadline.txt"]));
    assert_eq!(body["answer"], "Answered from context.");

    let resp = client
        .post(format!("{}/chat/clear?session_id=web", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("web"));
}

#[tokio::test]
async fn test_http_default_session() {
    let tmp = TempDir::new().unwrap();
    let service = service_with(test_config(&tmp), StubGenerator::new(Behavior::Echo));
    service.build_index(&documents()).await.unwrap();
    let base = spawn_server(service).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({ "question": "What is the budget?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["session_id"], "default");
}

#[tokio::test]
async fn test_http_errors() {
    let tmp = TempDir::new().unwrap();
    let service = service_with(test_config(&tmp), StubGenerator::new(Behavior::Echo));
    let base = spawn_server(service).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "unhealthy");

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({ "question": "What is the deadline?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "index_unavailable");

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({ "question": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_http_generation_failure() {
    let tmp = TempDir::new().unwrap();
    let service = service_with(test_config(&tmp), StubGenerator::new(Behavior::Fail));
    service.build_index(&documents()).await.unwrap();
    let base = spawn_server(service).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({ "question": "What is the deadline?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "generation_failed");
}
