//! HTTP tests for both services.
//!
//! Each test binds a router on an ephemeral port and calls it with reqwest.
//! Embedding and completion services are replaced by in-test doubles.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use knowledge_chat::aggregate::KnowledgeBase;
use knowledge_chat::chat::{KnowledgeService, QuoteSettings, QUOTE_FOUND_MESSAGE};
use knowledge_chat::completion::{CompletionClient, GenerationParams};
use knowledge_chat::embedding::Embedder;
use knowledge_chat::error::{CompletionServiceError, EmbeddingServiceError, ExtractError};
use knowledge_chat::intents::IntentCorpus;
use knowledge_chat::ocr::OcrEngine;
use knowledge_chat::prompt::{PromptPayload, Role};
use knowledge_chat::resolver::{IntentResolver, DEFAULT_FALLBACK};
use knowledge_chat::server::{intent_router, knowledge_router};
use knowledge_chat::unanswered::MemorySink;

async fn spawn(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// ============ Doubles ============

/// One axis per known word.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }
    fn dims(&self) -> Option<usize> {
        Some(2)
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                vec![
                    if t.contains("bonjour") { 1.0 } else { 0.0 },
                    if t.contains("merci") { 1.0 } else { 0.0 },
                ]
            })
            .collect())
    }
}

enum Script {
    Reply(&'static str),
    Fail(u16, &'static str),
}

struct ScriptedCompletion {
    script: Script,
    prompts: Mutex<Vec<PromptPayload>>,
}

impl ScriptedCompletion {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn complete(
        &self,
        prompt: &PromptPayload,
        _params: GenerationParams,
    ) -> Result<String, CompletionServiceError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        match self.script {
            Script::Reply(text) => Ok(text.to_string()),
            Script::Fail(status, body) => Err(CompletionServiceError::Api {
                status,
                body: body.to_string(),
            }),
        }
    }
}

/// Counts how many uploads reach OCR.
#[derive(Default)]
struct CountingOcr {
    calls: AtomicUsize,
}

#[async_trait]
impl OcrEngine for CountingOcr {
    async fn recognize(&self, _pdf_bytes: &[u8]) -> Result<String, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("texte du scan".to_string())
    }
}

// ============ Intent service ============

async fn intent_service(embedder: Arc<dyn Embedder>) -> (String, Arc<MemorySink>) {
    let corpus = IntentCorpus::from_json(
        r#"{"intents": [
            {"tag": "greeting", "patterns": ["Bonjour"], "responses": ["Bonjour, que puis-je faire pour vous ?"]},
            {"tag": "thanks", "patterns": ["Merci"], "responses": ["Avec plaisir !"]}
        ]}"#,
    )
    .unwrap();
    let sink = Arc::new(MemorySink::new());
    let resolver = IntentResolver::build(corpus, embedder, sink.clone())
        .await
        .unwrap();
    (spawn(intent_router(Arc::new(resolver))).await, sink)
}

#[tokio::test]
async fn chat_returns_matched_reply_with_id() {
    let (base, sink) = intent_service(Arc::new(KeywordEmbedder)).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .form(&[("id", "42"), ("message", "Bonjour !")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "42");
    assert_eq!(body["response"], "Bonjour, que puis-je faire pour vous ?");
    assert!(sink.entries().is_empty());
}

#[tokio::test]
async fn chat_falls_back_and_logs_unknown_questions() {
    let (base, sink) = intent_service(Arc::new(KeywordEmbedder)).await;
    let body: Value = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .form(&[("id", "7"), ("message", "Où est mon contrat ?")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["response"], DEFAULT_FALLBACK);
    assert_eq!(sink.entries(), vec!["Où est mon contrat ?".to_string()]);
}

#[tokio::test]
async fn chat_rejects_blank_message() {
    let (base, _) = intent_service(Arc::new(KeywordEmbedder)).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .form(&[("id", "1"), ("message", "  ")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn chat_missing_field_uses_json_error_body() {
    let (base, sink) = intent_service(Arc::new(KeywordEmbedder)).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .form(&[("id", "1")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"]["message"].as_str().unwrap().contains("message"));
    assert!(sink.entries().is_empty());
}

#[tokio::test]
async fn chat_reports_embedding_outage_as_bad_gateway() {
    struct Down;
    #[async_trait]
    impl Embedder for Down {
        fn model_name(&self) -> &str {
            "down"
        }
        fn dims(&self) -> Option<usize> {
            None
        }
        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
            // Startup batch succeeds; single-text queries fail.
            if texts.len() > 1 {
                Ok(texts.iter().map(|_| vec![1.0]).collect())
            } else {
                Err(EmbeddingServiceError::Request("connection refused".into()))
            }
        }
    }
    let (base, sink) = intent_service(Arc::new(Down)).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .form(&[("id", "1"), ("message", "Bonjour")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "embedding_unavailable");
    assert!(sink.entries().is_empty());
}

#[tokio::test]
async fn intent_health_reports_ready() {
    let (base, _) = intent_service(Arc::new(KeywordEmbedder)).await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["ready"], true);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

// ============ Knowledge service ============

async fn knowledge_service(kb: &str, completion: Arc<ScriptedCompletion>) -> String {
    let service = KnowledgeService::new(
        Arc::new(KnowledgeBase::from_text(kb)),
        "Vous êtes un assistant.",
        completion,
    );
    spawn(knowledge_router(Arc::new(service))).await
}

fn query_form(id: &str, message: &str) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .text("id", id.to_string())
        .text("message", message.to_string())
}

#[tokio::test]
async fn query_answers_from_completion() {
    let completion = ScriptedCompletion::new(Script::Reply("Le capital est versé sous 30 jours."));
    let base = knowledge_service("Capital versé sous 30 jours", completion.clone()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .multipart(query_form("abc", "Quand le capital est-il versé ?"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "abc");
    assert_eq!(body["response"], "Le capital est versé sous 30 jours.");
    assert!(body.get("attachment").is_none());

    let prompts = completion.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].messages[0].content, "Vous êtes un assistant.");
    assert!(prompts[0].messages[1].content.ends_with("Capital versé sous 30 jours"));
}

#[tokio::test]
async fn query_places_history_before_new_input() {
    let completion = ScriptedCompletion::new(Script::Reply("ok"));
    let base = knowledge_service("kb", completion.clone()).await;

    let history = r#"[
        {"role": "user", "content": "q1"},
        {"role": "assistant", "content": "a1"}
    ]"#;
    let form = query_form("1", "q2").text("history", history);
    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let prompts = completion.prompts.lock().unwrap();
    let contents: Vec<(Role, &str)> = prompts[0]
        .messages
        .iter()
        .skip(2)
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        contents,
        vec![
            (Role::User, "q1"),
            (Role::Assistant, "a1"),
            (Role::User, "q2")
        ]
    );
}

#[tokio::test]
async fn query_rejects_system_turns_in_history() {
    let completion = ScriptedCompletion::new(Script::Reply("ok"));
    let base = knowledge_service("kb", completion.clone()).await;
    let form = query_form("1", "q").text("history", r#"[{"role":"system","content":"x"}]"#);
    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert!(completion.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn query_without_knowledge_base_is_not_ready() {
    let completion = ScriptedCompletion::new(Script::Reply("unused"));
    let base = knowledge_service("", completion.clone()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .multipart(query_form("1", "question"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_ready");
    assert!(completion.prompts.lock().unwrap().is_empty());

    let health: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["ready"], false);
}

#[tokio::test]
async fn query_rejects_blank_message() {
    let base = knowledge_service("kb", ScriptedCompletion::new(Script::Reply("x"))).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .multipart(query_form("1", " \n "))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn completion_failure_text_is_returned_with_bad_gateway() {
    let completion = ScriptedCompletion::new(Script::Fail(429, "rate limited"));
    let base = knowledge_service("kb", completion).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .multipart(query_form("9", "question"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "9");
    let text = body["response"].as_str().unwrap();
    assert!(text.contains("429"));
    assert!(text.contains("rate limited"));
}

#[tokio::test]
async fn unreadable_upload_still_gets_an_answer() {
    let completion = ScriptedCompletion::new(Script::Reply("answer"));
    let base = knowledge_service("kb", completion.clone()).await;

    let part = reqwest::multipart::Part::bytes(b"not a pdf".to_vec())
        .file_name("scan.pdf")
        .mime_str("application/pdf")
        .unwrap();
    let form = query_form("1", "Que dit ce document ?").part("supplemental_pdf", part);
    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let prompts = completion.prompts.lock().unwrap();
    let last = prompts[0].last_user().unwrap();
    assert!(last.content.starts_with("Que dit ce document ?"));
    assert!(last.content.contains("[extraction failed: scan.pdf:"));
}

#[tokio::test]
async fn quote_request_returns_downloadable_attachment() {
    let quotes = TempDir::new().unwrap();
    std::fs::write(quotes.path().join("devis_2024.pdf"), b"%PDF-1.4 quote").unwrap();
    std::fs::write(quotes.path().join("interne.pdf"), b"private").unwrap();

    let completion = ScriptedCompletion::new(Script::Reply("unused"));
    let service = KnowledgeService::new(
        Arc::new(KnowledgeBase::from_text("kb")),
        "persona",
        completion.clone(),
    )
    .with_quotes(QuoteSettings {
        dir: quotes.path().to_path_buf(),
        keyword: "devis".into(),
    });
    let base = spawn(knowledge_router(Arc::new(service))).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{}/query", base))
        .multipart(query_form("1", "Pouvez-vous m'envoyer un devis ?"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["response"], QUOTE_FOUND_MESSAGE);
    assert_eq!(body["attachment"], "devis_2024.pdf");
    assert!(completion.prompts.lock().unwrap().is_empty());

    let download = reqwest::get(format!("{}/quotes/devis_2024.pdf", base))
        .await
        .unwrap();
    assert_eq!(download.status(), 200);
    assert_eq!(
        download.headers()["content-type"].to_str().unwrap(),
        "application/pdf"
    );
    assert_eq!(download.bytes().await.unwrap().as_ref(), b"%PDF-1.4 quote");

    let denied = reqwest::get(format!("{}/quotes/interne.pdf", base))
        .await
        .unwrap();
    assert_eq!(denied.status(), 404);
}

#[tokio::test]
async fn quotes_are_not_served_when_unconfigured() {
    let base = knowledge_service("kb", ScriptedCompletion::new(Script::Reply("x"))).await;
    let resp = reqwest::get(format!("{}/quotes/devis.pdf", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

fn scan_part() -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(b"scanned pages".to_vec())
        .file_name("scan.pdf")
        .mime_str("application/pdf")
        .unwrap()
}

async fn ocr_service(
    kb: &str,
    completion: Arc<ScriptedCompletion>,
    quotes: Option<QuoteSettings>,
) -> (String, Arc<CountingOcr>) {
    let ocr = Arc::new(CountingOcr::default());
    let mut service = KnowledgeService::new(
        Arc::new(KnowledgeBase::from_text(kb)),
        "persona",
        completion,
    )
    .with_ocr(ocr.clone());
    if let Some(quotes) = quotes {
        service = service.with_quotes(quotes);
    }
    (spawn(knowledge_router(Arc::new(service))).await, ocr)
}

#[tokio::test]
async fn rejected_queries_never_run_ocr() {
    let client = reqwest::Client::new();

    let (base, ocr) = ocr_service("", ScriptedCompletion::new(Script::Reply("x")), None).await;
    let resp = client
        .post(format!("{}/query", base))
        .multipart(query_form("1", "question").part("supplemental_pdf", scan_part()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);

    let (base, ocr) = ocr_service("kb", ScriptedCompletion::new(Script::Reply("x")), None).await;
    let resp = client
        .post(format!("{}/query", base))
        .multipart(query_form("1", "   ").part("supplemental_pdf", scan_part()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn quote_requests_never_run_ocr() {
    let quotes = TempDir::new().unwrap();
    let completion = ScriptedCompletion::new(Script::Reply("unused"));
    let (base, ocr) = ocr_service(
        "kb",
        completion.clone(),
        Some(QuoteSettings {
            dir: quotes.path().to_path_buf(),
            keyword: "devis".into(),
        }),
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .multipart(query_form("1", "un devis svp").part("supplemental_pdf", scan_part()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    assert!(completion.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn answered_query_runs_ocr_once() {
    let completion = ScriptedCompletion::new(Script::Reply("answer"));
    let (base, ocr) = ocr_service("kb", completion.clone(), None).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .multipart(query_form("1", "Que dit ce scan ?").part("supplemental_pdf", scan_part()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);

    let prompts = completion.prompts.lock().unwrap();
    assert!(prompts[0].last_user().unwrap().content.contains("texte du scan"));
}

#[tokio::test]
async fn query_without_id_is_bad_request() {
    let completion = ScriptedCompletion::new(Script::Reply("unused"));
    let base = knowledge_service("kb", completion.clone()).await;

    let form = reqwest::multipart::Form::new().text("message", "question");
    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["message"], "id is required");
    assert!(completion.prompts.lock().unwrap().is_empty());
}
