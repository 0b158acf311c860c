//! Knowledge-base chat service.
//!
//! Holds the immutable startup context (knowledge base, persona, clients)
//! and answers one message at a time. Conversation history arrives with
//! each request and is never stored here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::aggregate::{failure_placeholder, KnowledgeBase};
use crate::completion::{CompletionClient, GenerationParams};
use crate::error::CompletionServiceError;
use crate::ocr::OcrEngine;
use crate::prompt::{assemble, ConversationTurn};
use crate::quote::{find_quote_document, mentions_keyword};
use crate::supplement::extract_supplemental;

/// Reply sent when a quote document is available.
pub const QUOTE_FOUND_MESSAGE: &str =
    "Un devis a été trouvé et est disponible en téléchargement !";
/// Reply sent when a quote was requested but none is on file.
pub const QUOTE_MISSING_MESSAGE: &str =
    "Aucun devis trouvé dans le dossier. Veuillez contacter le service client.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("the knowledge base has not been loaded")]
    NotReady,
    #[error("message must not be empty")]
    EmptyMessage,
    #[error(transparent)]
    Completion(#[from] CompletionServiceError),
}

/// Where quote documents live and which keyword triggers them.
#[derive(Debug, Clone)]
pub struct QuoteSettings {
    pub dir: PathBuf,
    pub keyword: String,
}

/// A PDF uploaded with one question. Extracted only when the question
/// reaches the completion step.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub response: String,
    /// Quote document handed back instead of a model answer.
    pub attachment: Option<PathBuf>,
}

pub struct KnowledgeService {
    knowledge: Arc<KnowledgeBase>,
    persona: String,
    completion: Arc<dyn CompletionClient>,
    params: GenerationParams,
    ocr: Option<Arc<dyn OcrEngine>>,
    quotes: Option<QuoteSettings>,
}

impl KnowledgeService {
    pub fn new(
        knowledge: Arc<KnowledgeBase>,
        persona: impl Into<String>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            knowledge,
            persona: persona.into(),
            completion,
            params: GenerationParams::default(),
            ocr: None,
            quotes: None,
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_quotes(mut self, quotes: QuoteSettings) -> Self {
        self.quotes = Some(quotes);
        self
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn quotes(&self) -> Option<&QuoteSettings> {
        self.quotes.as_ref()
    }

    /// Extract an uploaded PDF for this request only.
    ///
    /// Extraction failures degrade to a placeholder so the question is still
    /// answered.
    pub async fn supplemental_text(&self, file_name: &str, pdf_bytes: Vec<u8>) -> String {
        match extract_supplemental(pdf_bytes, self.ocr.as_deref()).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(file = file_name, error = %e, "supplemental extraction failed");
                failure_placeholder(Path::new(file_name), &e.to_string())
            }
        }
    }

    /// Answer `message` given the caller's `history`.
    ///
    /// `upload` is extracted after the readiness, input and quote checks, so
    /// rejected or short-circuited requests never pay for extraction. The
    /// caller appends `message` and the reply to its own history.
    pub async fn answer(
        &self,
        history: &[ConversationTurn],
        message: &str,
        upload: Option<Upload>,
    ) -> Result<ChatReply, ChatError> {
        if !self.knowledge.is_ready() {
            return Err(ChatError::NotReady);
        }
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        if let Some(quotes) = &self.quotes {
            if mentions_keyword(message, &quotes.keyword) {
                return Ok(match find_quote_document(&quotes.dir, &quotes.keyword) {
                    Some(path) => {
                        tracing::info!(file = %path.display(), "quote document returned");
                        ChatReply {
                            response: QUOTE_FOUND_MESSAGE.to_string(),
                            attachment: Some(path),
                        }
                    }
                    None => ChatReply {
                        response: QUOTE_MISSING_MESSAGE.to_string(),
                        attachment: None,
                    },
                });
            }
        }

        let supplemental = match upload {
            Some(Upload { file_name, bytes }) => Some(self.supplemental_text(&file_name, bytes).await),
            None => None,
        };

        let prompt = assemble(
            &self.persona,
            self.knowledge.text(),
            history,
            message,
            supplemental.as_deref(),
        );
        tracing::debug!(
            history = history.len(),
            estimated_tokens = prompt.estimated_tokens(),
            "prompt assembled"
        );

        let response = self.completion.complete(&prompt, self.params).await?;
        Ok(ChatReply {
            response,
            attachment: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{PromptPayload, Role};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Echoes the final user block and remembers every prompt it saw.
    #[derive(Default)]
    struct EchoCompletion {
        seen: Mutex<Vec<PromptPayload>>,
    }

    #[async_trait]
    impl CompletionClient for EchoCompletion {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn complete(
            &self,
            prompt: &PromptPayload,
            _params: GenerationParams,
        ) -> Result<String, CompletionServiceError> {
            self.seen.lock().unwrap().push(prompt.clone());
            Ok(prompt.last_user().map(|m| m.content.clone()).unwrap_or_default())
        }
    }

    fn service(kb: &str, completion: Arc<EchoCompletion>) -> KnowledgeService {
        KnowledgeService::new(Arc::new(KnowledgeBase::from_text(kb)), "persona", completion)
    }

    #[tokio::test]
    async fn empty_knowledge_base_is_not_ready() {
        let svc = service("", Arc::new(EchoCompletion::default()));
        let err = svc.answer(&[], "question", None).await.unwrap_err();
        assert!(matches!(err, ChatError::NotReady));
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let svc = service("kb", Arc::new(EchoCompletion::default()));
        let err = svc.answer(&[], "   ", None).await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));
    }

    #[tokio::test]
    async fn answer_forwards_history_and_knowledge() {
        let completion = Arc::new(EchoCompletion::default());
        let svc = service("tarifs 2024", completion.clone());
        let history = vec![
            ConversationTurn::user("bonjour"),
            ConversationTurn::assistant("bonjour !"),
        ];
        let reply = svc.answer(&history, "prix ?", None).await.unwrap();
        assert_eq!(reply.response, "prix ?");
        assert!(reply.attachment.is_none());

        let seen = completion.seen.lock().unwrap();
        let prompt = &seen[0];
        assert!(prompt.messages[1].content.ends_with("tarifs 2024"));
        assert_eq!(prompt.messages[2], history[0]);
        assert_eq!(prompt.messages[3], history[1]);
        assert_eq!(prompt.messages[4].role, Role::User);
    }

    #[tokio::test]
    async fn quote_keyword_short_circuits_completion() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("devis_vita.pdf"), b"%PDF").unwrap();
        let completion = Arc::new(EchoCompletion::default());
        let svc = service("kb", completion.clone()).with_quotes(QuoteSettings {
            dir: tmp.path().to_path_buf(),
            keyword: "devis".into(),
        });
        let reply = svc.answer(&[], "Je veux un Devis", None).await.unwrap();
        assert_eq!(reply.response, QUOTE_FOUND_MESSAGE);
        assert_eq!(
            reply.attachment.unwrap().file_name().unwrap(),
            "devis_vita.pdf"
        );
        assert!(completion.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_quote_document_is_reported() {
        let tmp = tempfile::TempDir::new().unwrap();
        let svc = service("kb", Arc::new(EchoCompletion::default())).with_quotes(QuoteSettings {
            dir: tmp.path().to_path_buf(),
            keyword: "devis".into(),
        });
        let reply = svc.answer(&[], "un devis svp", None).await.unwrap();
        assert_eq!(reply.response, QUOTE_MISSING_MESSAGE);
        assert!(reply.attachment.is_none());
    }

    struct CountingOcr {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl OcrEngine for CountingOcr {
        async fn recognize(&self, _pdf_bytes: &[u8]) -> Result<String, crate::error::ExtractError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok("texte scanné".to_string())
        }
    }

    fn garbage_upload() -> Upload {
        Upload {
            file_name: "scan.pdf".into(),
            bytes: b"garbage".to_vec(),
        }
    }

    #[tokio::test]
    async fn rejected_requests_skip_upload_extraction() {
        let ocr = Arc::new(CountingOcr {
            calls: Default::default(),
        });
        let not_ready = service("", Arc::new(EchoCompletion::default())).with_ocr(ocr.clone());
        let err = not_ready
            .answer(&[], "question", Some(garbage_upload()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotReady));

        let ready = service("kb", Arc::new(EchoCompletion::default())).with_ocr(ocr.clone());
        let err = ready.answer(&[], " ", Some(garbage_upload())).await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));

        assert_eq!(ocr.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upload_is_extracted_for_answered_questions() {
        let ocr = Arc::new(CountingOcr {
            calls: Default::default(),
        });
        let completion = Arc::new(EchoCompletion::default());
        let svc = service("kb", completion.clone()).with_ocr(ocr.clone());
        let reply = svc
            .answer(&[], "Que dit ce scan ?", Some(garbage_upload()))
            .await
            .unwrap();
        assert!(reply.response.ends_with("texte scanné"));
        assert_eq!(ocr.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreadable_upload_degrades_to_placeholder() {
        let svc = service("kb", Arc::new(EchoCompletion::default()));
        let text = svc.supplemental_text("scan.pdf", b"garbage".to_vec()).await;
        assert!(text.starts_with("[extraction failed: scan.pdf:"));
    }
}
