//! Error taxonomy for the retrieval core.
//!
//! Each failure class maps to exactly one recovery policy:
//!
//! | Error | Policy |
//! |-------|--------|
//! | [`AggregateError`] | knowledge base not ready; process keeps serving |
//! | [`ExtractError`] | per file; recovered by the aggregator as a placeholder |
//! | [`EmbeddingServiceError`] | surfaced to the caller of the request |
//! | [`CompletionServiceError`] | surfaced verbatim as the response body |
//! | [`CorpusError`] | invalid intents corpus; fatal at startup |

use std::path::PathBuf;

use thiserror::Error;

/// The knowledge-base directory could not be listed.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("cannot read knowledge base directory {}: {source}", path.display())]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single document could not be turned into text.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("HTML read failed: {0}")]
    Html(String),
    #[error("OCR failed: {0}")]
    Ocr(String),
    #[error("file too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The embedding collaborator could not produce vectors.
///
/// Distinct from "no match": a resolver that cannot reach the embedder
/// reports this instead of falling back.
#[derive(Debug, Error)]
pub enum EmbeddingServiceError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// The completion collaborator failed to produce text.
#[derive(Debug, Error)]
pub enum CompletionServiceError {
    #[error("completion provider is disabled")]
    Disabled,
    #[error("completion request failed: {0}")]
    Request(String),
    #[error("completion API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid completion response: {0}")]
    InvalidResponse(String),
}

/// The intents corpus violates its construction invariants.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to read intents corpus {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse intents corpus: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("intent '{0}' has no patterns")]
    NoPatterns(String),
    #[error("intent '{0}' has no responses")]
    NoResponses(String),
}
