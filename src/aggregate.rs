//! Knowledge-base aggregation from a directory of documents.
//!
//! Every regular file directly inside the directory is dispatched on its
//! extension ([`DocumentKind::from_path`]); unknown extensions are skipped.
//! A file that fails to extract contributes an inline placeholder instead
//! of its text, so one corrupt document never aborts the whole load.
//!
//! The resulting [`KnowledgeBase`] is built once at startup and then shared
//! read-only with every request.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::KnowledgeConfig;
use crate::error::AggregateError;
use crate::extract::{extract_file, DocumentKind};

/// Options controlling which files are aggregated.
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub include_html: bool,
    pub max_file_bytes: u64,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            include_html: false,
            max_file_bytes: 50 * 1024 * 1024,
        }
    }
}

impl From<&KnowledgeConfig> for AggregateOptions {
    fn from(config: &KnowledgeConfig) -> Self {
        Self {
            include_html: config.include_html,
            max_file_bytes: config.max_file_bytes,
        }
    }
}

/// What happened to one document during aggregation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Extracted { chars: usize },
    Failed { error: String },
}

/// Per-document record kept alongside the aggregated text.
#[derive(Debug, Clone)]
pub struct DocumentReport {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub outcome: ExtractionOutcome,
}

/// Immutable aggregated knowledge-base text.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    text: String,
    documents: Vec<DocumentReport>,
}

impl KnowledgeBase {
    /// A knowledge base with no content; [`is_ready`](Self::is_ready) is false.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a knowledge base from already-extracted text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            documents: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn documents(&self) -> &[DocumentReport] {
        &self.documents
    }

    /// Whether requests may be answered with this knowledge base.
    pub fn is_ready(&self) -> bool {
        !self.text.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| matches!(d.outcome, ExtractionOutcome::Failed { .. }))
            .count()
    }

    /// Aggregate `dir`, logging and degrading to [`KnowledgeBase::empty`]
    /// when the directory cannot be listed.
    pub fn load(dir: &Path, options: &AggregateOptions) -> Self {
        match aggregate(dir, options) {
            Ok(kb) => {
                tracing::info!(
                    dir = %dir.display(),
                    documents = kb.documents.len(),
                    failed = kb.failed_count(),
                    chars = kb.text.len(),
                    "knowledge base loaded"
                );
                kb
            }
            Err(e) => {
                tracing::error!(error = %e, "knowledge base unavailable");
                Self::empty()
            }
        }
    }
}

/// Placeholder text that stands in for a document that failed to extract.
pub fn failure_placeholder(path: &Path, error: &str) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    format!("[extraction failed: {}: {}]", name, error)
}

/// Aggregate every recognized document directly inside `dir`.
///
/// Entries are visited in file-name order. Returns
/// [`AggregateError::DirectoryAccess`] only when `dir` itself cannot be
/// listed; per-file failures become placeholders.
pub fn aggregate(dir: &Path, options: &AggregateOptions) -> Result<KnowledgeBase, AggregateError> {
    let metadata = std::fs::metadata(dir).map_err(|source| AggregateError::DirectoryAccess {
        path: dir.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(AggregateError::DirectoryAccess {
            path: dir.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "not a directory"),
        });
    }

    let mut parts = Vec::new();
    let mut documents = Vec::new();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk failed"));
                return Err(AggregateError::DirectoryAccess {
                    path: dir.to_path_buf(),
                    source,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(kind) = DocumentKind::from_path(path, options.include_html) else {
            continue;
        };

        match extract_file(path, kind, options.max_file_bytes) {
            Ok(text) => {
                tracing::debug!(path = %path.display(), kind = kind.label(), chars = text.len(), "extracted");
                documents.push(DocumentReport {
                    path: path.to_path_buf(),
                    kind,
                    outcome: ExtractionOutcome::Extracted { chars: text.len() },
                });
                parts.push(text);
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(path = %path.display(), error = %error, "extraction failed");
                parts.push(failure_placeholder(path, &error));
                documents.push(DocumentReport {
                    path: path.to_path_buf(),
                    kind,
                    outcome: ExtractionOutcome::Failed { error },
                });
            }
        }
    }

    Ok(KnowledgeBase {
        text: parts.join("\n"),
        documents,
    })
}
