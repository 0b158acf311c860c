//! Quote-document lookup.
//!
//! When a message mentions the quote keyword, the knowledge service hands
//! back a prepared quote document instead of asking the model.

use std::path::{Path, PathBuf};

/// Whether `message` mentions `keyword` (case-insensitive).
pub fn mentions_keyword(message: &str, keyword: &str) -> bool {
    message.to_lowercase().contains(&keyword.to_lowercase())
}

/// First file in `dir` (by name) whose name contains `keyword` and whose
/// extension is `pdf` or `docx`.
pub fn find_quote_document(dir: &Path, keyword: &str) -> Option<PathBuf> {
    let keyword = keyword.to_lowercase();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot read quotes directory");
            return None;
        }
    };

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_quote_file(path, &keyword))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn is_quote_file(path: &Path, keyword: &str) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_lowercase().contains(keyword))
        .unwrap_or(false);
    let ext_matches = matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("pdf") | Some("docx")
    );
    name_matches && ext_matches
}

/// Resolve a download request for `name` inside `dir`.
///
/// Only bare file names that qualify as quote documents are served.
pub fn resolve_download(dir: &Path, name: &str, keyword: &str) -> Option<PathBuf> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return None;
    }
    let path = dir.join(name);
    (path.is_file() && is_quote_file(&path, &keyword.to_lowercase())).then_some(path)
}

/// MIME type for a quote document.
pub fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => "application/pdf",
        _ => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    }
}
