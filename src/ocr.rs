//! OCR fallback for scanned PDFs.
//!
//! [`TesseractOcr`] shells out to poppler's `pdftoppm` to rasterize each
//! page at 2x scale (144 dpi) into a temporary directory, then runs
//! `tesseract` on every page image. Both tools must be on `PATH`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::ExtractError;

/// Image-to-text engine for PDFs without a usable text layer.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, pdf_bytes: &[u8]) -> Result<String, ExtractError>;
}

pub struct TesseractOcr {
    language: String,
}

impl TesseractOcr {
    /// `language` is a tesseract language code such as `fra` or `eng`.
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, pdf_bytes: &[u8]) -> Result<String, ExtractError> {
        let workdir = tempfile::TempDir::new()?;
        let pdf_path = workdir.path().join("input.pdf");
        tokio::fs::write(&pdf_path, pdf_bytes).await?;

        let prefix = workdir.path().join("page");
        let output = Command::new("pdftoppm")
            .args(["-r", "144", "-png"])
            .arg(&pdf_path)
            .arg(&prefix)
            .output()
            .await
            .map_err(|e| ExtractError::Ocr(format!("failed to run pdftoppm (is poppler installed?): {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Ocr(format!("pdftoppm failed: {}", stderr.trim())));
        }

        let pages = list_page_images(workdir.path())?;
        let mut texts = Vec::with_capacity(pages.len());
        for page in pages {
            let output = Command::new("tesseract")
                .arg(&page)
                .arg("stdout")
                .args(["-l", &self.language])
                .output()
                .await
                .map_err(|e| ExtractError::Ocr(format!("failed to run tesseract: {}", e)))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(ExtractError::Ocr(format!("tesseract failed: {}", stderr.trim())));
            }
            texts.push(join_paragraph_lines(&String::from_utf8_lossy(&output.stdout)));
        }

        Ok(texts.join("\n"))
    }
}

/// Page images written by `pdftoppm`, in page order.
fn list_page_images(dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let mut pages: Vec<(u32, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter_map(|path| page_number(&path).map(|n| (n, path)))
        .collect();
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages.into_iter().map(|(_, p)| p).collect())
}

/// `page-7.png` / `page-07.png` → 7.
fn page_number(path: &Path) -> Option<u32> {
    if path.extension().and_then(|e| e.to_str()) != Some("png") {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix("page-")?
        .parse()
        .ok()
}

/// Tesseract emits one line per text line; collapse to space-joined text.
fn join_paragraph_lines(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
