//! Per-request text extraction for an uploaded PDF.
//!
//! Unlike the knowledge base, supplemental text lives for one request and is
//! never cached.

use crate::error::ExtractError;
use crate::extract::extract_pdf;
use crate::ocr::OcrEngine;

/// Extract text from an uploaded PDF.
///
/// The PDF text layer is tried first. When it fails or contains only
/// whitespace and an OCR engine is available, the pages are OCR'd instead.
pub async fn extract_supplemental(
    pdf_bytes: Vec<u8>,
    ocr: Option<&dyn OcrEngine>,
) -> Result<String, ExtractError> {
    let bytes = pdf_bytes.clone();
    let text_layer = tokio::task::spawn_blocking(move || extract_pdf(&bytes))
        .await
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;

    match (text_layer, ocr) {
        (Ok(text), _) if !text.trim().is_empty() => Ok(text),
        (Ok(_), Some(engine)) => {
            tracing::debug!("supplemental PDF has no text layer; running OCR");
            engine.recognize(&pdf_bytes).await
        }
        (Err(e), Some(engine)) => {
            tracing::debug!(error = %e, "supplemental PDF text layer unreadable; running OCR");
            engine.recognize(&pdf_bytes).await
        }
        (Ok(text), None) => Ok(text),
        (Err(e), None) => Err(e),
    }
}
