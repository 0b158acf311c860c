//! In-memory nearest-neighbor index over intent pattern embeddings.
//!
//! Built once from an ordered pattern list; position `i` in the index
//! always corresponds to pattern `i`, so callers can map matches back to
//! their owning intent through a parallel list. Search is a brute-force
//! cosine scan, which is the right tool for corpora of a few hundred
//! patterns.

use std::sync::Arc;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::EmbeddingServiceError;

/// Best-scoring pattern for a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestMatch {
    /// Position of the pattern in the list passed to [`PatternIndex::build`].
    pub index: usize,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

pub struct PatternIndex {
    embedder: Arc<dyn Embedder>,
    patterns: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl PatternIndex {
    /// Embed every pattern once, preserving order.
    ///
    /// Fails if the embedder returns the wrong number of vectors or vectors
    /// of differing dimensionality.
    pub async fn build(
        embedder: Arc<dyn Embedder>,
        patterns: Vec<String>,
    ) -> Result<Self, EmbeddingServiceError> {
        let vectors = if patterns.is_empty() {
            Vec::new()
        } else {
            embedder.embed_batch(&patterns).await?
        };

        if vectors.len() != patterns.len() {
            return Err(EmbeddingServiceError::CountMismatch {
                expected: patterns.len(),
                actual: vectors.len(),
            });
        }
        if let Some(first) = vectors.first() {
            let dims = first.len();
            if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
                return Err(EmbeddingServiceError::DimensionMismatch {
                    expected: dims,
                    actual: v.len(),
                });
            }
        }

        tracing::debug!(
            patterns = patterns.len(),
            model = embedder.model_name(),
            "pattern index built"
        );

        Ok(Self {
            embedder,
            patterns,
            vectors,
        })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn pattern(&self, index: usize) -> Option<&str> {
        self.patterns.get(index).map(String::as_str)
    }

    /// Vector dimensionality, or `None` for an empty index.
    pub fn dims(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }

    /// Embed `query` and return the closest pattern.
    ///
    /// Returns `Ok(None)` for an empty index without calling the embedder.
    pub async fn nearest(&self, query: &str) -> Result<Option<NearestMatch>, EmbeddingServiceError> {
        if self.is_empty() {
            return Ok(None);
        }
        let query_vec = self.embedder.embed(query).await?;
        if let Some(dims) = self.dims() {
            if query_vec.len() != dims {
                return Err(EmbeddingServiceError::DimensionMismatch {
                    expected: dims,
                    actual: query_vec.len(),
                });
            }
        }
        Ok(self.nearest_vector(&query_vec))
    }

    /// Arg-max cosine similarity over the stored vectors.
    ///
    /// Ties resolve to the lowest index.
    pub fn nearest_vector(&self, query: &[f32]) -> Option<NearestMatch> {
        let mut best: Option<NearestMatch> = None;
        for (index, vector) in self.vectors.iter().enumerate() {
            let score = cosine_similarity(query, vector);
            match best {
                Some(b) if score <= b.score => {}
                _ => best = Some(NearestMatch { index, score }),
            }
        }
        best
    }
}
