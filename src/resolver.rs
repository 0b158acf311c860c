//! Intent resolution: nearest pattern, threshold, canned reply or fallback.
//!
//! Resolution is a pure function of the utterance and the static index,
//! apart from two side channels: the injected [`ResponsePicker`] chooses
//! among an intent's replies, and misses are appended to the
//! [`UnansweredSink`].

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::embedding::Embedder;
use crate::error::EmbeddingServiceError;
use crate::index::{NearestMatch, PatternIndex};
use crate::intents::IntentCorpus;
use crate::unanswered::UnansweredSink;

/// Reply returned when no intent clears the threshold.
pub const DEFAULT_FALLBACK: &str =
    "Je ne suis pas certain de la réponse, mais je suis là si vous avez d'autres questions !";

/// Minimum cosine similarity for a match.
pub const DEFAULT_THRESHOLD: f32 = 0.9;

/// Chooses one response among `len` candidates.
pub trait ResponsePicker: Send + Sync {
    /// Returns an index in `0..len`. `len` is never zero.
    fn pick(&self, len: usize) -> usize;
}

/// Uniform choice from the thread-local RNG.
pub struct ThreadRngPicker;

impl ResponsePicker for ThreadRngPicker {
    fn pick(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Uniform choice from a seeded RNG, for reproducible runs.
pub struct SeededPicker {
    rng: Mutex<StdRng>,
}

impl SeededPicker {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl ResponsePicker for SeededPicker {
    fn pick(&self, len: usize) -> usize {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..len),
            Err(poisoned) => poisoned.into_inner().gen_range(0..len),
        }
    }
}

/// Outcome of resolving one utterance.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Matched {
        tag: String,
        response: String,
        score: f32,
    },
    Unmatched {
        response: String,
        /// Best score seen, `None` when the corpus is empty.
        score: Option<f32>,
    },
}

impl Resolution {
    pub fn response(&self) -> &str {
        match self {
            Resolution::Matched { response, .. } | Resolution::Unmatched { response, .. } => {
                response
            }
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Resolution::Matched { .. })
    }
}

pub struct IntentResolver {
    corpus: IntentCorpus,
    owners: Vec<usize>,
    index: PatternIndex,
    threshold: f32,
    fallback: String,
    sink: Arc<dyn UnansweredSink>,
    picker: Arc<dyn ResponsePicker>,
}

impl IntentResolver {
    /// Embed the corpus patterns and assemble a resolver with the default
    /// threshold, fallback and a [`ThreadRngPicker`].
    pub async fn build(
        corpus: IntentCorpus,
        embedder: Arc<dyn Embedder>,
        sink: Arc<dyn UnansweredSink>,
    ) -> Result<Self, EmbeddingServiceError> {
        let (patterns, owners) = corpus.flatten();
        let index = PatternIndex::build(embedder, patterns).await?;
        tracing::info!(
            intents = corpus.intents().len(),
            patterns = index.len(),
            "intent index ready"
        );
        Ok(Self {
            corpus,
            owners,
            index,
            threshold: DEFAULT_THRESHOLD,
            fallback: DEFAULT_FALLBACK.to_string(),
            sink,
            picker: Arc::new(ThreadRngPicker),
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn with_picker(mut self, picker: Arc<dyn ResponsePicker>) -> Self {
        self.picker = picker;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn pattern_count(&self) -> usize {
        self.index.len()
    }

    /// Resolve one utterance.
    ///
    /// Embedding failures propagate; they are never reported as a miss.
    pub async fn resolve(&self, utterance: &str) -> Result<Resolution, EmbeddingServiceError> {
        let best = self.index.nearest(utterance).await?;

        match best {
            Some(NearestMatch { index, score }) if score >= self.threshold => {
                let intent = self
                    .owners
                    .get(index)
                    .and_then(|&owner| self.corpus.get(owner));
                if let Some(intent) = intent {
                    let choice = self.picker.pick(intent.responses.len()) % intent.responses.len();
                    tracing::debug!(tag = %intent.tag, score, "intent matched");
                    return Ok(Resolution::Matched {
                        tag: intent.tag.clone(),
                        response: intent.responses[choice].clone(),
                        score,
                    });
                }
                Ok(self.miss(utterance, Some(score)).await)
            }
            other => Ok(self.miss(utterance, other.map(|m| m.score)).await),
        }
    }

    async fn miss(&self, utterance: &str, score: Option<f32>) -> Resolution {
        tracing::info!(score = ?score, threshold = self.threshold, "no intent matched");
        if let Err(e) = self.sink.record(utterance).await {
            tracing::warn!(error = %e, "failed to record unanswered query");
        }
        Resolution::Unmatched {
            response: self.fallback.clone(),
            score,
        }
    }
}
