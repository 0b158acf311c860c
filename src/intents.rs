//! Canned-intent corpus.
//!
//! The corpus is a JSON document of the form
//!
//! ```json
//! { "intents": [ { "tag": "greeting", "patterns": ["hello", "hi"], "responses": ["Hi there!"] } ] }
//! ```
//!
//! It is loaded once and never mutated. Every intent must carry at least
//! one pattern and one response.

use std::path::Path;

use serde::Deserialize;

use crate::error::CorpusError;

/// A canned conversational category.
#[derive(Debug, Clone, Deserialize)]
pub struct Intent {
    pub tag: String,
    pub patterns: Vec<String>,
    pub responses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CorpusFile {
    intents: Vec<Intent>,
}

/// Validated, read-only list of intents.
#[derive(Debug, Clone, Default)]
pub struct IntentCorpus {
    intents: Vec<Intent>,
}

impl IntentCorpus {
    /// Validate and wrap a list of intents.
    pub fn new(intents: Vec<Intent>) -> Result<Self, CorpusError> {
        for intent in &intents {
            if intent.patterns.is_empty() {
                return Err(CorpusError::NoPatterns(intent.tag.clone()));
            }
            if intent.responses.is_empty() {
                return Err(CorpusError::NoResponses(intent.tag.clone()));
            }
        }
        Ok(Self { intents })
    }

    pub fn from_json(json: &str) -> Result<Self, CorpusError> {
        let file: CorpusFile = serde_json::from_str(json)?;
        Self::new(file.intents)
    }

    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        let json = std::fs::read_to_string(path).map_err(|source| CorpusError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn intents(&self) -> &[Intent] {
        &self.intents
    }

    pub fn get(&self, index: usize) -> Option<&Intent> {
        self.intents.get(index)
    }

    /// Flatten the corpus into patterns plus a parallel list holding the
    /// index of each pattern's owning intent.
    pub fn flatten(&self) -> (Vec<String>, Vec<usize>) {
        let mut patterns = Vec::new();
        let mut owners = Vec::new();
        for (intent_idx, intent) in self.intents.iter().enumerate() {
            for pattern in &intent.patterns {
                patterns.push(pattern.clone());
                owners.push(intent_idx);
            }
        }
        (patterns, owners)
    }
}
