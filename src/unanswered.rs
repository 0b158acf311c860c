//! Append-only log of utterances that matched no intent.
//!
//! Write-only telemetry for later human review: one utterance per line.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait UnansweredSink: Send + Sync {
    async fn record(&self, utterance: &str) -> std::io::Result<()>;
}

/// Collapse line breaks so each utterance occupies exactly one line.
fn single_line(utterance: &str) -> String {
    utterance
        .split(['\r', '\n'])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Appends utterances to a UTF-8 text file, creating it on first write.
pub struct FileSink {
    path: PathBuf,
    // Serializes appends so concurrent requests never interleave lines.
    lock: tokio::sync::Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UnansweredSink for FileSink {
    async fn record(&self, utterance: &str) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut line = single_line(utterance);
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

/// Keeps recorded utterances in memory.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UnansweredSink for MemorySink {
    async fn record(&self, utterance: &str) -> std::io::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "sink lock poisoned"))?;
        entries.push(single_line(utterance));
        Ok(())
    }
}
