use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub intents: IntentsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub quotes: Option<QuotesConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    #[serde(default = "default_knowledge_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub include_html: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Inline persona text for the system block.
    #[serde(default)]
    pub persona: Option<String>,
    /// File holding the persona text, resolved relative to the working directory.
    #[serde(default)]
    pub persona_file: Option<PathBuf>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            dir: default_knowledge_dir(),
            include_html: false,
            max_file_bytes: default_max_file_bytes(),
            persona: None,
            persona_file: None,
        }
    }
}

fn default_knowledge_dir() -> PathBuf {
    PathBuf::from("./contexte")
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

/// Persona used when neither `persona` nor `persona_file` is configured.
pub const DEFAULT_PERSONA: &str = "Vous êtes un assistant virtuel qui s'appuie sur une base de \
connaissances issue de plusieurs documents. Répondez de manière claire et synthétique. Si vous ne \
trouvez pas la réponse adéquate, formulez poliment une réponse et orientez l'utilisateur vers des \
ressources pertinentes.";

impl KnowledgeConfig {
    /// Resolve the persona text: inline value, then file, then [`DEFAULT_PERSONA`].
    pub fn load_persona(&self) -> Result<String> {
        if let Some(text) = &self.persona {
            return Ok(text.clone());
        }
        if let Some(path) = &self.persona_file {
            return std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read persona file: {}", path.display()));
        }
        Ok(DEFAULT_PERSONA.to_string())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntentsConfig {
    #[serde(default = "default_corpus")]
    pub corpus: PathBuf,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_fallback")]
    pub fallback: String,
    #[serde(default = "default_unanswered_log")]
    pub unanswered_log: PathBuf,
}

impl Default for IntentsConfig {
    fn default() -> Self {
        Self {
            corpus: default_corpus(),
            threshold: default_threshold(),
            fallback: default_fallback(),
            unanswered_log: default_unanswered_log(),
        }
    }
}

fn default_corpus() -> PathBuf {
    PathBuf::from("./base_connaissance.json")
}
fn default_threshold() -> f32 {
    0.9
}
fn default_fallback() -> String {
    crate::resolver::DEFAULT_FALLBACK.to_string()
}
fn default_unanswered_log() -> PathBuf {
    PathBuf::from("./stock_quest.txt")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            model: default_completion_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            base_url: default_base_url(),
            timeout_secs: default_completion_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_completion_provider() -> String {
    "openai".to_string()
}
fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_completion_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ocr_language")]
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            language: default_ocr_language(),
        }
    }
}

fn default_ocr_language() -> String {
    "fra".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotesConfig {
    pub dir: PathBuf,
    #[serde(default = "default_quote_keyword")]
    pub keyword: String,
}

fn default_quote_keyword() -> String {
    "devis".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate intents
    if !(-1.0..=1.0).contains(&config.intents.threshold) {
        bail!("intents.threshold must be in [-1.0, 1.0]");
    }

    // Validate knowledge
    if config.knowledge.persona.is_some() && config.knowledge.persona_file.is_some() {
        bail!("knowledge.persona and knowledge.persona_file are mutually exclusive");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled()
        && config.embedding.provider != "local"
        && config.embedding.model.is_none()
    {
        bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Validate completion
    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.completion.max_tokens == 0 {
        bail!("completion.max_tokens must be > 0");
    }
    if !(0.0..=2.0).contains(&config.completion.temperature) {
        bail!("completion.temperature must be in [0.0, 2.0]");
    }

    if let Some(quotes) = &config.quotes {
        if quotes.keyword.trim().is_empty() {
            bail!("quotes.keyword must not be empty");
        }
    }

    Ok(())
}
