//! # Knowledge chat CLI (`kchat`)
//!
//! Runs either of the two chat services and exposes the building blocks
//! (aggregation, intent resolution, extraction) for checking a deployment
//! from the shell.
//!
//! ## Usage
//!
//! ```bash
//! kchat --config ./config/assistant.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kchat serve knowledge` | Start the knowledge-base chat service |
//! | `kchat serve intents` | Start the intent-matching service |
//! | `kchat aggregate` | Build the knowledge base and print a per-document report |
//! | `kchat resolve "<text>"` | Resolve one utterance against the intents corpus |
//! | `kchat extract <file>` | Print one document's extracted text |
//!
//! Logging goes to stderr and is filtered with `RUST_LOG` (default `info`).

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use knowledge_chat::aggregate::{aggregate, AggregateOptions, ExtractionOutcome};
use knowledge_chat::config::{self, Config};
use knowledge_chat::embedding::create_embedder;
use knowledge_chat::extract::{extract_file, DocumentKind};
use knowledge_chat::intents::IntentCorpus;
use knowledge_chat::resolver::{IntentResolver, Resolution};
use knowledge_chat::server;
use knowledge_chat::unanswered::FileSink;

/// Knowledge chat: intent matching and knowledge-base question answering.
///
/// All commands except `extract` read a TOML configuration file. See
/// `config/assistant.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kchat",
    about = "Intent matching and knowledge-base chat services",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/assistant.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an HTTP service.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },

    /// Aggregate the knowledge directory and report each document.
    ///
    /// Exits with an error when the directory itself cannot be read.
    Aggregate,

    /// Resolve one utterance and print the chosen reply.
    ///
    /// Misses are recorded in the configured unanswered log, as the
    /// intent service would.
    Resolve {
        /// The utterance to resolve.
        text: String,
    },

    /// Extract text from a single document and print it.
    Extract {
        /// Path to a .docx, .pdf, .xlsx or .html file.
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// Knowledge-base chat (`POST /query`).
    Knowledge,
    /// Intent matching (`POST /chat`).
    Intents,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Extract { file } = &cli.command {
        return run_extract(file);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { service } => match service {
            ServeService::Knowledge => server::run_knowledge_server(&cfg).await?,
            ServeService::Intents => server::run_intent_server(&cfg).await?,
        },
        Commands::Aggregate => run_aggregate(&cfg)?,
        Commands::Resolve { text } => run_resolve(&cfg, &text).await?,
        Commands::Extract { .. } => unreachable!(),
    }

    Ok(())
}

fn run_extract(file: &std::path::Path) -> anyhow::Result<()> {
    let Some(kind) = DocumentKind::from_path(file, true) else {
        bail!("Unsupported document type: {}", file.display());
    };
    let text = extract_file(file, kind, u64::MAX)
        .with_context(|| format!("Failed to extract {}", file.display()))?;
    println!("{}", text);
    Ok(())
}

fn run_aggregate(cfg: &Config) -> anyhow::Result<()> {
    let options = AggregateOptions::from(&cfg.knowledge);
    let knowledge = aggregate(&cfg.knowledge.dir, &options)?;

    for doc in knowledge.documents() {
        match &doc.outcome {
            ExtractionOutcome::Extracted { chars } => {
                println!("  ok    {:<6} {} ({} chars)", doc.kind.label(), doc.path.display(), chars)
            }
            ExtractionOutcome::Failed { error } => {
                println!("  FAIL  {:<6} {}: {}", doc.kind.label(), doc.path.display(), error)
            }
        }
    }
    println!(
        "{} documents, {} failed, {} chars total",
        knowledge.documents().len(),
        knowledge.failed_count(),
        knowledge.text().chars().count()
    );
    Ok(())
}

async fn run_resolve(cfg: &Config, text: &str) -> anyhow::Result<()> {
    let corpus = IntentCorpus::load(&cfg.intents.corpus)?;
    let embedder = create_embedder(&cfg.embedding)?;
    let sink = Arc::new(FileSink::new(cfg.intents.unanswered_log.clone()));
    let resolver = IntentResolver::build(corpus, embedder, sink)
        .await?
        .with_threshold(cfg.intents.threshold)
        .with_fallback(cfg.intents.fallback.clone());

    match resolver.resolve(text).await? {
        Resolution::Matched {
            tag,
            response,
            score,
        } => {
            println!("matched {} (score {:.4})", tag, score);
            println!("{}", response);
        }
        Resolution::Unmatched { response, score } => {
            match score {
                Some(s) => println!("no match (best score {:.4})", s),
                None => println!("no match (empty corpus)"),
            }
            println!("{}", response);
        }
    }
    Ok(())
}
