//! # Knowledge chat
//!
//! Intent matching and knowledge-retrieval core of a customer-facing chat
//! assistant.
//!
//! Two independent services are built from these modules:
//!
//! - the **intent service** embeds every pattern of a tagged intents corpus
//!   once at startup and answers each utterance with a reply from the
//!   nearest intent, or a fallback when the best cosine score is below the
//!   threshold (misses are logged for later curation);
//! - the **knowledge service** aggregates a directory of Word, PDF and Excel
//!   documents into one immutable text, and answers questions by prompting a
//!   completion model with that text, the caller's history and an optional
//!   per-request PDF.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌────────────────┐
//! │ intents.json │──▶│ PatternIndex  │──▶│ IntentResolver │──▶ POST /chat
//! └──────────────┘   └───────────────┘   └────────────────┘
//!
//! ┌──────────────┐   ┌───────────────┐   ┌────────────────┐
//! │ .docx .pdf   │──▶│ KnowledgeBase │──▶│ prompt +       │──▶ POST /query
//! │ .xlsx        │   └───────────────┘   │ completion     │
//! └──────────────┘                       └────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed errors at library seams |
//! | [`extract`] | Per-format text extraction |
//! | [`aggregate`] | Knowledge-base aggregation |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`intents`] | Intents corpus |
//! | [`index`] | Pattern embedding index |
//! | [`resolver`] | Intent resolution |
//! | [`unanswered`] | Unanswered-query sinks |
//! | [`prompt`] | Prompt assembly |
//! | [`completion`] | Completion provider abstraction |
//! | [`ocr`] | OCR for scanned PDFs |
//! | [`supplement`] | Per-request PDF extraction |
//! | [`quote`] | Quote-document lookup |
//! | [`chat`] | Knowledge-base chat service |
//! | [`server`] | HTTP services |

pub mod aggregate;
pub mod chat;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod intents;
pub mod ocr;
pub mod prompt;
pub mod quote;
pub mod resolver;
pub mod server;
pub mod supplement;
pub mod unanswered;
