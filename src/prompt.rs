//! Prompt assembly for the knowledge-base chat service.
//!
//! ## Block order
//!
//! 1. **system**: operator persona
//! 2. **system**: [`KNOWLEDGE_HEADER`] followed by the full knowledge-base text
//! 3. every history turn, in the order given
//! 4. **user**: the new input, with supplemental document text appended under
//!    [`SUPPLEMENT_HEADER`] when present
//!
//! The knowledge base is passed through verbatim; size limits are left to the
//! completion service. Assembly is side-effect free: the caller owns the
//! conversation history and appends the new turns itself.

use serde::{Deserialize, Serialize};

/// Approximate chars-per-token ratio used for logging estimates.
const CHARS_PER_TOKEN: usize = 4;

/// Header placed before the knowledge-base text in the second system block.
pub const KNOWLEDGE_HEADER: &str = "Base de connaissances :";

/// Header separating the user's input from supplemental document text.
pub const SUPPLEMENT_HEADER: &str = "Informations supplémentaires issues du PDF :";

/// Role of a message, one-to-one with chat-completion `role` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A role-tagged text block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered message list handed to the completion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptPayload {
    pub messages: Vec<ConversationTurn>,
}

impl PromptPayload {
    /// Rough token count of all message contents.
    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self
            .messages
            .iter()
            .map(|m| m.content.chars().count())
            .sum();
        chars.div_ceil(CHARS_PER_TOKEN)
    }

    /// The final user block.
    pub fn last_user(&self) -> Option<&ConversationTurn> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }
}

/// Build the prompt payload. See the module docs for block order.
pub fn assemble(
    persona: &str,
    knowledge_base: &str,
    history: &[ConversationTurn],
    user_input: &str,
    supplemental: Option<&str>,
) -> PromptPayload {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(ConversationTurn::system(persona));
    messages.push(ConversationTurn::system(format!(
        "{}\n{}",
        KNOWLEDGE_HEADER, knowledge_base
    )));
    messages.extend(history.iter().cloned());

    let content = match supplemental.filter(|s| !s.trim().is_empty()) {
        Some(extra) => format!("{}\n\n{}\n{}", user_input, SUPPLEMENT_HEADER, extra),
        None => user_input.to_string(),
    };
    messages.push(ConversationTurn::user(content));

    PromptPayload { messages }
}
