//! Prompt composition
//!
//! Layout, in order: one system message holding the instructions and the
//! numbered retrieved context, the most recent history turns, then the
//! question as the final user message.
//!
//! Author: hephaex@gmail.com

use semrag_core::{ChatMessage, ScoredRecord};

/// Default instructions given to the model
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are an assistant that answers questions \
about movies in the provided catalogue. Use only the context below to answer. \
Refer to movies by their title. If the context does not contain the answer, \
say that you don't know.";

/// Builder for chat-completion prompts
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_instruction: String,
    context_sections: Vec<String>,
    history: Vec<ChatMessage>,
    question: String,
    max_context_length: usize,
    max_history_messages: usize,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            context_sections: Vec::new(),
            history: Vec::new(),
            question: String::new(),
            max_context_length: 8000,
            max_history_messages: 10,
        }
    }

    /// Character budget for the context block
    pub fn max_context_length(mut self, chars: usize) -> Self {
        self.max_context_length = chars;
        self
    }

    /// Number of most recent history messages kept
    pub fn max_history_messages(mut self, messages: usize) -> Self {
        self.max_history_messages = messages;
        self
    }

    /// Add retrieved records as numbered context sections
    pub fn add_records(mut self, records: &[ScoredRecord]) -> Self {
        let offset = self.context_sections.len();
        for (i, scored) in records.iter().enumerate() {
            self.context_sections.push(format!(
                "[{}] {}\n{}",
                offset + i + 1,
                scored.record.label(),
                scored.record.text
            ));
        }
        self
    }

    /// Set the conversation so far
    pub fn history(mut self, history: &[ChatMessage]) -> Self {
        self.history = history.to_vec();
        self
    }

    /// Set the question
    pub fn question(mut self, q: impl Into<String>) -> Self {
        self.question = q.into();
        self
    }

    /// Build the message list
    pub fn build(self) -> Vec<ChatMessage> {
        let mut system = self.system_instruction;

        system.push_str("\n\nContext:\n");
        let mut total_length = 0;
        let mut included = 0;
        for section in &self.context_sections {
            if total_length + section.len() > self.max_context_length {
                break;
            }
            system.push_str(section);
            system.push_str("\n\n");
            total_length += section.len();
            included += 1;
        }
        if included == 0 {
            system.push_str("(no relevant context found)\n");
        }
        if included < self.context_sections.len() {
            tracing::debug!(
                "Context truncated to {} of {} sections",
                included,
                self.context_sections.len()
            );
        }

        let skip = self.history.len().saturating_sub(self.max_history_messages);

        let mut messages = Vec::with_capacity(self.history.len() - skip + 2);
        messages.push(ChatMessage::system(system.trim_end()));
        messages.extend(self.history.into_iter().skip(skip));
        messages.push(ChatMessage::user(self.question));
        messages
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}
