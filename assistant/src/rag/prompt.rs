// Prompt assembly: system + passages, then the newest history turns that fit, then the question

use crate::llm::ChatMessage;
use crate::models::{Message, Passage};

/// Fixed per-message overhead for role markers and separators.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Character-based token estimate: 1 token ≈ 4 characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

fn message_tokens(content: &str) -> usize {
    estimate_tokens(content) + MESSAGE_OVERHEAD_TOKENS
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub messages: Vec<ChatMessage>,
    pub estimated_tokens: usize,
    /// Number of oldest history turns left out to respect the budget.
    pub dropped_turns: usize,
}

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    system_prompt: String,
    token_budget: usize,
}

impl PromptAssembler {
    pub fn new(system_prompt: impl Into<String>, token_budget: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            token_budget,
        }
    }

    pub fn assemble(&self, passages: &[Passage], history: &[Message], question: &str) -> AssembledPrompt {
        let system = self.system_message(passages);
        let fixed = message_tokens(&system) + message_tokens(question);
        let available = self.token_budget.saturating_sub(fixed);

        let kept_from = first_kept_turn(history, available);
        let kept = &history[kept_from..];
        let history_tokens: usize = kept.iter().map(|m| message_tokens(&m.content)).sum();

        let mut messages = Vec::with_capacity(kept.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(kept.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(question));

        AssembledPrompt {
            messages,
            estimated_tokens: fixed + history_tokens,
            dropped_turns: kept_from,
        }
    }

    fn system_message(&self, passages: &[Passage]) -> String {
        let mut system = self.system_prompt.clone();
        system.push_str("\n\nContexto:");

        if passages.is_empty() {
            system.push_str("\n(sin documentos relevantes)");
        }
        for (index, passage) in passages.iter().enumerate() {
            match passage.source_label() {
                Some(label) => system.push_str(&format!("\n\n[{}] (Fuente: {})\n", index + 1, label)),
                None => system.push_str(&format!("\n\n[{}]\n", index + 1)),
            }
            system.push_str(&passage.content);
        }
        system
    }
}

/// Index of the oldest turn kept so that the suffix fits in `available`.
fn first_kept_turn(history: &[Message], available: usize) -> usize {
    let mut used = 0;
    for (index, message) in history.iter().enumerate().rev() {
        let cost = message_tokens(&message.content);
        if used + cost > available {
            return index + 1;
        }
        used += cost;
    }
    0
}
