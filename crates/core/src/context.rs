//! Bounded conversation context and the prompt-facing renderings of it.

use crate::domain::message::StoredMessage;
use crate::domain::retrieval::RetrievalOutcome;

/// How many context messages the dialog rendering includes.
const DIALOG_RENDER_LIMIT: usize = 10;
/// Fragment text cap in the knowledge rendering.
const FRAGMENT_RENDER_LIMIT: usize = 500;

/// The most recent messages of one conversation, oldest first. Derived
/// fresh on every cycle and never cached across cycles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationContext {
    messages: Vec<StoredMessage>,
}

impl ConversationContext {
    /// `messages` must already be oldest-first; the store contract
    /// guarantees that ordering.
    pub fn new(messages: Vec<StoredMessage>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[StoredMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent self-authored message, for escalation alerts.
    pub fn last_bot_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.is_self_authored && !message.text.is_empty())
            .map(|message| message.text.as_str())
    }
}

/// Renders the dialog tail as `Бот:`/`Покупатель:` lines for the
/// generation prompt.
pub fn render_dialog(context: &ConversationContext) -> String {
    if context.is_empty() {
        return "Нет предыдущих сообщений.".to_string();
    }

    let messages = context.messages();
    let start = messages.len().saturating_sub(DIALOG_RENDER_LIMIT);
    messages[start..]
        .iter()
        .map(|message| {
            let sender = if message.is_self_authored { "Бот" } else { "Покупатель" };
            let text = if message.text.is_empty() { "[без текста]" } else { message.text.as_str() };
            format!("{sender}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders retrieved fragments as numbered, source-attributed blocks.
pub fn render_knowledge(outcome: &RetrievalOutcome) -> String {
    if !outcome.found || outcome.fragments.is_empty() {
        return "Релевантная информация не найдена.".to_string();
    }

    outcome
        .fragments
        .iter()
        .enumerate()
        .map(|(index, fragment)| {
            let text = truncate_chars(&fragment.text, FRAGMENT_RENDER_LIMIT);
            format!("[{}] Источник: {}\n{}", index + 1, fragment.source_identifier, text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}
